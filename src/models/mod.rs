//! Data models for the file store and its secondary indexes.

/// File record and request/query types.
pub mod file;
/// Index kinds, pointer projections, and key encoding.
pub mod index;
