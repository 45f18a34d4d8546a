//! filedex: secondary-index maintenance engine for a file-metadata store.
//!
//! Keeps one primary FileRecord collection and four denormalized index
//! collections (by conversation, by uploader, by category, by upload date)
//! consistent, so files can be listed without full scans. Writes fan out
//! pointer entries in grouped atomic batches; hard deletes remove the
//! record and every pointer in one batch.

/// Environment-driven configuration.
pub mod config;
/// Storage layer and index-maintenance operations.
pub mod db;
/// Error taxonomy.
pub mod error;
/// Data models.
pub mod models;

pub use config::Config;
pub use db::{Database, IndexOps};
pub use error::AppError;
