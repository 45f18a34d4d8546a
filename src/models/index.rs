use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::file::{FileCategory, FileRecord};

/// The four secondary index collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Conversation,
    Uploader,
    Category,
    UploadDate,
}

impl IndexKind {
    pub const ALL: [IndexKind; 4] = [
        IndexKind::Conversation,
        IndexKind::Uploader,
        IndexKind::Category,
        IndexKind::UploadDate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IndexKind::Conversation => "by-conversation",
            IndexKind::Uploader => "by-uploader",
            IndexKind::Category => "by-category",
            IndexKind::UploadDate => "by-upload-date",
        }
    }

    /// Sled tree holding this index collection.
    pub(crate) fn tree_name(self) -> &'static str {
        match self {
            IndexKind::Conversation => "idx-by-conversation",
            IndexKind::Uploader => "idx-by-uploader",
            IndexKind::Category => "idx-by-category",
            IndexKind::UploadDate => "idx-by-upload-date",
        }
    }

    /// Partition value this record files under, or None when the optional
    /// partition key was never set (no index entry exists then).
    pub fn partition_for(self, record: &FileRecord) -> Option<String> {
        match self {
            IndexKind::Conversation => record.conversation_id.clone(),
            IndexKind::Uploader => record.uploaded_by.clone(),
            IndexKind::Category => Some(record.category.as_str().to_string()),
            IndexKind::UploadDate => Some(record.date_bucket()),
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "by-conversation" => Ok(IndexKind::Conversation),
            "by-uploader" => Ok(IndexKind::Uploader),
            "by-category" => Ok(IndexKind::Category),
            "by-upload-date" => Ok(IndexKind::UploadDate),
            other => Err(AppError::Validation(format!("unknown index: {}", other))),
        }
    }
}

/// Slim pointer document stored in an index collection. The projection is
/// identical in all four collections for a given file id (invariant: it must
/// track the FileRecord's `category` and `is_active`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub file_id: String,
    pub category: FileCategory,
    pub is_active: bool,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub conversation_id: Option<String>,
    pub uploaded_by: Option<String>,
}

impl IndexEntry {
    pub fn project(record: &FileRecord) -> Self {
        Self {
            file_id: record.id.clone(),
            category: record.category,
            is_active: record.is_active,
            size_bytes: record.size_bytes,
            uploaded_at: record.uploaded_at,
            conversation_id: record.conversation_id.clone(),
            uploaded_by: record.uploaded_by.clone(),
        }
    }
}

/// Index key layout: `{partition}\x00{rev_millis:016x}\x00{file_id}`.
///
/// The middle component is the bitwise complement of the upload timestamp,
/// so a plain ascending prefix scan yields entries newest-first. All three
/// components are immutable after create, making the key derivable from the
/// FileRecord alone.
pub fn entry_key(partition: &str, uploaded_at: DateTime<Utc>, file_id: &str) -> Vec<u8> {
    let rev = u64::MAX - uploaded_at.timestamp_millis().max(0) as u64;
    let mut key = Vec::with_capacity(partition.len() + file_id.len() + 18);
    key.extend_from_slice(partition.as_bytes());
    key.push(0);
    key.extend_from_slice(format!("{:016x}", rev).as_bytes());
    key.push(0);
    key.extend_from_slice(file_id.as_bytes());
    key
}

pub fn partition_prefix(partition: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(partition.len() + 1);
    prefix.extend_from_slice(partition.as_bytes());
    prefix.push(0);
    prefix
}

/// Pagination tokens are the hex-encoded index key of the last returned
/// entry; opaque to callers.
pub fn encode_cursor(key: &[u8]) -> String {
    hex::encode(key)
}

pub fn decode_cursor(token: &str) -> Result<Vec<u8>, AppError> {
    hex::decode(token).map_err(|_| AppError::BadCursor)
}
