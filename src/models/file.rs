use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Audio,
    Video,
    Document,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Audio => "audio",
            FileCategory::Video => "video",
            FileCategory::Document => "document",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(FileCategory::Image),
            "audio" => Ok(FileCategory::Audio),
            "video" => Ok(FileCategory::Video),
            "document" => Ok(FileCategory::Document),
            other => Err(AppError::Validation(format!(
                "unknown file category: {}",
                other
            ))),
        }
    }
}

/// Canonical document describing one uploaded file.
///
/// `uploaded_at`, `conversation_id` and `uploaded_by` are immutable after
/// creation; together with `category` they determine which index partitions
/// the record is pointed at from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub original_name: String,
    pub mime_type: String,
    pub category: FileCategory,
    pub size_bytes: u64,
    pub conversation_id: Option<String>,
    pub uploaded_by: Option<String>,
    pub storage_path: String,
    pub public_url: Option<String>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub is_active: bool,
    pub download_count: u64,
    pub uploaded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFileRequest {
    pub original_name: String,
    pub mime_type: String,
    pub category: FileCategory,
    pub size_bytes: u64,
    pub conversation_id: Option<String>,
    pub uploaded_by: Option<String>,
    pub storage_path: String,
    pub public_url: Option<String>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateFileRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.original_name.trim().is_empty() {
            return Err(AppError::Validation("original_name is required".into()));
        }
        if self.mime_type.trim().is_empty() {
            return Err(AppError::Validation("mime_type is required".into()));
        }
        if self.storage_path.trim().is_empty() {
            return Err(AppError::Validation("storage_path is required".into()));
        }
        Ok(())
    }
}

/// Partial update. Only `category` and `is_active` are indexed fields;
/// everything else is applied to the FileRecord alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFileRequest {
    pub original_name: Option<String>,
    pub category: Option<FileCategory>,
    pub is_active: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UpdateFileRequest {
    pub fn touches_indexed(&self) -> bool {
        self.category.is_some() || self.is_active.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub category: Option<FileCategory>,
    pub active_only: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: None,
            cursor: None,
            category: None,
            active_only: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub category: Option<FileCategory>,
    pub uploader_id: Option<String>,
    pub active_only: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: None,
            category: None,
            uploader_id: None,
            active_only: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    pub uploader_id: Option<String>,
    pub conversation_id: Option<String>,
    pub category: Option<FileCategory>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// One page of resolved records plus an opaque resume token.
#[derive(Debug, Serialize)]
pub struct ListPage {
    pub files: Vec<FileRecord>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct StatsSummary {
    pub total_count: u64,
    pub total_size_bytes: u64,
    pub average_size_bytes: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_uploader: BTreeMap<String, u64>,
    pub largest: Option<FileRecord>,
    pub most_recent: Option<FileRecord>,
}

impl FileRecord {
    pub fn new(req: CreateFileRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            original_name: req.original_name,
            mime_type: req.mime_type,
            category: req.category,
            size_bytes: req.size_bytes,
            conversation_id: req.conversation_id,
            uploaded_by: req.uploaded_by,
            storage_path: req.storage_path,
            public_url: req.public_url,
            tags: req.tags.unwrap_or_default(),
            metadata: req.metadata.unwrap_or_default(),
            is_active: true,
            download_count: 0,
            uploaded_at: req.uploaded_at.unwrap_or(now),
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            expires_at: req.expires_at,
            deleted_at: None,
        }
    }

    /// Calendar-day bucket used as the upload-date index partition.
    pub fn date_bucket(&self) -> String {
        self.uploaded_at.format("%Y-%m-%d").to_string()
    }
}
