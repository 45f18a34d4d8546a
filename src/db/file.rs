use crate::{error::AppError, models::file::*};
use chrono::Utc;
use sled::Db;
use std::sync::Arc;

/// Primary FileRecord collection, keyed by file id.
pub struct FileDb {
    pub(crate) tree: sled::Tree,
}

impl FileDb {
    pub fn new(db: Arc<Db>) -> Result<Self, AppError> {
        let tree = db.open_tree("files")?;
        Ok(Self { tree })
    }

    pub fn create(&self, record: &FileRecord) -> Result<(), AppError> {
        let key = record.id.as_bytes();
        let value = bincode::serialize(record)?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<FileRecord>, AppError> {
        Ok(self
            .tree
            .get(id.as_bytes())?
            .map(|v| bincode::deserialize(&v))
            .transpose()?)
    }

    /// Apply a partial update and return the record as written.
    pub fn update(
        &self,
        id: &str,
        patch: UpdateFileRequest,
    ) -> Result<Option<FileRecord>, AppError> {
        let result = self.tree.update_and_fetch(id.as_bytes(), move |old| {
            let patch = patch.clone();
            old.and_then(|bytes| {
                let mut record: FileRecord = bincode::deserialize(bytes).ok()?;

                if let Some(name) = patch.original_name {
                    record.original_name = name;
                }
                if let Some(category) = patch.category {
                    record.category = category;
                }
                if let Some(active) = patch.is_active {
                    record.is_active = active;
                    if !active {
                        record.deleted_at = Some(Utc::now());
                    }
                }
                if let Some(tags) = patch.tags {
                    record.tags = tags;
                }
                if let Some(metadata) = patch.metadata {
                    record.metadata = metadata;
                }
                if patch.expires_at.is_some() {
                    record.expires_at = patch.expires_at;
                }

                record.updated_at = Utc::now();
                bincode::serialize(&record).ok()
            })
        })?;

        match result {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Bump the access counter and timestamp. Neither field is projected
    /// into the index collections, so this never fans out.
    pub fn record_access(&self, id: &str) -> Result<Option<FileRecord>, AppError> {
        let result = self.tree.update_and_fetch(id.as_bytes(), |old| {
            old.and_then(|bytes| {
                let mut record: FileRecord = bincode::deserialize(bytes).ok()?;
                record.download_count = record.download_count.saturating_add(1);
                record.last_accessed_at = Some(Utc::now());
                bincode::serialize(&record).ok()
            })
        })?;

        match result {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Linear scan with case-insensitive substring matching over the name,
    /// category, and serialized metadata. No inverted index is maintained;
    /// cost grows with total file count.
    pub fn search(&self, term: &str, opts: &SearchOptions) -> Result<Vec<FileRecord>, AppError> {
        let limit = opts
            .limit
            .unwrap_or(crate::config::DEFAULT_LIST_LIMIT)
            .clamp(1, crate::config::MAX_LIST_LIMIT);
        let needle = term.to_lowercase();
        let mut results = Vec::new();

        for item in self.tree.iter() {
            let (_, value) = item?;
            let record: FileRecord = bincode::deserialize(&value)?;

            if record.is_active != opts.active_only {
                continue;
            }
            if let Some(category) = opts.category {
                if record.category != category {
                    continue;
                }
            }
            if let Some(ref uploader) = opts.uploader_id {
                if record.uploaded_by.as_ref() != Some(uploader) {
                    continue;
                }
            }

            let metadata_blob = serde_json::to_string(&record.metadata).unwrap_or_default();
            let matched = record.original_name.to_lowercase().contains(&needle)
                || record.category.as_str().contains(&needle)
                || metadata_blob.to_lowercase().contains(&needle);

            if matched {
                results.push(record);
                if results.len() >= limit {
                    break;
                }
            }
        }

        Ok(results)
    }

    /// Fold active records matching the query into summary aggregates.
    /// The date-range bounds are applied here rather than pushed into the
    /// scan, matching the single-inequality limit of the store contract.
    pub fn stats(&self, query: &StatsQuery) -> Result<StatsSummary, AppError> {
        let mut summary = StatsSummary::default();

        for item in self.tree.iter() {
            let (_, value) = item?;
            let record: FileRecord = bincode::deserialize(&value)?;

            if !record.is_active {
                continue;
            }
            if let Some(ref uploader) = query.uploader_id {
                if record.uploaded_by.as_ref() != Some(uploader) {
                    continue;
                }
            }
            if let Some(ref conversation) = query.conversation_id {
                if record.conversation_id.as_ref() != Some(conversation) {
                    continue;
                }
            }
            if let Some(category) = query.category {
                if record.category != category {
                    continue;
                }
            }
            if let Some(start) = query.start_date {
                if record.uploaded_at < start {
                    continue;
                }
            }
            if let Some(end) = query.end_date {
                if record.uploaded_at > end {
                    continue;
                }
            }

            summary.total_count += 1;
            summary.total_size_bytes += record.size_bytes;
            *summary
                .by_category
                .entry(record.category.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(ref uploader) = record.uploaded_by {
                *summary.by_uploader.entry(uploader.clone()).or_insert(0) += 1;
            }

            let larger = summary
                .largest
                .as_ref()
                .map(|r| record.size_bytes > r.size_bytes)
                .unwrap_or(true);
            if larger {
                summary.largest = Some(record.clone());
            }

            let newer = summary
                .most_recent
                .as_ref()
                .map(|r| record.uploaded_at > r.uploaded_at)
                .unwrap_or(true);
            if newer {
                summary.most_recent = Some(record);
            }
        }

        if summary.total_count > 0 {
            summary.average_size_bytes = summary.total_size_bytes / summary.total_count;
        }

        Ok(summary)
    }
}
