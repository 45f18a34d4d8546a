use crate::{
    config::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT},
    error::AppError,
    models::file::ListOptions,
    models::index::*,
};
use sled::Db;
use std::ops::Bound;
use std::sync::Arc;

/// The four index collections, one sled tree each. Entries are keyed by
/// `(partition, reverse upload time, file id)` so a prefix scan walks one
/// partition newest-first.
pub struct IndexDb {
    conversation: sled::Tree,
    uploader: sled::Tree,
    category: sled::Tree,
    upload_date: sled::Tree,
}

impl IndexDb {
    pub fn new(db: Arc<Db>) -> Result<Self, AppError> {
        Ok(Self {
            conversation: db.open_tree(IndexKind::Conversation.tree_name())?,
            uploader: db.open_tree(IndexKind::Uploader.tree_name())?,
            category: db.open_tree(IndexKind::Category.tree_name())?,
            upload_date: db.open_tree(IndexKind::UploadDate.tree_name())?,
        })
    }

    pub(crate) fn tree(&self, kind: IndexKind) -> &sled::Tree {
        match kind {
            IndexKind::Conversation => &self.conversation,
            IndexKind::Uploader => &self.uploader,
            IndexKind::Category => &self.category,
            IndexKind::UploadDate => &self.upload_date,
        }
    }

    /// Fetch one pointer entry, mostly useful for integrity checks.
    pub fn get_entry(
        &self,
        kind: IndexKind,
        partition: &str,
        uploaded_at: chrono::DateTime<chrono::Utc>,
        file_id: &str,
    ) -> Result<Option<IndexEntry>, AppError> {
        let key = entry_key(partition, uploaded_at, file_id);
        Ok(self
            .tree(kind)
            .get(key)?
            .map(|v| bincode::deserialize(&v))
            .transpose()?)
    }

    /// Walk one partition in descending upload order, applying the entry
    /// filters, and return up to `limit` file ids plus a resume token when
    /// the page filled.
    pub fn scan_partition(
        &self,
        kind: IndexKind,
        partition: &str,
        opts: &ListOptions,
    ) -> Result<(Vec<String>, Option<String>), AppError> {
        let limit = opts
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let prefix = partition_prefix(partition);
        let tree = self.tree(kind);

        let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> =
            match &opts.cursor {
                Some(token) => {
                    let start = decode_cursor(token)?;
                    if !start.starts_with(&prefix) {
                        return Err(AppError::BadCursor);
                    }
                    let prefix = prefix.clone();
                    Box::new(
                        tree.range((Bound::Excluded(start), Bound::Unbounded))
                            .take_while(move |item| match item {
                                Ok((key, _)) => key.starts_with(&prefix),
                                Err(_) => true,
                            }),
                    )
                }
                None => Box::new(tree.scan_prefix(&prefix)),
            };

        let mut file_ids = Vec::new();
        let mut next_cursor = None;

        for item in iter {
            let (key, value) = item?;
            let entry: IndexEntry = bincode::deserialize(&value)?;

            if entry.is_active != opts.active_only {
                continue;
            }
            if let Some(category) = opts.category {
                if entry.category != category {
                    continue;
                }
            }

            file_ids.push(entry.file_id);
            if file_ids.len() >= limit {
                next_cursor = Some(encode_cursor(&key));
                break;
            }
        }

        Ok((file_ids, next_cursor))
    }
}
