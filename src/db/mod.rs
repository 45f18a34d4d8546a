//! Database layer: primary file collection, the four secondary index
//! collections, and the index-maintenance operations that keep them in sync.

/// Primary FileRecord storage helpers.
pub mod file;
/// Secondary index storage helpers.
pub mod index;

use crate::config::MAX_BATCH_OPS;
use crate::error::AppError;
use crate::models::file::*;
use crate::models::index::{entry_key, IndexEntry, IndexKind};
use sled::transaction::TransactionError;
use sled::{Db, Transactional};
use std::sync::Arc;

/// Database handle with access to the underlying sled trees.
pub struct Database {
    pub db: Arc<Db>,
    pub files: file::FileDb,
    pub indexes: index::IndexDb,
}

#[cfg(test)]
mod tests;

/// Which collection a batch operation lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchTarget {
    Files,
    Index(IndexKind),
}

/// One write inside a grouped atomic batch.
pub(crate) enum BatchOp {
    Put {
        target: BatchTarget,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        target: BatchTarget,
        key: Vec<u8>,
    },
}

impl BatchOp {
    fn target(&self) -> BatchTarget {
        match self {
            BatchOp::Put { target, .. } => *target,
            BatchOp::Delete { target, .. } => *target,
        }
    }
}

fn map_txn_err(e: TransactionError<()>) -> AppError {
    match e {
        TransactionError::Abort(()) => AppError::Transaction("atomic batch aborted".to_string()),
        TransactionError::Storage(err) => AppError::Database(err),
    }
}

/// Index-maintenance engine: every write fans out from the primary record
/// to the denormalized index collections, and deletes reconcile both sides.
///
/// Sled transactions span the trees involved in one batch, so a grouped
/// batch applies all-or-nothing. The primary write in [`IndexOps::create_file`]
/// and the index batch that follows it are two separate round trips; that
/// gap is part of the documented contract, not hidden here.
pub struct IndexOps;

impl IndexOps {
    /// Persist a new FileRecord, then fan out one pointer entry per
    /// applicable index partition in a single atomic batch.
    ///
    /// # Arguments
    /// - `db`: Database handle.
    /// - `req`: Fully-populated creation request.
    ///
    /// # Returns
    /// The created [`FileRecord`].
    ///
    /// # Errors
    /// `Validation` if required fields are missing. `PartialIndex` if the
    /// index batch fails after the primary write landed; the record is then
    /// fetchable by id but invisible to every listing path.
    pub fn create_file(db: &Database, req: CreateFileRequest) -> Result<FileRecord, AppError> {
        req.validate()?;
        let record = FileRecord::new(req);

        db.files.create(&record)?;

        let ops = Self::index_put_ops(&record)?;
        if let Err(e) = db.apply_atomic(&ops) {
            tracing::error!(
                file_id = %record.id,
                "index fan-out failed after primary write: {}",
                e
            );
            return Err(AppError::PartialIndex { file_id: record.id });
        }

        Ok(record)
    }

    /// Apply a partial update to the FileRecord, reconciling the index
    /// projections when an indexed field (`category`, `is_active`) changed.
    ///
    /// A category change moves the by-category pointer to the new partition;
    /// every other partition key is immutable, so those entries are rewritten
    /// in place.
    ///
    /// # Arguments
    /// - `db`: Database handle.
    /// - `id`: File identifier.
    /// - `patch`: Fields to update.
    ///
    /// # Returns
    /// The updated [`FileRecord`].
    ///
    /// # Errors
    /// `NotFound` if no record exists. `PartialIndex` if the reconciliation
    /// batch fails after the primary update landed.
    pub fn update_indexed_fields(
        db: &Database,
        id: &str,
        patch: UpdateFileRequest,
    ) -> Result<FileRecord, AppError> {
        let touches_indexed = patch.touches_indexed();
        // the pre-update snapshot carries the partition keys the existing
        // pointer entries live under
        let before = if touches_indexed {
            Some(db.files.get(id)?.ok_or(AppError::NotFound)?)
        } else {
            None
        };

        let record = db.files.update(id, patch)?.ok_or(AppError::NotFound)?;

        if let Some(before) = before {
            if let Err(e) = Self::reconcile_indexes(db, &before, &record) {
                tracing::error!(
                    file_id = %record.id,
                    "index reconciliation failed after primary update: {}",
                    e
                );
                return Err(AppError::PartialIndex { file_id: record.id });
            }
        }

        Ok(record)
    }

    /// Flip the record to inactive and stamp `deleted_at`, keeping the index
    /// entries but marking them inactive so listings can filter without a
    /// second fetch. The record itself is retained.
    ///
    /// # Errors
    /// `NotFound` if no record exists.
    pub fn soft_delete(db: &Database, id: &str) -> Result<(), AppError> {
        let patch = UpdateFileRequest {
            is_active: Some(false),
            ..Default::default()
        };
        Self::update_indexed_fields(db, id, patch)?;
        Ok(())
    }

    /// Permanently remove the FileRecord and every pointer entry referencing
    /// it, as one atomic batch of at most 5 operations.
    ///
    /// The record must be read first to learn its partition keys; a write
    /// racing that read can still land between the read and the batch.
    ///
    /// # Errors
    /// `NotFound` if no record exists.
    pub fn hard_delete(db: &Database, id: &str) -> Result<(), AppError> {
        let record = db.files.get(id)?.ok_or(AppError::NotFound)?;

        let mut ops = vec![BatchOp::Delete {
            target: BatchTarget::Files,
            key: record.id.as_bytes().to_vec(),
        }];
        for kind in IndexKind::ALL {
            if let Some(partition) = kind.partition_for(&record) {
                ops.push(BatchOp::Delete {
                    target: BatchTarget::Index(kind),
                    key: entry_key(&partition, record.uploaded_at, &record.id),
                });
            }
        }

        db.apply_atomic(&ops)
    }

    /// Point-read of one FileRecord by id.
    ///
    /// # Errors
    /// `NotFound` if no record exists.
    pub fn get_file(db: &Database, id: &str) -> Result<FileRecord, AppError> {
        db.files.get(id)?.ok_or(AppError::NotFound)
    }

    /// Bump `download_count` and `last_accessed_at` on the primary record.
    /// Never touches an index collection.
    ///
    /// # Errors
    /// `NotFound` if no record exists.
    pub fn record_access(db: &Database, id: &str) -> Result<FileRecord, AppError> {
        db.files.record_access(id)?.ok_or(AppError::NotFound)
    }

    /// Resolve one index partition into full FileRecords: one range scan
    /// over the index, then a point-read per id. Entries whose record no
    /// longer resolves are skipped with a warning rather than failing the
    /// whole page.
    ///
    /// # Arguments
    /// - `db`: Database handle.
    /// - `kind`: Which index collection to consult.
    /// - `partition`: Partition value (conversation id, uploader id,
    ///   category name, or `YYYY-MM-DD` date bucket).
    /// - `opts`: Paging and filter options.
    ///
    /// # Returns
    /// A [`ListPage`] in descending `uploaded_at` order with a resume cursor
    /// when the page filled.
    pub fn list_by_partition(
        db: &Database,
        kind: IndexKind,
        partition: &str,
        opts: &ListOptions,
    ) -> Result<ListPage, AppError> {
        let (file_ids, next_cursor) = db.indexes.scan_partition(kind, partition, opts)?;

        let mut files = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            match db.files.get(&file_id)? {
                Some(record) => files.push(record),
                None => {
                    tracing::warn!(
                        file_id = %file_id,
                        index = %kind,
                        "index entry points at a missing file record, skipping"
                    );
                }
            }
        }

        Ok(ListPage { files, next_cursor })
    }

    /// Substring search over the primary collection (full scan, no inverted
    /// index).
    pub fn search(
        db: &Database,
        term: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<FileRecord>, AppError> {
        db.files.search(term, opts)
    }

    /// Aggregate counts and sizes over active records matching the query.
    pub fn aggregate_stats(db: &Database, query: &StatsQuery) -> Result<StatsSummary, AppError> {
        db.files.stats(query)
    }

    fn index_put_ops(record: &FileRecord) -> Result<Vec<BatchOp>, AppError> {
        let value = bincode::serialize(&IndexEntry::project(record))?;
        let mut ops = Vec::with_capacity(4);
        for kind in IndexKind::ALL {
            if let Some(partition) = kind.partition_for(record) {
                ops.push(BatchOp::Put {
                    target: BatchTarget::Index(kind),
                    key: entry_key(&partition, record.uploaded_at, &record.id),
                    value: value.clone(),
                });
            }
        }
        Ok(ops)
    }

    /// Bring every existing pointer entry in line with the updated record,
    /// as one atomic batch. Entries left missing by a failed create are not
    /// resurrected here; a changed partition value (category) moves the
    /// pointer instead of rewriting it in place.
    fn reconcile_indexes(
        db: &Database,
        before: &FileRecord,
        after: &FileRecord,
    ) -> Result<(), AppError> {
        let mut trees = Vec::new();
        let mut keys: Vec<(Option<Vec<u8>>, Option<Vec<u8>>)> = Vec::new();
        for kind in IndexKind::ALL {
            let old_key = kind
                .partition_for(before)
                .map(|p| entry_key(&p, after.uploaded_at, &after.id));
            let new_key = kind
                .partition_for(after)
                .map(|p| entry_key(&p, after.uploaded_at, &after.id));
            if old_key.is_none() && new_key.is_none() {
                continue;
            }
            trees.push(db.indexes.tree(kind));
            keys.push((old_key, new_key));
        }
        if trees.is_empty() {
            return Ok(());
        }

        let value = bincode::serialize(&IndexEntry::project(after))?;
        let result: Result<(), TransactionError<()>> =
            trees.as_slice().transaction(|txs| {
                for (i, (old_key, new_key)) in keys.iter().enumerate() {
                    match (old_key, new_key) {
                        (Some(old_key), Some(new_key)) if old_key == new_key => {
                            if txs[i].get(old_key)?.is_some() {
                                txs[i].insert(old_key.as_slice(), value.clone())?;
                            }
                        }
                        (Some(old_key), Some(new_key)) => {
                            // partition value changed: move the pointer
                            if txs[i].remove(old_key.as_slice())?.is_some() {
                                txs[i].insert(new_key.as_slice(), value.clone())?;
                            }
                        }
                        (Some(old_key), None) => {
                            txs[i].remove(old_key.as_slice())?;
                        }
                        (None, _) => {}
                    }
                }
                Ok(())
            });
        result.map_err(map_txn_err)
    }
}

impl Database {
    /// Open the database and initialize the primary and index trees.
    ///
    /// # Returns
    /// A fully initialized [`Database`].
    ///
    /// # Errors
    /// Returns an error if sled cannot open the database or trees.
    pub fn new(path: &str) -> Result<Self, AppError> {
        // Ensure the data directory exists
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db = match sled::open(path) {
            Ok(db) => Arc::new(db),
            Err(e) if e.to_string().contains("could not acquire lock") => {
                return Err(AppError::DatabaseError(format!(
                    "Database at {} is locked by another process.\n\
                    Close the other instance, or remove stale lock files left\n\
                    by a crash ({}/db.lock) and try again.",
                    path, path
                )));
            }
            Err(e) => return Err(AppError::DatabaseError(e.to_string())),
        };

        Ok(Self {
            files: file::FileDb::new(db.clone())?,
            indexes: index::IndexDb::new(db.clone())?,
            db,
        })
    }

    /// Apply a grouped batch of writes all-or-nothing across the trees it
    /// touches, within the store's operation ceiling.
    ///
    /// # Errors
    /// `BatchTooLarge` above [`MAX_BATCH_OPS`] operations; storage errors
    /// otherwise.
    pub(crate) fn apply_atomic(&self, ops: &[BatchOp]) -> Result<(), AppError> {
        if ops.is_empty() {
            return Ok(());
        }
        if ops.len() > MAX_BATCH_OPS {
            return Err(AppError::BatchTooLarge(ops.len()));
        }

        let mut targets: Vec<BatchTarget> = Vec::new();
        let mut slots: Vec<usize> = Vec::with_capacity(ops.len());
        for op in ops {
            let target = op.target();
            let slot = match targets.iter().position(|t| *t == target) {
                Some(i) => i,
                None => {
                    targets.push(target);
                    targets.len() - 1
                }
            };
            slots.push(slot);
        }

        let trees: Vec<&sled::Tree> = targets
            .iter()
            .map(|target| match target {
                BatchTarget::Files => &self.files.tree,
                BatchTarget::Index(kind) => self.indexes.tree(*kind),
            })
            .collect();

        let result: Result<(), TransactionError<()>> =
            trees.as_slice().transaction(|txs| {
                for (op, &slot) in ops.iter().zip(slots.iter()) {
                    match op {
                        BatchOp::Put { key, value, .. } => {
                            txs[slot].insert(key.as_slice(), value.clone())?;
                        }
                        BatchOp::Delete { key, .. } => {
                            txs[slot].remove(key.as_slice())?;
                        }
                    }
                }
                Ok(())
            });
        result.map_err(map_txn_err)
    }

    /// Flush all pending writes to disk.
    ///
    /// # Errors
    /// Returns an error if sled fails to flush.
    pub fn flush(&self) -> Result<(), AppError> {
        self.db.flush()?;
        Ok(())
    }
}
