use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The primary FileRecord write succeeded but the index batch did not.
    /// The file stays fetchable by id while being invisible to every listing
    /// path until a corrective write lands.
    #[error("Index writes failed after primary write for file {file_id}")]
    PartialIndex { file_id: String },

    #[error("Malformed pagination cursor")]
    BadCursor,

    #[error("Batch of {0} operations exceeds the atomic write limit")]
    BatchTooLarge(usize),
}
