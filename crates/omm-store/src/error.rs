//! Error type for key-value store operations

use omm_common::OmError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write batch of {size} bytes exceeds {max} bytes")]
    BatchTooLarge { size: usize, max: usize },
    #[error("corrupt row {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl StoreError {
    pub fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for OmError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { key, reason } => Self::KvCorrupt { key, reason },
            // An oversized batch is a request the manager should never build
            StoreError::BatchTooLarge { .. } => Self::Internal(e.to_string()),
            other => Self::KvUnavailable(other.to_string()),
        }
    }
}
