//! Error types for eoshistory-sync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Chain node error: {0}")]
    ChainNode(String),

    #[error("Block {0} was not found on the chain node")]
    BlockNotFound(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Lock '{0}' is already held by another process")]
    LockContention(String),

    #[error("Duplicate key value: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Sync aborted: {0}")]
    Aborted(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    /// Duplicate block/transaction/action. Expected under concurrent or retried imports.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_))
    }

    /// Whether repeating the same unit of work could produce a different outcome.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SyncError::Conflict(_)
                | SyncError::InvalidInput(_)
                | SyncError::Config(_)
                | SyncError::Aborted(_)
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
