//! Error types for the indexing pipeline.

use fts_search::SearchError;
use fts_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the indexing pipeline
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search engine operation failed
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Document construction failed
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// The run lock could not be obtained in time
    #[error("Run lock not acquired within {0:?}")]
    LockTimeout(std::time::Duration),

    /// A lease for a different index key was presented
    #[error("Run lease is for {actual}, expected {expected}")]
    LeaseMismatch { expected: String, actual: String },

    /// A blocking task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}
