//! Persisted cursor state.
//!
//! A checkpoint records the highest sequence id fully applied to the index
//! for one cursor key, so a restarted indexer resumes where it stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexingError;

/// Cursor checkpoint, stored as JSON under its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorCheckpoint {
    /// Cursor key, e.g. "fulltext" or "fulltext.full_scan"
    pub key: String,

    /// Highest sequence id fully applied (0 = nothing applied)
    pub watermark: u64,

    /// Records consumed since the checkpoint was created
    pub processed_count: u64,

    /// Last time the watermark moved (milliseconds since epoch for JSON)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_processed_time: DateTime<Utc>,

    /// When this checkpoint was first created
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl CursorCheckpoint {
    /// Create a fresh checkpoint at watermark 0
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_watermark(key, 0)
    }

    /// Create a checkpoint at a specific watermark
    pub fn with_watermark(key: impl Into<String>, watermark: u64) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            watermark,
            processed_count: 0,
            last_processed_time: now,
            created_at: now,
        }
    }

    /// Move the watermark after applying `items_processed` records
    pub fn update(&mut self, watermark: u64, items_processed: u64) {
        self.watermark = watermark;
        self.last_processed_time = Utc::now();
        self.processed_count += items_processed;
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexingError> {
        serde_json::to_vec(self).map_err(IndexingError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexingError> {
        serde_json::from_slice(bytes).map_err(IndexingError::from)
    }
}
