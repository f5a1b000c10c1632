//! Per-entity failure reporting.
//!
//! A failure while indexing one entity never aborts the batch. It is
//! recorded as an [`IndexFailure`] and offered to every registered
//! [`FailureListener`]; a listener may ask for the cursor to be rolled back
//! so the record is retried on the next run.

use serde::Serialize;

use fts_types::LogRecord;

/// Stage at which an entity failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Loading the entity snapshot
    Fetch,
    /// Converting the snapshot to a document
    Build,
    /// Writing to the search engine
    Apply,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Build => "build",
            FailureKind::Apply => "apply",
        })
    }
}

/// One failed record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexFailure {
    pub record: LogRecord,
    pub kind: FailureKind,
    pub message: String,
}

impl IndexFailure {
    pub fn new(record: LogRecord, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            record,
            kind,
            message: message.into(),
        }
    }

    /// Whether the record came from the event log rather than the backlog
    /// or a reindex request.
    pub fn has_log_position(&self) -> bool {
        self.record.sequence_id > 0
    }
}

/// What the indexer should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureResponse {
    /// Keep going; the cursor moves past the record
    #[default]
    Continue,
    /// Set the cursor just before the record so it is retried next run
    Rollback,
}

/// Observer for per-entity failures.
pub trait FailureListener: Send + Sync {
    fn on_failure(&self, failure: &IndexFailure) -> FailureResponse;
}

/// Listener that asks for every failure to be retried.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryOnFailure;

impl FailureListener for RetryOnFailure {
    fn on_failure(&self, _failure: &IndexFailure) -> FailureResponse {
        FailureResponse::Rollback
    }
}
