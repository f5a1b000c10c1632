//! Error types for the scheduler crate.
//!
//! Covers cron and timezone validation, scheduler lifecycle, and failures
//! surfaced by indexer runs the coordinator drives.

use fts_indexing::IndexingError;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Error from the underlying tokio-cron-scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    /// Invalid timezone string
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Scheduler is already running
    #[error("Scheduler is already running")]
    AlreadyRunning,

    /// Scheduler is not running
    #[error("Scheduler is not running")]
    NotRunning,

    /// An indexer run or admin operation failed
    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}
