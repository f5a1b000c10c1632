//! Run coordination and scheduling for the full-text indexer.
//!
//! [`RunCoordinator`] is the only way indexer work is started: it flushes
//! pending change markers, takes the run lock in `Try` or `Wait` mode, runs
//! the indexer on the blocking pool and handles shutdown. [`SchedulerService`]
//! wraps tokio-cron-scheduler and fires the coordinator on a cron schedule.
//!
//! # Example
//!
//! ```ignore
//! use fts_scheduler::{create_indexing_job, IndexingJobConfig, RunCoordinator, SchedulerService};
//!
//! let coordinator = Arc::new(RunCoordinator::new(indexer, stores, parsers, storage));
//! let mut scheduler = SchedulerService::new(SchedulerConfig::from(&settings.schedule)).await?;
//! create_indexing_job(&scheduler, coordinator.clone(), IndexingJobConfig::from(&settings.schedule)).await?;
//! scheduler.start().await?;
//! ```

mod config;
pub mod coordinator;
mod error;
mod jitter;
pub mod jobs;
mod scheduler;

pub use config::SchedulerConfig;
pub use coordinator::{CoordinatorStats, RunCoordinator, RunOutcome};
pub use error::SchedulerError;
pub use jitter::{with_jitter, JitterConfig};
pub use jobs::{create_indexing_job, IndexingJobConfig};
pub use scheduler::SchedulerService;

// Re-export for job implementations
pub use tokio_util::sync::CancellationToken;
