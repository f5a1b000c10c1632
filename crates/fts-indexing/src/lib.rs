//! Incremental indexing pipeline for the full-text indexer.
//!
//! This crate turns change notifications from the primary store into
//! search-engine updates.
//!
//! ## Key Components
//!
//! - [`CursorLoader`]: ordered source of log records with a persisted
//!   watermark ([`EventLogLoader`] for the event log, [`FullScanLoader`] for
//!   rebuilds)
//! - [`Backlog`]: deduplicating in-memory reindex queue
//! - [`DocumentBridge`]: entity snapshot to [`fts_types::Document`]
//! - [`ParserSession`]: per-batch file content extraction
//! - [`FullTextIndexer`]: the batch loop with retry and catch-up policy
//! - [`RunLock`] / [`RunLease`]: single-flight run coordination
//!
//! ## Architecture
//!
//! 1. Producers write an entity and its log record atomically
//! 2. The indexer reads records after its cursor in sequence order
//! 3. Each record is classified and applied one entity at a time
//! 4. The cursor moves only after the whole batch has been applied
//!
//! The indexer only sees its collaborators through the traits in
//! [`store`], implemented here for `fts_storage::Storage` and
//! `fts_search::SearchIndexer`.

pub mod backlog;
pub mod bridge;
pub mod checkpoint;
pub mod error;
pub mod failure;
pub mod indexer;
pub mod loader;
pub mod lock;
pub mod metrics;
pub mod parser;
pub mod rebuild;
pub mod store;

#[cfg(test)]
mod testing;

pub use backlog::{Backlog, BacklogEntry, BacklogStats};
pub use bridge::{BridgeContext, BridgeOutput, CustomBridge, DocumentBridge};
pub use checkpoint::CursorCheckpoint;
pub use error::IndexingError;
pub use failure::{FailureKind, FailureListener, FailureResponse, IndexFailure, RetryOnFailure};
pub use indexer::{BatchReport, FullTextIndexer, IndexerConfig, IndexerStatus, RunReport};
pub use loader::{CursorLoader, EventLogLoader, FullScanLoader};
pub use lock::{AcquireMode, RunLease, RunLock};
pub use metrics::{IndexerMetrics, MetricsSnapshot};
pub use parser::{
    CloseReport, ContentReader, FileParser, ParserRegistry, ParserSession, PlainTextParser,
    TextChunks,
};
pub use rebuild::{rebuild_index, RebuildReport, RebuildScope};
pub use store::{ChangeMarkerSink, CursorStore, EventLogStore, IndexStores, ObjectStore, SearchEngine};

// Re-exported for callers that pass cancellation into `FullTextIndexer::run`
pub use tokio_util::sync::CancellationToken;
