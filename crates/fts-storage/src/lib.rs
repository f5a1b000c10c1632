//! Storage layer for the full-text indexer.
//!
//! Provides a RocksDB-backed primary store with:
//! - Column family isolation for entities, the event log, annotation links,
//!   pending change markers and cursor checkpoints
//! - Zero-padded keys so lexicographic order matches numeric order
//! - Atomic entity + log record writes via WriteBatch
//! - Change markers for relationship edits, flushed to the log on demand

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{CheckpointKey, EntityKey, LinkKey, LogKey, MarkerKey};
