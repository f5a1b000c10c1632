//! Predefined jobs for the scheduler.
//!
//! - **indexing**: periodic full-text indexer run through the run coordinator

pub mod indexing;

pub use indexing::{create_indexing_job, IndexingJobConfig};
