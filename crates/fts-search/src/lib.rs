//! # fts-search
//!
//! Search engine client for the full-text indexer, backed by Tantivy.
//!
//! ## Features
//! - Embedded Tantivy index with MmapDirectory for persistence
//! - Fixed schema for the well-known entity document fields, plus a JSON
//!   `attributes` field for map annotations and custom bridge fields
//! - Replace-by-id upserts (delete term, then add) and purges
//! - A small searcher for lookups by document id and keyword queries

pub mod document;
pub mod error;
pub mod index;
pub mod indexer;
pub mod schema;
pub mod searcher;

pub use document::to_tantivy_doc;
pub use error::SearchError;
pub use index::{open_or_create_index, SearchIndex, SearchIndexConfig};
pub use indexer::SearchIndexer;
pub use schema::{build_entity_schema, SearchSchema};
pub use searcher::{EntitySearcher, SearchHit, StoredDocument};
