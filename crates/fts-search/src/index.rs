//! Tantivy index management.
//!
//! Opens or creates the on-disk index and hands out writers and readers.

use std::path::{Path, PathBuf};

use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, info};

use crate::error::SearchError;
use crate::schema::{build_entity_schema, SearchSchema};

/// Default memory budget for IndexWriter (64MB)
const DEFAULT_WRITER_MEMORY_MB: usize = 64;

/// Search index configuration
#[derive(Debug, Clone)]
pub struct SearchIndexConfig {
    /// Path to index directory
    pub index_path: PathBuf,
    /// Memory budget for writer in MB
    pub writer_memory_mb: usize,
}

impl SearchIndexConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

/// Tantivy index together with its resolved field handles.
pub struct SearchIndex {
    index: Index,
    schema: SearchSchema,
    config: SearchIndexConfig,
}

impl SearchIndex {
    /// Open an existing index or create a new one.
    ///
    /// Fails with `SchemaMismatch` when an existing index lacks one of the
    /// entity document fields.
    pub fn open_or_create(config: SearchIndexConfig) -> Result<Self, SearchError> {
        let index = open_or_create_index(&config.index_path)?;
        let schema = SearchSchema::from_schema(index.schema())?;

        info!(path = ?config.index_path, "Opened search index");

        Ok(Self {
            index,
            schema,
            config,
        })
    }

    pub fn schema(&self) -> &SearchSchema {
        &self.schema
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Create an IndexWriter with the configured memory budget.
    ///
    /// Tantivy allows a single writer per index; callers share it through
    /// [`crate::SearchIndexer`].
    pub fn writer(&self) -> Result<IndexWriter, SearchError> {
        let memory_budget = self.config.writer_memory_mb * 1024 * 1024;
        let writer = self.index.writer(memory_budget)?;
        debug!(memory_mb = self.config.writer_memory_mb, "Created index writer");
        Ok(writer)
    }

    /// Create a reader that picks up commits on `reload()`.
    pub fn reader(&self) -> Result<IndexReader, SearchError> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.config.index_path
    }

    /// Number of live documents as of the last commit
    pub fn num_docs(&self) -> Result<u64, SearchError> {
        let reader = self.reader()?;
        Ok(reader.searcher().num_docs())
    }
}

/// Open an existing index or create a new one in `path`.
pub fn open_or_create_index(path: &Path) -> Result<Index, SearchError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        Ok(Index::open_in_dir(path)?)
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let schema = build_entity_schema();
        Ok(Index::create_in_dir(path, schema.schema().clone())?)
    }
}
