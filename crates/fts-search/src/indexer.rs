//! Search indexer for applying documents to the Tantivy index.
//!
//! The indexer wraps IndexWriter with shared access via Arc<Mutex>.
//! Changes are not visible to readers until commit() is called.

use std::sync::{Arc, Mutex};

use tantivy::{IndexWriter, Term};
use tracing::{debug, info, warn};

use fts_types::{doc_id, Document};

use crate::document::to_tantivy_doc;
use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::SearchSchema;

/// Applies upserts and purges to the index.
pub struct SearchIndexer {
    writer: Arc<Mutex<IndexWriter>>,
    schema: SearchSchema,
}

impl SearchIndexer {
    /// Create a new indexer from a SearchIndex.
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        let writer = index.writer()?;
        let schema = index.schema().clone();

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            schema,
        })
    }

    /// Insert or fully replace the document for an entity.
    ///
    /// Any prior document with the same id is deleted first, so repeated
    /// upserts of the same snapshot leave exactly one document.
    pub fn upsert(&self, document: &Document) -> Result<(), SearchError> {
        let doc = to_tantivy_doc(&self.schema, document);
        let id = document.doc_id();

        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        writer.delete_term(Term::from_field_text(self.schema.doc_id, &id));
        writer.add_document(doc)?;

        debug!(doc_id = %id, fields = document.fields.len(), "Upserted document");
        Ok(())
    }

    /// Remove the document for an entity. Removing an absent document is a no-op.
    pub fn purge(&self, entity_type: &str, entity_id: u64) -> Result<(), SearchError> {
        let id = doc_id(entity_type, entity_id);
        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        writer.delete_term(Term::from_field_text(self.schema.doc_id, &id));

        debug!(doc_id = %id, "Purged document");
        Ok(())
    }

    /// Remove every document of one entity type.
    pub fn purge_type(&self, entity_type: &str) -> Result<(), SearchError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        writer.delete_term(Term::from_field_text(self.schema.entity_type, entity_type));

        info!(entity_type, "Purged all documents of type");
        Ok(())
    }

    /// Remove every document.
    pub fn purge_all(&self) -> Result<(), SearchError> {
        let writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        writer.delete_all_documents()?;

        info!("Purged all documents");
        Ok(())
    }

    /// Commit pending changes to make them searchable.
    pub fn commit(&self) -> Result<u64, SearchError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        let opstamp = writer.commit()?;
        debug!(opstamp, "Committed index changes");
        Ok(opstamp)
    }

    /// Rollback uncommitted changes.
    pub fn rollback(&self) -> Result<u64, SearchError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| SearchError::IndexLocked(e.to_string()))?;

        let opstamp = writer.rollback()?;
        warn!(opstamp, "Rolled back index changes");
        Ok(opstamp)
    }
}
