//! Collaborator seams used by the indexer.
//!
//! The pipeline only talks to the primary store, the event log, the cursor
//! store and the search engine through these traits. `fts_storage::Storage`
//! and `fts_search::SearchIndexer` implement them for production use; tests
//! substitute in-memory fakes.

use std::sync::Arc;

use fts_search::SearchIndexer;
use fts_storage::Storage;
use fts_types::{Document, Entity, EntityKind, EntityRef, LogRecord};

use crate::checkpoint::CursorCheckpoint;
use crate::error::IndexingError;

/// Read side of the event log.
pub trait EventLogStore: Send + Sync {
    /// Records with sequence id greater than `after`, ascending, at most `limit`.
    fn select_after(&self, after: u64, limit: usize) -> Result<Vec<LogRecord>, IndexingError>;

    /// Highest sequence id in the log (0 when empty).
    fn max_sequence(&self) -> Result<u64, IndexingError>;

    /// Number of records with sequence id greater than `after`.
    fn count_after(&self, after: u64) -> Result<u64, IndexingError>;

    /// Total number of records.
    fn count(&self) -> Result<u64, IndexingError>;
}

/// Read side of the primary object store.
pub trait ObjectStore: Send + Sync {
    /// Current snapshot of an entity, None if it no longer exists.
    fn fetch_by_id(&self, kind: EntityKind, id: u64) -> Result<Option<Entity>, IndexingError>;

    /// Ids of one kind greater than `after`, ascending, at most `limit`.
    fn enumerate_ids(
        &self,
        kind: EntityKind,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<u64>, IndexingError>;

    /// Highest id of one kind, None when there are none.
    fn last_id(&self, kind: EntityKind) -> Result<Option<u64>, IndexingError>;

    /// Number of ids of one kind greater than `after`.
    fn count_ids(&self, kind: EntityKind, after: Option<u64>) -> Result<u64, IndexingError>;

    /// Every entity an annotation is linked to.
    fn annotation_parents(&self, annotation_id: u64) -> Result<Vec<EntityRef>, IndexingError>;
}

/// Write side of the search engine.
pub trait SearchEngine: Send + Sync {
    /// Insert or fully replace the document keyed by its type and id.
    fn upsert(&self, document: &Document) -> Result<(), IndexingError>;

    /// Remove a document. Removing an absent document succeeds.
    fn purge(&self, entity_type: &str, entity_id: u64) -> Result<(), IndexingError>;

    /// Remove every document of one type.
    fn purge_type(&self, entity_type: &str) -> Result<(), IndexingError>;

    /// Remove every document.
    fn purge_all(&self) -> Result<(), IndexingError>;

    /// Make preceding changes durable and visible.
    fn flush(&self) -> Result<(), IndexingError>;
}

/// Persistence for cursor watermarks.
pub trait CursorStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CursorCheckpoint>, IndexingError>;

    fn set(&self, checkpoint: &CursorCheckpoint) -> Result<(), IndexingError>;
}

/// Turns pending relationship-change markers into event-log records.
pub trait ChangeMarkerSink: Send + Sync {
    /// Returns the number of markers flushed.
    fn flush_markers(&self) -> Result<usize, IndexingError>;
}

/// The collaborators one indexer works against.
#[derive(Clone)]
pub struct IndexStores {
    pub log: Arc<dyn EventLogStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub cursors: Arc<dyn CursorStore>,
    pub engine: Arc<dyn SearchEngine>,
}

impl IndexStores {
    /// Log, objects and cursors all served by one RocksDB store.
    pub fn from_storage(storage: Arc<Storage>, engine: Arc<dyn SearchEngine>) -> Self {
        Self {
            log: storage.clone(),
            objects: storage.clone(),
            cursors: storage,
            engine,
        }
    }
}

impl EventLogStore for Storage {
    fn select_after(&self, after: u64, limit: usize) -> Result<Vec<LogRecord>, IndexingError> {
        Ok(self.get_log_after(after, limit)?)
    }

    fn max_sequence(&self) -> Result<u64, IndexingError> {
        Ok(Storage::max_sequence(self)?)
    }

    fn count_after(&self, after: u64) -> Result<u64, IndexingError> {
        Ok(self.count_log_after(after)?)
    }

    fn count(&self) -> Result<u64, IndexingError> {
        Ok(self.count_log()?)
    }
}

impl ObjectStore for Storage {
    fn fetch_by_id(&self, kind: EntityKind, id: u64) -> Result<Option<Entity>, IndexingError> {
        Ok(self.get_entity(kind, id)?)
    }

    fn enumerate_ids(
        &self,
        kind: EntityKind,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<u64>, IndexingError> {
        Ok(self.entity_ids_after(kind, after, limit)?)
    }

    fn last_id(&self, kind: EntityKind) -> Result<Option<u64>, IndexingError> {
        Ok(self.last_entity_id(kind)?)
    }

    fn count_ids(&self, kind: EntityKind, after: Option<u64>) -> Result<u64, IndexingError> {
        Ok(self.count_entities_after(kind, after)?)
    }

    fn annotation_parents(&self, annotation_id: u64) -> Result<Vec<EntityRef>, IndexingError> {
        Ok(Storage::annotation_parents(self, annotation_id)?)
    }
}

impl CursorStore for Storage {
    fn get(&self, key: &str) -> Result<Option<CursorCheckpoint>, IndexingError> {
        match self.get_checkpoint(key)? {
            Some(bytes) => Ok(Some(CursorCheckpoint::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, checkpoint: &CursorCheckpoint) -> Result<(), IndexingError> {
        self.put_checkpoint(&checkpoint.key, &checkpoint.to_bytes()?)?;
        Ok(())
    }
}

impl ChangeMarkerSink for Storage {
    fn flush_markers(&self) -> Result<usize, IndexingError> {
        Ok(self.flush_pending_markers()?)
    }
}

impl SearchEngine for SearchIndexer {
    fn upsert(&self, document: &Document) -> Result<(), IndexingError> {
        Ok(SearchIndexer::upsert(self, document)?)
    }

    fn purge(&self, entity_type: &str, entity_id: u64) -> Result<(), IndexingError> {
        Ok(SearchIndexer::purge(self, entity_type, entity_id)?)
    }

    fn purge_type(&self, entity_type: &str) -> Result<(), IndexingError> {
        Ok(SearchIndexer::purge_type(self, entity_type)?)
    }

    fn purge_all(&self) -> Result<(), IndexingError> {
        Ok(SearchIndexer::purge_all(self)?)
    }

    fn flush(&self) -> Result<(), IndexingError> {
        self.commit()?;
        Ok(())
    }
}
