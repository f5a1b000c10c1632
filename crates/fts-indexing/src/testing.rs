//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use fts_types::{
    Details, Document, Entity, EntityKind, EntityRef, Experimenter, Group, LogRecord,
};

use crate::checkpoint::CursorCheckpoint;
use crate::error::IndexingError;
use crate::store::{CursorStore, EventLogStore, ObjectStore, SearchEngine};

pub fn sample_details() -> Details {
    Details {
        owner: Experimenter {
            id: 2,
            user_name: "jdoe".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
        },
        group: Group {
            id: 3,
            name: "lab".to_string(),
        },
        created: Utc.timestamp_millis_opt(1_706_540_400_000).unwrap(),
        updated: Utc.timestamp_millis_opt(1_706_540_500_000).unwrap(),
        permissions: "rwr---".to_string(),
    }
}

#[derive(Default)]
pub struct MemoryLog {
    records: Mutex<Vec<LogRecord>>,
    unavailable: AtomicBool,
}

impl MemoryLog {
    /// Make `select_after` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn push(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }

    /// Append with the next sequence id.
    pub fn append(&self, entity_type: &str, entity_id: u64, action: fts_types::Action) -> u64 {
        let mut records = self.records.lock().unwrap();
        let seq = records.last().map(|r| r.sequence_id).unwrap_or(0) + 1;
        records.push(LogRecord::new(seq, entity_type, entity_id, action));
        seq
    }
}

impl EventLogStore for MemoryLog {
    fn select_after(&self, after: u64, limit: usize) -> Result<Vec<LogRecord>, IndexingError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(fts_storage::StorageError::Lock("log unavailable".to_string()).into());
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.sequence_id > after)
            .take(limit)
            .cloned()
            .collect())
    }

    fn max_sequence(&self) -> Result<u64, IndexingError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.sequence_id)
            .max()
            .unwrap_or(0))
    }

    fn count_after(&self, after: u64) -> Result<u64, IndexingError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.sequence_id > after)
            .count() as u64)
    }

    fn count(&self) -> Result<u64, IndexingError> {
        Ok(self.records.lock().unwrap().len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryCursors {
    checkpoints: Mutex<HashMap<String, CursorCheckpoint>>,
    read_only: AtomicBool,
}

impl MemoryCursors {
    /// Make `set` fail until switched back.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl CursorStore for MemoryCursors {
    fn get(&self, key: &str) -> Result<Option<CursorCheckpoint>, IndexingError> {
        Ok(self.checkpoints.lock().unwrap().get(key).cloned())
    }

    fn set(&self, checkpoint: &CursorCheckpoint) -> Result<(), IndexingError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(fts_storage::StorageError::Lock("cursor store read-only".to_string()).into());
        }
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint.key.clone(), checkpoint.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjects {
    entities: Mutex<BTreeMap<EntityRef, Entity>>,
    parents: Mutex<HashMap<u64, Vec<EntityRef>>>,
    failing: Mutex<HashSet<EntityRef>>,
}

impl MemoryObjects {
    pub fn insert(&self, entity: Entity) {
        self.entities
            .lock()
            .unwrap()
            .insert(entity.entity_ref(), entity);
    }

    /// Insert an entity with only sample details.
    pub fn insert_bare(&self, entity: EntityRef) {
        self.insert(Entity::new(entity.kind, entity.id, sample_details()));
    }

    pub fn remove(&self, entity: EntityRef) {
        self.entities.lock().unwrap().remove(&entity);
    }

    pub fn link(&self, parent: EntityRef, annotation_id: u64) {
        self.parents
            .lock()
            .unwrap()
            .entry(annotation_id)
            .or_default()
            .push(parent);
    }

    /// Make `fetch_by_id` fail for an entity.
    pub fn fail_fetch(&self, entity: EntityRef) {
        self.failing.lock().unwrap().insert(entity);
    }
}

impl ObjectStore for MemoryObjects {
    fn fetch_by_id(&self, kind: EntityKind, id: u64) -> Result<Option<Entity>, IndexingError> {
        let key = EntityRef::new(kind, id);
        if self.failing.lock().unwrap().contains(&key) {
            return Err(fts_storage::StorageError::Serialization(format!("corrupt {}", key)).into());
        }
        Ok(self.entities.lock().unwrap().get(&key).cloned())
    }

    fn enumerate_ids(
        &self,
        kind: EntityKind,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<u64>, IndexingError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .keys()
            .filter(|r| r.kind == kind && after.map_or(true, |a| r.id > a))
            .map(|r| r.id)
            .take(limit)
            .collect())
    }

    fn last_id(&self, kind: EntityKind) -> Result<Option<u64>, IndexingError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .keys()
            .filter(|r| r.kind == kind)
            .map(|r| r.id)
            .max())
    }

    fn count_ids(&self, kind: EntityKind, after: Option<u64>) -> Result<u64, IndexingError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .keys()
            .filter(|r| r.kind == kind && after.map_or(true, |a| r.id > a))
            .count() as u64)
    }

    fn annotation_parents(&self, annotation_id: u64) -> Result<Vec<EntityRef>, IndexingError> {
        Ok(self
            .parents
            .lock()
            .unwrap()
            .get(&annotation_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Operation recorded by [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOp {
    Upsert(String),
    Purge(String),
    PurgeType(String),
    PurgeAll,
    Flush,
}

#[derive(Default)]
pub struct MemoryEngine {
    documents: Mutex<BTreeMap<String, Document>>,
    ops: Mutex<Vec<EngineOp>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryEngine {
    pub fn document(&self, doc_id: &str) -> Option<Document> {
        self.documents.lock().unwrap().get(doc_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    pub fn ops(&self) -> Vec<EngineOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Make `upsert` fail for a document id.
    pub fn fail_upsert(&self, doc_id: &str) {
        self.failing.lock().unwrap().insert(doc_id.to_string());
    }
}

impl SearchEngine for MemoryEngine {
    fn upsert(&self, document: &Document) -> Result<(), IndexingError> {
        let id = document.doc_id();
        if self.failing.lock().unwrap().contains(&id) {
            return Err(IndexingError::Bridge(format!("upsert of {} rejected", id)));
        }
        self.ops.lock().unwrap().push(EngineOp::Upsert(id.clone()));
        self.documents.lock().unwrap().insert(id, document.clone());
        Ok(())
    }

    fn purge(&self, entity_type: &str, entity_id: u64) -> Result<(), IndexingError> {
        let id = fts_types::doc_id(entity_type, entity_id);
        self.ops.lock().unwrap().push(EngineOp::Purge(id.clone()));
        self.documents.lock().unwrap().remove(&id);
        Ok(())
    }

    fn purge_type(&self, entity_type: &str) -> Result<(), IndexingError> {
        self.ops
            .lock()
            .unwrap()
            .push(EngineOp::PurgeType(entity_type.to_string()));
        self.documents
            .lock()
            .unwrap()
            .retain(|_, doc| doc.entity_type != entity_type);
        Ok(())
    }

    fn purge_all(&self) -> Result<(), IndexingError> {
        self.ops.lock().unwrap().push(EngineOp::PurgeAll);
        self.documents.lock().unwrap().clear();
        Ok(())
    }

    fn flush(&self) -> Result<(), IndexingError> {
        self.ops.lock().unwrap().push(EngineOp::Flush);
        Ok(())
    }
}
