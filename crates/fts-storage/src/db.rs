//! RocksDB wrapper for the indexer's primary store.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Atomic write batches (entity snapshot + event log record)
//! - Annotation linking with pending change markers for the parent
//! - Marker flush into REINDEX log records in one write batch
//! - Log range reads and cursor checkpoints

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use fts_types::{Action, Annotation, Entity, EntityKind, EntityRef, LogRecord};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_ANNOTATION_LINKS, CF_CHECKPOINTS, CF_ENTITIES,
    CF_EVENT_LOG, CF_MARKERS,
};
use crate::error::StorageError;
use crate::keys::{CheckpointKey, EntityKey, LinkKey, LogKey, MarkerKey};

/// Main storage interface for the indexer
pub struct Storage {
    db: DB,
    /// Next event log sequence number (first record is 1)
    log_sequence: AtomicU64,
    /// Serializes writers so log records commit in sequence order
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let log_sequence = Self::load_log_sequence(&db)?;

        Ok(Self {
            db,
            log_sequence: AtomicU64::new(log_sequence),
            write_lock: Mutex::new(()),
        })
    }

    /// Load the next log sequence number from the highest existing key
    fn load_log_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_EVENT_LOG)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_EVENT_LOG.to_string()))?;

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            let log_key = LogKey::from_bytes(&key)?;
            return Ok(log_key.sequence + 1);
        }
        Ok(1)
    }

    fn next_log_sequence(&self) -> u64 {
        self.log_sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.write_lock
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Stage a log record in the batch and return its sequence number
    fn stage_log_record(
        &self,
        batch: &mut WriteBatch,
        entity_type: &str,
        entity_id: u64,
        action: Action,
    ) -> Result<u64, StorageError> {
        let sequence = self.next_log_sequence();
        let record = LogRecord::new(sequence, entity_type, entity_id, action);
        batch.put_cf(self.cf(CF_EVENT_LOG)?, LogKey::new(sequence).to_bytes(), record.to_bytes()?);
        Ok(sequence)
    }

    // ==================== Producer Methods ====================

    /// Store an entity snapshot with an atomic event log record.
    ///
    /// When the entity is an annotation, the embedded copy held by every
    /// linked parent is refreshed in the same batch.
    ///
    /// Returns the sequence number of the log record.
    pub fn put_entity(&self, entity: &Entity, action: Action) -> Result<u64, StorageError> {
        let _guard = self.lock_writes()?;
        let entities_cf = self.cf(CF_ENTITIES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            entities_cf,
            EntityKey::new(entity.kind, entity.id).to_bytes(),
            entity.to_bytes()?,
        );

        if let Some(body) = entity.body.as_ref().filter(|_| entity.kind.is_annotation()) {
            for parent_ref in self.annotation_parents(entity.id)? {
                let Some(mut parent) = self.get_entity(parent_ref.kind, parent_ref.id)? else {
                    continue;
                };
                for annotation in parent.annotations.iter_mut().filter(|a| a.id == entity.id) {
                    annotation.body = body.clone();
                }
                batch.put_cf(
                    entities_cf,
                    EntityKey::new(parent.kind, parent.id).to_bytes(),
                    parent.to_bytes()?,
                );
            }
        }

        let sequence = self.stage_log_record(&mut batch, entity.kind.as_str(), entity.id, action)?;
        self.db.write(batch)?;
        debug!(entity = %entity.entity_ref(), sequence, "Stored entity");
        Ok(sequence)
    }

    /// Delete an entity and log a DELETE record.
    ///
    /// Deleting an annotation detaches it from every parent and leaves a
    /// change marker for each. Deleting an entity that does not exist still
    /// logs the record, so downstream purges stay idempotent.
    pub fn delete_entity(&self, kind: EntityKind, id: u64) -> Result<u64, StorageError> {
        let _guard = self.lock_writes()?;
        let entities_cf = self.cf(CF_ENTITIES)?;
        let links_cf = self.cf(CF_ANNOTATION_LINKS)?;
        let markers_cf = self.cf(CF_MARKERS)?;
        let this = EntityRef::new(kind, id);

        let mut batch = WriteBatch::default();

        if kind.is_annotation() {
            for parent_ref in self.annotation_parents(id)? {
                if let Some(mut parent) = self.get_entity(parent_ref.kind, parent_ref.id)? {
                    parent.annotations.retain(|a| a.id != id);
                    batch.put_cf(
                        entities_cf,
                        EntityKey::new(parent.kind, parent.id).to_bytes(),
                        parent.to_bytes()?,
                    );
                }
                batch.delete_cf(links_cf, LinkKey::new(id, parent_ref).to_bytes());
                batch.put_cf(markers_cf, MarkerKey::new(parent_ref).to_bytes(), b"");
            }
        } else if let Some(existing) = self.get_entity(kind, id)? {
            for annotation in &existing.annotations {
                batch.delete_cf(links_cf, LinkKey::new(annotation.id, this).to_bytes());
            }
        }

        batch.delete_cf(entities_cf, EntityKey::new(kind, id).to_bytes());
        let sequence = self.stage_log_record(&mut batch, kind.as_str(), id, Action::Delete)?;
        self.db.write(batch)?;
        debug!(entity = %this, sequence, "Deleted entity");
        Ok(sequence)
    }

    /// Link an existing annotation to a parent entity.
    ///
    /// Relationship edits do not produce a log record directly; a pending
    /// change marker for the parent is written instead and turned into a
    /// REINDEX record by [`Storage::flush_pending_markers`].
    pub fn link_annotation(
        &self,
        parent: EntityRef,
        annotation_id: u64,
        ns: Option<&str>,
    ) -> Result<(), StorageError> {
        let _guard = self.lock_writes()?;

        let mut parent_entity = self
            .get_entity(parent.kind, parent.id)?
            .ok_or_else(|| StorageError::NotFound(parent.to_string()))?;
        let body = self
            .find_annotation_body(annotation_id)?
            .ok_or_else(|| StorageError::NotFound(format!("annotation {}", annotation_id)))?;

        let mut annotation = Annotation::new(annotation_id, body);
        annotation.ns = ns.map(str::to_string);

        match parent_entity
            .annotations
            .iter_mut()
            .find(|a| a.id == annotation_id)
        {
            Some(existing) => *existing = annotation,
            None => parent_entity.annotations.push(annotation),
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ENTITIES)?,
            EntityKey::new(parent.kind, parent.id).to_bytes(),
            parent_entity.to_bytes()?,
        );
        batch.put_cf(
            self.cf(CF_ANNOTATION_LINKS)?,
            LinkKey::new(annotation_id, parent).to_bytes(),
            b"",
        );
        batch.put_cf(self.cf(CF_MARKERS)?, MarkerKey::new(parent).to_bytes(), b"");
        self.db.write(batch)?;

        debug!(parent = %parent, annotation_id, "Linked annotation");
        Ok(())
    }

    /// Remove an annotation link. Returns false if the link did not exist.
    pub fn unlink_annotation(
        &self,
        parent: EntityRef,
        annotation_id: u64,
    ) -> Result<bool, StorageError> {
        let _guard = self.lock_writes()?;

        let Some(mut parent_entity) = self.get_entity(parent.kind, parent.id)? else {
            return Ok(false);
        };
        let before = parent_entity.annotations.len();
        parent_entity.annotations.retain(|a| a.id != annotation_id);
        if parent_entity.annotations.len() == before {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ENTITIES)?,
            EntityKey::new(parent.kind, parent.id).to_bytes(),
            parent_entity.to_bytes()?,
        );
        batch.delete_cf(
            self.cf(CF_ANNOTATION_LINKS)?,
            LinkKey::new(annotation_id, parent).to_bytes(),
        );
        batch.put_cf(self.cf(CF_MARKERS)?, MarkerKey::new(parent).to_bytes(), b"");
        self.db.write(batch)?;

        debug!(parent = %parent, annotation_id, "Unlinked annotation");
        Ok(true)
    }

    /// Append a bare log record, e.g. an explicit REINDEX request.
    pub fn append_log(
        &self,
        entity_type: &str,
        entity_id: u64,
        action: Action,
    ) -> Result<u64, StorageError> {
        let _guard = self.lock_writes()?;
        let mut batch = WriteBatch::default();
        let sequence = self.stage_log_record(&mut batch, entity_type, entity_id, action)?;
        self.db.write(batch)?;
        Ok(sequence)
    }

    /// Append a log value encoded by the producer itself.
    ///
    /// The bytes are stored as given. Readers tolerate values that do not
    /// decode, see [`Storage::get_log_after`].
    pub fn append_raw_log(&self, value: &[u8]) -> Result<u64, StorageError> {
        let _guard = self.lock_writes()?;
        let sequence = self.next_log_sequence();
        self.db
            .put_cf(self.cf(CF_EVENT_LOG)?, LogKey::new(sequence).to_bytes(), value)?;
        Ok(sequence)
    }

    /// Convert every pending change marker into a REINDEX log record.
    ///
    /// All records are written and all markers removed in one batch.
    /// Returns the number of markers flushed.
    pub fn flush_pending_markers(&self) -> Result<usize, StorageError> {
        let _guard = self.lock_writes()?;
        let markers_cf = self.cf(CF_MARKERS)?;

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for item in self.db.iterator_cf(markers_cf, IteratorMode::Start) {
            let (key, _) = item?;
            let marker = MarkerKey::from_bytes(&key)?;
            self.stage_log_record(
                &mut batch,
                marker.target.kind.as_str(),
                marker.target.id,
                Action::Reindex,
            )?;
            batch.delete_cf(markers_cf, &key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
            info!(count, "Flushed pending change markers");
        }
        Ok(count)
    }

    /// Entities with a pending change marker
    pub fn pending_markers(&self) -> Result<Vec<EntityRef>, StorageError> {
        let mut targets = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_MARKERS)?, IteratorMode::Start) {
            let (key, _) = item?;
            targets.push(MarkerKey::from_bytes(&key)?.target);
        }
        Ok(targets)
    }

    // ==================== Object Reads ====================

    /// Get an entity snapshot
    pub fn get_entity(&self, kind: EntityKind, id: u64) -> Result<Option<Entity>, StorageError> {
        match self
            .db
            .get_cf(self.cf(CF_ENTITIES)?, EntityKey::new(kind, id).to_bytes())?
        {
            Some(bytes) => Ok(Some(Entity::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All ids of one kind, ascending
    pub fn entity_ids(&self, kind: EntityKind) -> Result<Vec<u64>, StorageError> {
        self.entity_ids_after(kind, None, usize::MAX)
    }

    /// Ids of one kind greater than `after` (all ids when None), ascending,
    /// at most `limit`
    pub fn entity_ids_after(
        &self,
        kind: EntityKind,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<u64>, StorageError> {
        let prefix = EntityKey::kind_prefix(kind);
        let start = match after {
            Some(id) if id == u64::MAX => return Ok(Vec::new()),
            Some(id) => EntityKey::new(kind, id + 1).to_bytes(),
            None => prefix.clone(),
        };
        let iter = self.db.iterator_cf(
            self.cf(CF_ENTITIES)?,
            IteratorMode::From(&start, Direction::Forward),
        );

        let mut ids = Vec::new();
        for item in iter {
            if ids.len() >= limit {
                break;
            }
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(EntityKey::from_bytes(&key)?.id);
        }
        Ok(ids)
    }

    /// Highest id of one kind, None when the kind has no entities
    pub fn last_entity_id(&self, kind: EntityKind) -> Result<Option<u64>, StorageError> {
        let prefix = EntityKey::kind_prefix(kind);
        let upper = EntityKey::new(kind, u64::MAX).to_bytes();
        let mut iter = self.db.iterator_cf(
            self.cf(CF_ENTITIES)?,
            IteratorMode::From(&upper, Direction::Reverse),
        );
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                if key.starts_with(&prefix) {
                    Ok(Some(EntityKey::from_bytes(&key)?.id))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Number of entities of one kind with id greater than `after`
    pub fn count_entities_after(
        &self,
        kind: EntityKind,
        after: Option<u64>,
    ) -> Result<u64, StorageError> {
        let prefix = EntityKey::kind_prefix(kind);
        let start = match after {
            Some(id) if id == u64::MAX => return Ok(0),
            Some(id) => EntityKey::new(kind, id + 1).to_bytes(),
            None => prefix.clone(),
        };
        let iter = self.db.iterator_cf(
            self.cf(CF_ENTITIES)?,
            IteratorMode::From(&start, Direction::Forward),
        );

        let mut count = 0u64;
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Every parent an annotation is linked to
    pub fn annotation_parents(&self, annotation_id: u64) -> Result<Vec<EntityRef>, StorageError> {
        let prefix = LinkKey::annotation_prefix(annotation_id);
        let iter = self.db.iterator_cf(
            self.cf(CF_ANNOTATION_LINKS)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut parents = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            parents.push(LinkKey::from_bytes(&key)?.parent);
        }
        Ok(parents)
    }

    /// Annotation ids are unique across annotation kinds
    fn find_annotation_body(
        &self,
        annotation_id: u64,
    ) -> Result<Option<fts_types::AnnotationBody>, StorageError> {
        for kind in EntityKind::ALL.iter().filter(|k| k.is_annotation()) {
            if let Some(entity) = self.get_entity(*kind, annotation_id)? {
                if let Some(body) = entity.body {
                    return Ok(Some(body));
                }
                warn!(annotation = %entity.entity_ref(), "Annotation entity has no body");
            }
        }
        Ok(None)
    }

    // ==================== Event Log Reads ====================

    /// Log records with sequence greater than `after`, ascending, at most `limit`.
    ///
    /// A value that does not decode comes back as a record with an empty
    /// entity type, so the reader consumes its position and moves on.
    pub fn get_log_after(&self, after: u64, limit: usize) -> Result<Vec<LogRecord>, StorageError> {
        let start_key = LogKey::new(after.saturating_add(1));
        let iter = self.db.iterator_cf(
            self.cf(CF_EVENT_LOG)?,
            IteratorMode::From(&start_key.to_bytes(), Direction::Forward),
        );

        let mut results = Vec::new();
        for item in iter.take(limit) {
            let (key, value) = item?;
            let sequence = LogKey::from_bytes(&key)?.sequence;
            match LogRecord::from_bytes(&value) {
                Ok(mut record) => {
                    record.sequence_id = sequence;
                    results.push(record);
                }
                Err(e) => {
                    warn!(sequence, error = %e, "Undecodable log record, skipping");
                    results.push(LogRecord::new(
                        sequence,
                        "",
                        0,
                        Action::Other("undecodable".to_string()),
                    ));
                }
            }
        }
        Ok(results)
    }

    /// Highest sequence number in the log, 0 when empty
    pub fn max_sequence(&self) -> Result<u64, StorageError> {
        let mut iter = self.db.iterator_cf(self.cf(CF_EVENT_LOG)?, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            return Ok(LogKey::from_bytes(&key)?.sequence);
        }
        Ok(0)
    }

    /// Number of log records with sequence greater than `after`
    pub fn count_log_after(&self, after: u64) -> Result<u64, StorageError> {
        let start_key = LogKey::new(after.saturating_add(1));
        let iter = self.db.iterator_cf(
            self.cf(CF_EVENT_LOG)?,
            IteratorMode::From(&start_key.to_bytes(), Direction::Forward),
        );
        let mut count = 0u64;
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Total number of log records
    pub fn count_log(&self) -> Result<u64, StorageError> {
        self.count_cf_entries(self.cf(CF_EVENT_LOG)?)
    }

    // ==================== Checkpoints ====================

    /// Store a cursor checkpoint
    pub fn put_checkpoint(&self, name: &str, checkpoint_bytes: &[u8]) -> Result<(), StorageError> {
        let key = CheckpointKey::new(name);
        self.db
            .put_cf(self.cf(CF_CHECKPOINTS)?, key.to_bytes(), checkpoint_bytes)?;
        Ok(())
    }

    /// Get a cursor checkpoint
    pub fn get_checkpoint(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = CheckpointKey::new(name);
        let result = self.db.get_cf(self.cf(CF_CHECKPOINTS)?, key.to_bytes())?;
        Ok(result)
    }

    // ===== Admin Operations =====

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            self.db.flush_cf(self.cf(cf_name)?)?;
        }
        Ok(())
    }

    /// Trigger manual compaction on all column families.
    pub fn compact(&self) -> Result<(), StorageError> {
        info!("Starting full compaction...");
        for cf_name in ALL_CF_NAMES {
            self.db
                .compact_range_cf::<&[u8], &[u8]>(self.cf(cf_name)?, None, None);
        }
        info!("Compaction complete");
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            entity_count: self.count_cf_entries(self.cf(CF_ENTITIES)?)?,
            log_count: self.count_cf_entries(self.cf(CF_EVENT_LOG)?)?,
            link_count: self.count_cf_entries(self.cf(CF_ANNOTATION_LINKS)?)?,
            pending_marker_count: self.count_cf_entries(self.cf(CF_MARKERS)?)?,
            max_sequence: self.max_sequence()?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        let iter = self.db.iterator_cf(cf, IteratorMode::Start);
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        let mut total_size = 0u64;
        if let Ok(entries) = std::fs::read_dir(self.db.path()) {
            for entry in entries.flatten() {
                if let Ok(metadata) = entry.metadata() {
                    total_size += metadata.len();
                }
            }
        }
        total_size
    }
}

/// Statistics about the storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of entity snapshots
    pub entity_count: u64,
    /// Number of event log records
    pub log_count: u64,
    /// Number of annotation links
    pub link_count: u64,
    /// Number of change markers awaiting flush
    pub pending_marker_count: u64,
    /// Highest log sequence number
    pub max_sequence: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
