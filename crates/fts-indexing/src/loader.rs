//! Cursor loaders: where the indexer's work comes from.
//!
//! A loader hands out log records in ascending sequence order starting just
//! after its persisted watermark. The watermark only moves when the indexer
//! calls [`CursorLoader::advance`] after a batch has been applied, so a
//! crash mid-batch replays the batch on the next run.
//!
//! Two implementations:
//! - [`EventLogLoader`] reads the producer-written event log.
//! - [`FullScanLoader`] enumerates every stored entity of the configured
//!   kinds and synthesises one `Update` record per entity. Used for rebuilds.

use std::sync::Arc;

use tracing::{debug, info, warn};

use fts_types::{Action, EntityKind, LogRecord};

use crate::checkpoint::CursorCheckpoint;
use crate::error::IndexingError;
use crate::store::{CursorStore, EventLogStore, ObjectStore};

/// Source of ordered log records with a persisted watermark.
pub trait CursorLoader: Send {
    /// Cursor key the watermark is persisted under
    fn key(&self) -> &str;

    /// Up to `max` records after the watermark, ascending, without gaps
    /// other than ids the source never produced.
    fn next_batch(&mut self, max: usize) -> Result<Vec<LogRecord>, IndexingError>;

    /// Estimate of records remaining after the watermark.
    fn backlog_size(&self) -> Result<u64, IndexingError>;

    /// Persist a new watermark after a batch was applied.
    fn advance(&mut self, watermark: u64) -> Result<(), IndexingError>;

    /// Administrative reset of the watermark.
    fn reset(&mut self, watermark: u64) -> Result<(), IndexingError>;

    /// Current watermark
    fn watermark(&self) -> u64;

    /// Highest sequence id the source currently knows about.
    fn highest_sequence(&self) -> Result<u64, IndexingError>;

    /// Fraction of the source at or below the watermark, counted exactly.
    fn exact_progress(&self) -> Result<f64, IndexingError>;
}

fn load_checkpoint(cursors: &dyn CursorStore, key: &str) -> Result<CursorCheckpoint, IndexingError> {
    match cursors.get(key)? {
        Some(cp) => {
            info!(key, watermark = cp.watermark, "Loaded cursor");
            Ok(cp)
        }
        None => {
            debug!(key, "No existing cursor, starting from 0");
            Ok(CursorCheckpoint::new(key))
        }
    }
}

fn ratio(done: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    }
}

/// Loader over the producer-written event log.
pub struct EventLogLoader {
    log: Arc<dyn EventLogStore>,
    cursors: Arc<dyn CursorStore>,
    checkpoint: CursorCheckpoint,
    /// Sequence ids handed out by the last `next_batch`
    outstanding: Vec<u64>,
}

impl EventLogLoader {
    /// Open the loader, loading the persisted watermark for `key`.
    pub fn open(
        log: Arc<dyn EventLogStore>,
        cursors: Arc<dyn CursorStore>,
        key: &str,
    ) -> Result<Self, IndexingError> {
        let checkpoint = load_checkpoint(cursors.as_ref(), key)?;
        Ok(Self {
            log,
            cursors,
            checkpoint,
            outstanding: Vec::new(),
        })
    }

    pub fn checkpoint(&self) -> &CursorCheckpoint {
        &self.checkpoint
    }
}

impl CursorLoader for EventLogLoader {
    fn key(&self) -> &str {
        &self.checkpoint.key
    }

    fn next_batch(&mut self, max: usize) -> Result<Vec<LogRecord>, IndexingError> {
        let records = self.log.select_after(self.checkpoint.watermark, max.max(1))?;
        self.outstanding = records.iter().map(|r| r.sequence_id).collect();
        Ok(records)
    }

    fn backlog_size(&self) -> Result<u64, IndexingError> {
        self.log.count_after(self.checkpoint.watermark)
    }

    fn advance(&mut self, watermark: u64) -> Result<(), IndexingError> {
        let applied = self
            .outstanding
            .iter()
            .filter(|seq| **seq <= watermark)
            .count() as u64;
        let mut next = self.checkpoint.clone();
        next.update(watermark, applied);
        self.cursors.set(&next)?;
        self.checkpoint = next;
        self.outstanding.clear();
        debug!(key = %self.checkpoint.key, watermark, "Advanced cursor");
        Ok(())
    }

    fn reset(&mut self, watermark: u64) -> Result<(), IndexingError> {
        let mut next = self.checkpoint.clone();
        next.update(watermark, 0);
        self.cursors.set(&next)?;
        self.checkpoint = next;
        self.outstanding.clear();
        info!(key = %self.checkpoint.key, watermark, "Reset cursor");
        Ok(())
    }

    fn watermark(&self) -> u64 {
        self.checkpoint.watermark
    }

    fn highest_sequence(&self) -> Result<u64, IndexingError> {
        self.log.max_sequence()
    }

    fn exact_progress(&self) -> Result<f64, IndexingError> {
        let total = self.log.count()?;
        let remaining = self.log.count_after(self.checkpoint.watermark)?;
        Ok(ratio(total.saturating_sub(remaining), total))
    }
}

/// Bits of a full-scan sequence id reserved for the entity id.
const ID_BITS: u32 = 48;
const ID_MASK: u64 = (1 << ID_BITS) - 1;

/// Encode a (kind, id) pair as an ascending full-scan sequence id.
///
/// Kinds are ordered by their position in `EntityKind::ALL`, offset by one
/// so that no real entity maps to sequence 0.
pub fn full_scan_sequence(kind: EntityKind, id: u64) -> Option<u64> {
    if id > ID_MASK {
        return None;
    }
    let position = EntityKind::ALL.iter().position(|k| *k == kind)? as u64 + 1;
    Some((position << ID_BITS) | id)
}

/// Decode a full-scan sequence id back into (kind, id).
pub fn decode_full_scan_sequence(sequence: u64) -> Option<(EntityKind, u64)> {
    let position = (sequence >> ID_BITS) as usize;
    if position == 0 {
        return None;
    }
    let kind = *EntityKind::ALL.get(position - 1)?;
    Some((kind, sequence & ID_MASK))
}

/// Loader that walks every stored entity of the configured kinds.
pub struct FullScanLoader {
    objects: Arc<dyn ObjectStore>,
    cursors: Arc<dyn CursorStore>,
    checkpoint: CursorCheckpoint,
    /// Configured kinds in `EntityKind::ALL` order
    kinds: Vec<EntityKind>,
    outstanding: Vec<u64>,
    /// Entities above the watermark, counted on open and reset
    remaining: u64,
}

impl FullScanLoader {
    /// Open the loader, loading the persisted watermark for `key`.
    pub fn open(
        objects: Arc<dyn ObjectStore>,
        cursors: Arc<dyn CursorStore>,
        key: &str,
        kinds: &[EntityKind],
    ) -> Result<Self, IndexingError> {
        let checkpoint = load_checkpoint(cursors.as_ref(), key)?;
        let mut kinds: Vec<EntityKind> = kinds.to_vec();
        kinds.sort_by_key(|k| EntityKind::ALL.iter().position(|a| a == k));
        kinds.dedup();
        let mut loader = Self {
            objects,
            cursors,
            checkpoint,
            kinds,
            outstanding: Vec::new(),
            remaining: 0,
        };
        loader.remaining = loader.count_remaining()?;
        Ok(loader)
    }

    pub fn kinds(&self) -> &[EntityKind] {
        &self.kinds
    }

    /// Ids of `kind` whose encoded sequence lies above the watermark.
    fn after_for(&self, kind: EntityKind) -> Option<Option<u64>> {
        match decode_full_scan_sequence(self.checkpoint.watermark) {
            None => Some(None),
            Some((current, id)) if current == kind => Some(Some(id)),
            Some((current, _)) => {
                let pos = |k: EntityKind| EntityKind::ALL.iter().position(|a| *a == k);
                if pos(kind) > pos(current) {
                    Some(None)
                } else {
                    None
                }
            }
        }
    }

    fn remaining_ids(&self, kind: EntityKind, limit: usize) -> Result<Vec<u64>, IndexingError> {
        match self.after_for(kind) {
            Some(after) => self.objects.enumerate_ids(kind, after, limit),
            None => Ok(Vec::new()),
        }
    }

    fn count_remaining(&self) -> Result<u64, IndexingError> {
        let mut total = 0u64;
        for kind in &self.kinds {
            if let Some(after) = self.after_for(*kind) {
                total += self.objects.count_ids(*kind, after)?;
            }
        }
        Ok(total)
    }
}

impl CursorLoader for FullScanLoader {
    fn key(&self) -> &str {
        &self.checkpoint.key
    }

    fn next_batch(&mut self, max: usize) -> Result<Vec<LogRecord>, IndexingError> {
        let max = max.max(1);
        let mut records = Vec::with_capacity(max);

        for kind in self.kinds.clone() {
            if records.len() >= max {
                break;
            }
            for id in self.remaining_ids(kind, max - records.len())? {
                match full_scan_sequence(kind, id) {
                    Some(seq) => {
                        records.push(LogRecord::new(seq, kind.as_str(), id, Action::Update))
                    }
                    None => warn!(kind = %kind, id, "Entity id too large for full scan, skipped"),
                }
            }
        }

        self.outstanding = records.iter().map(|r| r.sequence_id).collect();
        Ok(records)
    }

    /// Estimate: entities created or deleted during the scan are not
    /// reflected until the next reset.
    fn backlog_size(&self) -> Result<u64, IndexingError> {
        Ok(self.remaining)
    }

    fn advance(&mut self, watermark: u64) -> Result<(), IndexingError> {
        let applied = self
            .outstanding
            .iter()
            .filter(|seq| **seq <= watermark)
            .count() as u64;
        let mut next = self.checkpoint.clone();
        next.update(watermark, applied);
        self.cursors.set(&next)?;
        self.checkpoint = next;
        self.outstanding.clear();
        self.remaining = self.remaining.saturating_sub(applied);
        Ok(())
    }

    fn reset(&mut self, watermark: u64) -> Result<(), IndexingError> {
        let next = CursorCheckpoint::with_watermark(self.checkpoint.key.clone(), watermark);
        self.cursors.set(&next)?;
        self.checkpoint = next;
        self.outstanding.clear();
        self.remaining = self.count_remaining()?;
        info!(key = %self.checkpoint.key, watermark, "Reset full-scan cursor");
        Ok(())
    }

    fn watermark(&self) -> u64 {
        self.checkpoint.watermark
    }

    fn highest_sequence(&self) -> Result<u64, IndexingError> {
        for kind in self.kinds.iter().rev() {
            if let Some(seq) = self
                .objects
                .last_id(*kind)?
                .and_then(|id| full_scan_sequence(*kind, id))
            {
                return Ok(seq);
            }
        }
        Ok(0)
    }

    fn exact_progress(&self) -> Result<f64, IndexingError> {
        let mut total = 0u64;
        for kind in &self.kinds {
            total += self.objects.count_ids(*kind, None)?;
        }
        let remaining = self.count_remaining()?;
        Ok(ratio(total.saturating_sub(remaining), total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCursors, MemoryLog, MemoryObjects};
    use fts_types::{Entity, EntityRef};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the largest page `enumerate_ids` was asked for.
    struct PagedObjects {
        inner: Arc<MemoryObjects>,
        largest_page: AtomicUsize,
    }

    impl ObjectStore for PagedObjects {
        fn fetch_by_id(&self, kind: EntityKind, id: u64) -> Result<Option<Entity>, IndexingError> {
            self.inner.fetch_by_id(kind, id)
        }

        fn enumerate_ids(
            &self,
            kind: EntityKind,
            after: Option<u64>,
            limit: usize,
        ) -> Result<Vec<u64>, IndexingError> {
            self.largest_page.fetch_max(limit, Ordering::SeqCst);
            self.inner.enumerate_ids(kind, after, limit)
        }

        fn last_id(&self, kind: EntityKind) -> Result<Option<u64>, IndexingError> {
            self.inner.last_id(kind)
        }

        fn count_ids(&self, kind: EntityKind, after: Option<u64>) -> Result<u64, IndexingError> {
            self.inner.count_ids(kind, after)
        }

        fn annotation_parents(&self, annotation_id: u64) -> Result<Vec<EntityRef>, IndexingError> {
            self.inner.annotation_parents(annotation_id)
        }
    }

    fn log_with(n: u64) -> Arc<MemoryLog> {
        let log = MemoryLog::default();
        for seq in 1..=n {
            log.push(LogRecord::new(seq, "Image", seq * 10, Action::Insert));
        }
        Arc::new(log)
    }

    #[test]
    fn test_event_log_loader_batches_in_order() {
        let cursors = Arc::new(MemoryCursors::default());
        let mut loader = EventLogLoader::open(log_with(5), cursors.clone(), "fulltext").unwrap();

        let batch = loader.next_batch(2).unwrap();
        let seqs: Vec<u64> = batch.iter().map(|r| r.sequence_id).collect();
        assert_eq!(seqs, vec![1, 2]);

        // Not advanced: same batch again
        assert_eq!(loader.next_batch(2).unwrap()[0].sequence_id, 1);

        loader.advance(2).unwrap();
        assert_eq!(loader.watermark(), 2);
        assert_eq!(loader.backlog_size().unwrap(), 3);
        assert_eq!(loader.next_batch(10).unwrap().len(), 3);
        assert_eq!(cursors.get("fulltext").unwrap().unwrap().watermark, 2);
    }

    #[test]
    fn test_event_log_loader_resumes_from_persisted_cursor() {
        let log = log_with(4);
        let cursors = Arc::new(MemoryCursors::default());
        {
            let mut loader = EventLogLoader::open(log.clone(), cursors.clone(), "fulltext").unwrap();
            loader.next_batch(3).unwrap();
            loader.advance(3).unwrap();
        }
        let mut loader = EventLogLoader::open(log, cursors.clone(), "fulltext").unwrap();
        assert_eq!(loader.watermark(), 3);
        assert_eq!(loader.checkpoint().processed_count, 3);
        assert_eq!(loader.next_batch(10).unwrap()[0].sequence_id, 4);
    }

    #[test]
    fn test_event_log_loader_reset() {
        let mut loader =
            EventLogLoader::open(log_with(4), Arc::new(MemoryCursors::default()), "k").unwrap();
        loader.next_batch(4).unwrap();
        loader.advance(4).unwrap();
        assert!(loader.next_batch(4).unwrap().is_empty());

        loader.reset(1).unwrap();
        assert_eq!(loader.next_batch(4).unwrap().len(), 3);
    }

    #[test]
    fn test_event_log_loader_progress() {
        let mut loader =
            EventLogLoader::open(log_with(4), Arc::new(MemoryCursors::default()), "k").unwrap();
        assert_eq!(loader.exact_progress().unwrap(), 0.0);
        assert_eq!(loader.highest_sequence().unwrap(), 4);

        loader.next_batch(2).unwrap();
        loader.advance(2).unwrap();
        assert!((loader.exact_progress().unwrap() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_log_is_complete() {
        let loader = EventLogLoader::open(
            Arc::new(MemoryLog::default()),
            Arc::new(MemoryCursors::default()),
            "k",
        )
        .unwrap();
        assert_eq!(loader.exact_progress().unwrap(), 1.0);
        assert_eq!(loader.backlog_size().unwrap(), 0);
    }

    #[test]
    fn test_full_scan_sequence_encoding() {
        let seq = full_scan_sequence(EntityKind::Image, 42).unwrap();
        assert_eq!(decode_full_scan_sequence(seq), Some((EntityKind::Image, 42)));
        assert!(
            full_scan_sequence(EntityKind::Project, u64::from(u32::MAX))
                < full_scan_sequence(EntityKind::Dataset, 0)
        );
        assert_eq!(full_scan_sequence(EntityKind::Image, ID_MASK + 1), None);
        assert_eq!(decode_full_scan_sequence(0), None);
    }

    fn objects() -> Arc<MemoryObjects> {
        let objects = MemoryObjects::default();
        for id in [3, 1, 2] {
            objects.insert_bare(EntityRef::new(EntityKind::Image, id));
        }
        objects.insert_bare(EntityRef::new(EntityKind::Project, 7));
        objects.insert_bare(EntityRef::new(EntityKind::TagAnnotation, 5));
        Arc::new(objects)
    }

    #[test]
    fn test_full_scan_walks_kinds_in_order() {
        let mut loader = FullScanLoader::open(
            objects(),
            Arc::new(MemoryCursors::default()),
            "fulltext.full_scan",
            &[EntityKind::Image, EntityKind::Project],
        )
        .unwrap();
        assert_eq!(loader.kinds(), &[EntityKind::Project, EntityKind::Image]);
        assert_eq!(loader.backlog_size().unwrap(), 4);

        let first = loader.next_batch(2).unwrap();
        let refs: Vec<(String, u64)> = first
            .iter()
            .map(|r| (r.entity_type.clone(), r.entity_id))
            .collect();
        assert_eq!(
            refs,
            vec![("Project".to_string(), 7), ("Image".to_string(), 1)]
        );
        assert!(first.iter().all(|r| r.action == Action::Update));
        assert!(first[0].sequence_id < first[1].sequence_id);

        loader.advance(first[1].sequence_id).unwrap();
        assert_eq!(loader.backlog_size().unwrap(), 2);

        let second = loader.next_batch(10).unwrap();
        let ids: Vec<u64> = second.iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec![2, 3]);
        loader.advance(second[1].sequence_id).unwrap();

        assert!(loader.next_batch(10).unwrap().is_empty());
        assert_eq!(loader.exact_progress().unwrap(), 1.0);
    }

    #[test]
    fn test_full_scan_resumes_and_resets() {
        let objects = objects();
        let cursors = Arc::new(MemoryCursors::default());
        {
            let mut loader = FullScanLoader::open(
                objects.clone(),
                cursors.clone(),
                "scan",
                &[EntityKind::Image],
            )
            .unwrap();
            let batch = loader.next_batch(1).unwrap();
            loader.advance(batch[0].sequence_id).unwrap();
        }
        let mut loader =
            FullScanLoader::open(objects, cursors, "scan", &[EntityKind::Image]).unwrap();
        assert_eq!(loader.next_batch(10).unwrap().len(), 2);

        loader.reset(0).unwrap();
        assert_eq!(loader.next_batch(10).unwrap().len(), 3);
        assert_eq!(
            loader.highest_sequence().unwrap(),
            full_scan_sequence(EntityKind::Image, 3).unwrap()
        );
    }

    #[test]
    fn test_full_scan_only_reads_one_page_per_batch() {
        let inner = MemoryObjects::default();
        for id in 1..=50 {
            inner.insert_bare(EntityRef::new(EntityKind::Image, id));
        }
        let objects = Arc::new(PagedObjects {
            inner: Arc::new(inner),
            largest_page: AtomicUsize::new(0),
        });
        let mut loader = FullScanLoader::open(
            objects.clone(),
            Arc::new(MemoryCursors::default()),
            "scan",
            &[EntityKind::Image, EntityKind::Dataset],
        )
        .unwrap();

        assert_eq!(loader.backlog_size().unwrap(), 50);
        loop {
            let batch = loader.next_batch(10).unwrap();
            let Some(last) = batch.last() else { break };
            loader.advance(last.sequence_id).unwrap();
            assert_eq!(
                loader.highest_sequence().unwrap(),
                full_scan_sequence(EntityKind::Image, 50).unwrap()
            );
            loader.exact_progress().unwrap();
        }

        assert_eq!(loader.backlog_size().unwrap(), 0);
        assert_eq!(loader.exact_progress().unwrap(), 1.0);
        assert_eq!(objects.largest_page.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_failed_advance_keeps_previous_watermark() {
        let cursors = Arc::new(MemoryCursors::default());
        let mut loader = EventLogLoader::open(log_with(3), cursors.clone(), "k").unwrap();
        loader.next_batch(3).unwrap();

        cursors.set_read_only(true);
        assert!(loader.advance(3).is_err());
        assert_eq!(loader.watermark(), 0);
        assert_eq!(loader.next_batch(3).unwrap().len(), 3);

        cursors.set_read_only(false);
        loader.advance(3).unwrap();
        assert_eq!(loader.watermark(), 3);
    }
}
