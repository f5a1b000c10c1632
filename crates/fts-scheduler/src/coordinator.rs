//! Run coordinator.
//!
//! Serializes every indexer invocation for one index key: scheduled runs,
//! admin runs, cursor resets and rebuilds all go through the same
//! [`RunLock`]. Before each attempt the pending change markers are flushed
//! into the event log, whether or not the lock is obtained.
//!
//! Indexer work is synchronous (RocksDB, Tantivy), so it executes on the
//! blocking pool with the lease moved into the task. The lease is released
//! when that task ends, which is what [`RunCoordinator::shutdown`] waits for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fts_indexing::{
    rebuild_index, AcquireMode, Backlog, BacklogEntry, ChangeMarkerSink, FullTextIndexer,
    IndexStores, IndexerStatus, IndexingError, ParserRegistry, RebuildReport, RebuildScope,
    RunLease, RunLock, RunReport,
};
use fts_types::{Action, EntityRef};

use crate::SchedulerError;

/// Result of asking the coordinator to do something under the run lock.
#[derive(Debug)]
pub enum RunOutcome<T> {
    /// The lock was obtained and the work ran
    Completed(T),
    /// `Try` mode found another run in progress
    Skipped,
    /// The coordinator has been shut down
    Inactive,
}

impl<T> RunOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped)
    }
}

/// Counters kept across invocations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub markers_flushed: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Drives one [`FullTextIndexer`] under a single-flight lock.
pub struct RunCoordinator {
    indexer: Arc<Mutex<FullTextIndexer>>,
    backlog: Arc<Backlog>,
    stores: IndexStores,
    parsers: Arc<ParserRegistry>,
    markers: Arc<dyn ChangeMarkerSink>,
    lock: RunLock,
    cancel: CancellationToken,
    active: AtomicBool,
    shutdown_timeout: Duration,
    stats: Mutex<CoordinatorStats>,
}

impl RunCoordinator {
    /// `stores` and `parsers` must be the ones `indexer` was built from;
    /// rebuilds use them directly.
    pub fn new(
        indexer: FullTextIndexer,
        stores: IndexStores,
        parsers: Arc<ParserRegistry>,
        markers: Arc<dyn ChangeMarkerSink>,
    ) -> Self {
        let lock = RunLock::new(&indexer.config().index_key);
        let backlog = indexer.backlog();
        Self {
            indexer: Arc::new(Mutex::new(indexer)),
            backlog,
            stores,
            parsers,
            markers,
            lock,
            cancel: CancellationToken::new(),
            active: AtomicBool::new(true),
            shutdown_timeout: Duration::from_secs(30),
            stats: Mutex::new(CoordinatorStats::default()),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Share an existing lock instead of the coordinator's own.
    pub fn with_lock(mut self, lock: RunLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// The indexer's reindex queue.
    pub fn backlog(&self) -> Arc<Backlog> {
        Arc::clone(&self.backlog)
    }

    /// Queue an entity for the next run without touching the event log.
    ///
    /// Returns false when an equal request is already pending or the
    /// backlog is being drained by a running batch.
    pub fn request_reindex(&self, entity: EntityRef) -> bool {
        let queued = self.backlog.add(BacklogEntry::new(
            entity.kind.as_str(),
            entity.id,
            Action::Reindex,
        ));
        if queued {
            debug!(entity = %entity, "Reindex requested");
        }
        queued
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turn pending change markers into event-log records.
    ///
    /// Failures are logged and swallowed; the run proceeds with whatever is
    /// already in the log.
    pub async fn prepare(&self) -> usize {
        let markers = Arc::clone(&self.markers);
        let flushed = match tokio::task::spawn_blocking(move || markers.flush_markers()).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to flush pending change markers");
                0
            }
            Err(e) => {
                warn!(error = %e, "Marker flush task failed");
                0
            }
        };
        if flushed > 0 {
            debug!(count = flushed, "Flushed pending change markers");
            self.update_stats(|s| s.markers_flushed += flushed as u64);
        }
        flushed
    }

    /// One indexer invocation: batches until caught up or out of repetitions.
    pub async fn run(&self, mode: AcquireMode) -> Result<RunOutcome<RunReport>, SchedulerError> {
        self.execute(mode, |indexer, lease, cancel| indexer.run(lease, cancel))
            .await
    }

    /// An invocation with dry-run forced on or off for its duration.
    pub async fn run_once(
        &self,
        mode: AcquireMode,
        dry_run: bool,
    ) -> Result<RunOutcome<RunReport>, SchedulerError> {
        self.execute(mode, move |indexer, lease, cancel| {
            let previous = indexer.config().dry_run;
            indexer.set_dry_run(dry_run);
            let result = indexer.run(lease, cancel);
            indexer.set_dry_run(previous);
            result
        })
        .await
    }

    /// Move the event-log cursor to `watermark`.
    pub async fn reset_cursor(
        &self,
        mode: AcquireMode,
        watermark: u64,
    ) -> Result<RunOutcome<()>, SchedulerError> {
        self.execute(mode, move |indexer, lease, _cancel| {
            indexer.reset_cursor(lease, watermark)
        })
        .await
    }

    /// Clear and repopulate the index (or one kind) from the primary store.
    pub async fn rebuild(
        &self,
        mode: AcquireMode,
        scope: RebuildScope,
    ) -> Result<RunOutcome<RebuildReport>, SchedulerError> {
        let stores = self.stores.clone();
        let parsers = Arc::clone(&self.parsers);
        self.execute(mode, move |indexer, lease, cancel| {
            let config = indexer.config().clone();
            let report = rebuild_index(&config, scope, &stores, parsers, lease, cancel)?;
            // The live loader caches its watermark
            if let Some(watermark) = report.log_watermark {
                indexer.reset_cursor(lease, watermark)?;
            }
            Ok(report)
        })
        .await
    }

    /// Cursor position, backlog and metrics. Waits for a running batch to
    /// finish but does not take the run lock.
    pub async fn status(&self) -> Result<IndexerStatus, SchedulerError> {
        let indexer = Arc::clone(&self.indexer);
        let status = tokio::task::spawn_blocking(move || {
            indexer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .status()
        })
        .await
        .map_err(|e| IndexingError::Task(e.to_string()))??;
        Ok(status)
    }

    /// Stop accepting work, cancel the current run, and wait up to the
    /// shutdown timeout for it to release the lock.
    ///
    /// Returns whether the lock was obtained. Never waits longer than the
    /// timeout.
    pub async fn shutdown(&self) -> bool {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        info!(key = %self.lock.key(), "Stopping indexer");

        match self.lock.acquire_timeout(self.shutdown_timeout).await {
            Ok(_lease) => {
                info!(key = %self.lock.key(), "Indexer stopped");
                true
            }
            Err(_) => {
                error!(
                    key = %self.lock.key(),
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Indexer run did not finish before shutdown timeout"
                );
                false
            }
        }
    }

    async fn execute<T, F>(&self, mode: AcquireMode, work: F) -> Result<RunOutcome<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FullTextIndexer, &RunLease, &CancellationToken) -> Result<T, IndexingError>
            + Send
            + 'static,
    {
        if !self.is_active() {
            debug!(key = %self.lock.key(), "Coordinator inactive, ignoring request");
            return Ok(RunOutcome::Inactive);
        }

        self.prepare().await;

        let lease = match self.lock.acquire(mode).await? {
            Some(lease) => lease,
            None => {
                info!(key = %self.lock.key(), "Indexer currently running, skipping");
                self.update_stats(|s| s.skipped += 1);
                return Ok(RunOutcome::Skipped);
            }
        };

        // Shutdown may have started while we waited
        if !self.is_active() {
            return Ok(RunOutcome::Inactive);
        }

        let indexer = Arc::clone(&self.indexer);
        let cancel = self.cancel.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut indexer = indexer.lock().unwrap_or_else(PoisonError::into_inner);
            work(&mut indexer, &lease, &cancel)
        })
        .await
        .map_err(|e| IndexingError::Task(e.to_string()))?;

        match result {
            Ok(value) => {
                self.update_stats(|s| {
                    s.completed += 1;
                    s.last_run = Some(Utc::now());
                });
                Ok(RunOutcome::Completed(value))
            }
            Err(e) => {
                error!(key = %self.lock.key(), error = %e, "Indexer run failed");
                self.update_stats(|s| {
                    s.failed += 1;
                    s.last_run = Some(Utc::now());
                    s.last_error = Some(e.to_string());
                });
                Err(e.into())
            }
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut CoordinatorStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use chrono::TimeZone;
    use fts_indexing::{Backlog, CustomBridge, DocumentBridge, IndexerConfig};
    use fts_search::{EntitySearcher, SearchIndex, SearchIndexConfig, SearchIndexer};
    use fts_storage::Storage;
    use fts_types::{
        Action, AnnotationBody, Details, Document, Entity, EntityKind, EntityRef,
        Experimenter, Group,
    };
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        storage: Arc<Storage>,
        index: SearchIndex,
        stores: IndexStores,
        parsers: Arc<ParserRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(Storage::open(&dir.path().join("db")).unwrap());
            let index =
                SearchIndex::open_or_create(SearchIndexConfig::new(dir.path().join("index")))
                    .unwrap();
            let engine = Arc::new(SearchIndexer::new(&index).unwrap());
            let stores = IndexStores::from_storage(storage.clone(), engine);
            Self {
                _dir: dir,
                storage,
                index,
                stores,
                parsers: Arc::new(ParserRegistry::with_defaults(1024 * 1024)),
            }
        }

        fn coordinator(&self, bridge: DocumentBridge) -> RunCoordinator {
            let indexer = FullTextIndexer::from_stores(
                IndexerConfig::default(),
                &self.stores,
                Arc::new(Backlog::new()),
                self.parsers.clone(),
            )
            .unwrap()
            .with_bridge(bridge);
            RunCoordinator::new(
                indexer,
                self.stores.clone(),
                self.parsers.clone(),
                self.storage.clone(),
            )
            .with_shutdown_timeout(Duration::from_secs(5))
        }

        fn put_image(&self, id: u64, name: &str) -> u64 {
            let entity = Entity::new(EntityKind::Image, id, details()).with_name(name);
            self.storage.put_entity(&entity, Action::Insert).unwrap()
        }

        fn searcher(&self) -> EntitySearcher {
            EntitySearcher::new(&self.index).unwrap()
        }
    }

    fn details() -> Details {
        Details {
            owner: Experimenter {
                id: 1,
                user_name: "root".to_string(),
                first_name: String::new(),
                last_name: String::new(),
            },
            group: Group {
                id: 0,
                name: "system".to_string(),
            },
            created: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            updated: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            permissions: "rw----".to_string(),
        }
    }

    struct SlowBridge(Duration);

    impl CustomBridge for SlowBridge {
        fn name(&self) -> &str {
            "slow"
        }

        fn contribute(&self, _entity: &Entity, _document: &mut Document) -> Result<(), IndexingError> {
            thread::sleep(self.0);
            Ok(())
        }
    }

    fn slow_bridge(delay: Duration) -> DocumentBridge {
        DocumentBridge::new().with_custom(Arc::new(SlowBridge(delay)))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_indexes_and_advances_cursor() {
        let harness = Harness::new();
        harness.put_image(1, "first");
        let last = harness.put_image(2, "second");
        let coordinator = harness.coordinator(DocumentBridge::new());

        let report = coordinator
            .run(AcquireMode::Try)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(report.indexed(), 2);
        assert_eq!(report.watermark(), Some(last));
        assert_eq!(harness.searcher().count("second").unwrap(), 1);
        assert_eq!(coordinator.stats().completed, 1);
        assert!(!coordinator.lock().is_held());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requested_reindex_runs_without_log_record() {
        let harness = Harness::new();
        let last = harness.put_image(1, "first");
        let coordinator = harness.coordinator(DocumentBridge::new());
        coordinator.run(AcquireMode::Try).await.unwrap();

        let image = EntityRef::new(EntityKind::Image, 1);
        assert!(coordinator.request_reindex(image));
        assert!(!coordinator.request_reindex(image));
        assert_eq!(coordinator.backlog().len(), 1);

        let report = coordinator
            .run(AcquireMode::Try)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.batches[0].from_backlog, 1);
        assert_eq!(report.indexed(), 1);
        assert!(coordinator.backlog().is_empty());
        assert_eq!(coordinator.status().await.unwrap().watermark, last);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_try_runs_execute_once() {
        let harness = Harness::new();
        let last = harness.put_image(1, "slow");
        let coordinator = Arc::new(harness.coordinator(slow_bridge(Duration::from_millis(400))));

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(AcquireMode::Try).await })
        };
        let second = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                coordinator.run(AcquireMode::Try).await
            })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert!(matches!(first, RunOutcome::Completed(_)));
        assert!(second.is_skipped());
        let stats = coordinator.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.skipped, 1);

        let status = coordinator.status().await.unwrap();
        assert_eq!(status.watermark, last);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_mode_times_out_while_held() {
        let harness = Harness::new();
        harness.put_image(1, "held");
        let coordinator = harness.coordinator(DocumentBridge::new());

        let _lease = coordinator.lock().try_acquire().unwrap();
        let result = coordinator
            .run(AcquireMode::Wait(Duration::from_millis(50)))
            .await;

        assert!(matches!(
            result,
            Err(SchedulerError::Indexing(IndexingError::LockTimeout(_)))
        ));
        assert_eq!(coordinator.status().await.unwrap().watermark, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_prepare_flushes_markers_even_when_skipped() {
        let harness = Harness::new();
        harness.put_image(1, "parent");
        let tag = Entity::new(EntityKind::TagAnnotation, 7, details()).with_body(
            AnnotationBody::Tag {
                value: "mitosis".to_string(),
                description: None,
            },
        );
        harness.storage.put_entity(&tag, Action::Insert).unwrap();
        harness
            .storage
            .link_annotation(EntityRef::new(EntityKind::Image, 1), 7, None)
            .unwrap();
        let before = harness.storage.max_sequence().unwrap();

        let coordinator = harness.coordinator(DocumentBridge::new());
        let _lease = coordinator.lock().try_acquire().unwrap();
        let outcome = coordinator.run(AcquireMode::Try).await.unwrap();

        assert!(outcome.is_skipped());
        assert_eq!(harness.storage.max_sequence().unwrap(), before + 1);
        assert!(harness.storage.pending_markers().unwrap().is_empty());
        assert_eq!(coordinator.stats().markers_flushed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_linked_annotation_reaches_parent_document() {
        let harness = Harness::new();
        harness.put_image(1, "cells");
        let tag = Entity::new(EntityKind::TagAnnotation, 7, details()).with_body(
            AnnotationBody::Tag {
                value: "mitosis".to_string(),
                description: None,
            },
        );
        harness.storage.put_entity(&tag, Action::Insert).unwrap();
        let coordinator = harness.coordinator(DocumentBridge::new());
        coordinator.run(AcquireMode::Try).await.unwrap();
        assert_eq!(harness.searcher().count("mitosis").unwrap(), 1);

        harness
            .storage
            .link_annotation(EntityRef::new(EntityKind::Image, 1), 7, Some("lab"))
            .unwrap();
        coordinator.run(AcquireMode::Try).await.unwrap();

        let searcher = harness.searcher();
        let hits = searcher.search("mitosis", 10).unwrap();
        assert_eq!(hits.len(), 2);
        let image = searcher.get("Image:1").unwrap().unwrap();
        assert_eq!(image.first("tag"), Some("mitosis"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dry_run_leaves_cursor() {
        let harness = Harness::new();
        harness.put_image(1, "dry");
        let coordinator = harness.coordinator(DocumentBridge::new());

        let report = coordinator
            .run_once(AcquireMode::Try, true)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(report.batches.len(), 1);
        assert_eq!(coordinator.status().await.unwrap().watermark, 0);
        assert_eq!(harness.searcher().count("dry").unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_cursor_and_rebuild() {
        let harness = Harness::new();
        harness.put_image(1, "alpha");
        let last = harness.put_image(2, "beta");
        let coordinator = harness.coordinator(DocumentBridge::new());

        let wait = AcquireMode::Wait(Duration::from_secs(1));
        coordinator.reset_cursor(wait, last).await.unwrap();
        assert_eq!(coordinator.status().await.unwrap().watermark, last);

        coordinator.reset_cursor(wait, 0).await.unwrap();
        let report = coordinator
            .rebuild(wait, RebuildScope::All)
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.log_watermark, Some(last));
        assert_eq!(coordinator.status().await.unwrap().watermark, last);
        assert_eq!(harness.searcher().count("alpha").unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_waits_for_running_batch() {
        let harness = Harness::new();
        harness.put_image(1, "busy");
        let coordinator = Arc::new(harness.coordinator(slow_bridge(Duration::from_millis(300))));

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(AcquireMode::Try).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(coordinator.shutdown().await);
        assert!(!coordinator.is_active());
        assert!(matches!(
            run.await.unwrap().unwrap(),
            RunOutcome::Completed(_)
        ));
        assert!(matches!(
            coordinator.run(AcquireMode::Try).await.unwrap(),
            RunOutcome::Inactive
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_gives_up_after_timeout() {
        let harness = Harness::new();
        let coordinator = harness
            .coordinator(DocumentBridge::new())
            .with_shutdown_timeout(Duration::from_millis(50));

        let _lease = coordinator.lock().try_acquire().unwrap();
        let start = std::time::Instant::now();
        assert!(!coordinator.shutdown().await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
