//! The incremental indexer loop.
//!
//! Each batch goes through FETCH, CLASSIFY, APPLY, COMMIT and REPORT:
//! backlog entries and the next loader batch are fetched, each record is
//! classified as a purge, an index or a no-op, applied one entity at a time,
//! and the cursor is advanced once the whole batch has been applied.
//! Batches repeat while the loader reports a large backlog, up to the
//! configured number of repetitions.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fts_types::{Action, EntityKind, EntityRef, IndexerSettings, LogRecord};

use crate::backlog::{Backlog, BacklogEntry, BacklogStats};
use crate::bridge::{BridgeContext, DocumentBridge};
use crate::error::IndexingError;
use crate::failure::{FailureKind, FailureListener, FailureResponse, IndexFailure};
use crate::loader::{CursorLoader, EventLogLoader};
use crate::lock::RunLease;
use crate::metrics::{IndexerMetrics, MetricsSnapshot};
use crate::parser::{ParserRegistry, ParserSession};
use crate::store::{CursorStore, EventLogStore, IndexStores, ObjectStore, SearchEngine};

/// Tuning for one indexer.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Cursor key, also the run lock key
    pub index_key: String,
    pub batch_size: usize,
    pub repetitions: usize,
    pub backlog_factor: u64,
    /// Exact progress every N batches (0 disables)
    pub exact_progress_every: usize,
    /// Build documents but leave the engine and the cursor alone
    pub dry_run: bool,
    /// Kinds covered by a full rebuild
    pub kinds: Vec<EntityKind>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self::from(&IndexerSettings::default())
    }
}

impl From<&IndexerSettings> for IndexerConfig {
    fn from(settings: &IndexerSettings) -> Self {
        Self {
            index_key: settings.index_key.clone(),
            batch_size: settings.batch_size.max(1),
            repetitions: settings.repetitions.max(1),
            backlog_factor: settings.backlog_factor,
            exact_progress_every: settings.exact_progress_every,
            dry_run: false,
            kinds: settings.kinds.clone(),
        }
    }
}

impl IndexerConfig {
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Cursor key of the full-scan loader, optionally for a single kind.
    pub fn scan_key(&self, kind: Option<EntityKind>) -> String {
        match kind {
            Some(kind) => format!("{}.full_scan.{}", self.index_key, kind),
            None => format!("{}.full_scan", self.index_key),
        }
    }
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Records taken from the loader
    pub fetched: usize,
    /// Entries taken from the backlog
    pub from_backlog: usize,
    /// Parent reindex requests processed
    pub reindexed: usize,
    pub indexed: usize,
    pub purged: usize,
    pub skipped: usize,
    pub failures: Vec<IndexFailure>,
    /// Cursor watermark after commit
    pub watermark: u64,
    pub rolled_back: bool,
    pub percent_approx: f64,
    pub percent_exact: Option<f64>,
    pub elapsed: Duration,
}

impl BatchReport {
    /// Whether the batch found nothing to do.
    pub fn is_empty(&self) -> bool {
        self.fetched == 0 && self.from_backlog == 0
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub batches: Vec<BatchReport>,
    /// Stopped early by cancellation
    pub cancelled: bool,
}

impl RunReport {
    pub fn indexed(&self) -> usize {
        self.batches.iter().map(|b| b.indexed).sum()
    }

    pub fn purged(&self) -> usize {
        self.batches.iter().map(|b| b.purged).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &IndexFailure> {
        self.batches.iter().flat_map(|b| b.failures.iter())
    }

    pub fn watermark(&self) -> Option<u64> {
        self.batches.last().map(|b| b.watermark)
    }
}

/// Cursor and backlog state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct IndexerStatus {
    pub key: String,
    pub watermark: u64,
    pub highest_sequence: u64,
    pub backlog_estimate: u64,
    pub backlog: BacklogStats,
    pub metrics: MetricsSnapshot,
}

enum Outcome {
    Indexed(Vec<EntityRef>),
    Purged,
    Skipped,
}

struct WorkItem {
    record: LogRecord,
    /// 0 for fetched records, 1 for parent reindex requests
    depth: u8,
}

/// Full-text indexer for one index key.
pub struct FullTextIndexer {
    config: IndexerConfig,
    loader: Box<dyn CursorLoader>,
    objects: Arc<dyn ObjectStore>,
    engine: Arc<dyn SearchEngine>,
    backlog: Arc<Backlog>,
    parsers: Arc<ParserRegistry>,
    bridge: DocumentBridge,
    listeners: Vec<Arc<dyn FailureListener>>,
    metrics: Arc<IndexerMetrics>,
    batches_run: usize,
}

impl FullTextIndexer {
    pub fn new(
        config: IndexerConfig,
        loader: Box<dyn CursorLoader>,
        objects: Arc<dyn ObjectStore>,
        engine: Arc<dyn SearchEngine>,
        backlog: Arc<Backlog>,
        parsers: Arc<ParserRegistry>,
    ) -> Self {
        Self {
            config,
            loader,
            objects,
            engine,
            backlog,
            parsers,
            bridge: DocumentBridge::new(),
            listeners: Vec::new(),
            metrics: Arc::new(IndexerMetrics::new()),
            batches_run: 0,
        }
    }

    /// Indexer driven by the event log under `config.index_key`.
    pub fn for_event_log(
        config: IndexerConfig,
        log: Arc<dyn EventLogStore>,
        cursors: Arc<dyn CursorStore>,
        objects: Arc<dyn ObjectStore>,
        engine: Arc<dyn SearchEngine>,
        backlog: Arc<Backlog>,
        parsers: Arc<ParserRegistry>,
    ) -> Result<Self, IndexingError> {
        let loader = EventLogLoader::open(log, cursors, &config.index_key)?;
        Ok(Self::new(
            config,
            Box::new(loader),
            objects,
            engine,
            backlog,
            parsers,
        ))
    }

    /// Event-log indexer over a bundle of collaborators.
    pub fn from_stores(
        config: IndexerConfig,
        stores: &IndexStores,
        backlog: Arc<Backlog>,
        parsers: Arc<ParserRegistry>,
    ) -> Result<Self, IndexingError> {
        Self::for_event_log(
            config,
            stores.log.clone(),
            stores.cursors.clone(),
            stores.objects.clone(),
            stores.engine.clone(),
            backlog,
            parsers,
        )
    }

    pub fn with_bridge(mut self, bridge: DocumentBridge) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn FailureListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<IndexerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.config.dry_run = dry_run;
    }

    pub fn metrics(&self) -> Arc<IndexerMetrics> {
        self.metrics.clone()
    }

    pub fn backlog(&self) -> Arc<Backlog> {
        self.backlog.clone()
    }

    pub fn watermark(&self) -> u64 {
        self.loader.watermark()
    }

    pub fn loader_backlog(&self) -> Result<u64, IndexingError> {
        self.loader.backlog_size()
    }

    /// Administrative cursor reset. Requires the run lease.
    pub fn reset_cursor(&mut self, lease: &RunLease, watermark: u64) -> Result<(), IndexingError> {
        self.check_lease(lease)?;
        self.loader.reset(watermark)
    }

    pub fn status(&self) -> Result<IndexerStatus, IndexingError> {
        Ok(IndexerStatus {
            key: self.loader.key().to_string(),
            watermark: self.loader.watermark(),
            highest_sequence: self.loader.highest_sequence()?,
            backlog_estimate: self.loader.backlog_size()?,
            backlog: self.backlog.stats(),
            metrics: self.metrics.snapshot(),
        })
    }

    fn check_lease(&self, lease: &RunLease) -> Result<(), IndexingError> {
        if lease.key() != self.config.index_key {
            return Err(IndexingError::LeaseMismatch {
                expected: self.config.index_key.clone(),
                actual: lease.key().to_string(),
            });
        }
        Ok(())
    }

    /// Whether another batch should run in this invocation.
    pub fn do_more(&self, repetitions_run: usize) -> Result<bool, IndexingError> {
        if repetitions_run >= self.config.repetitions {
            return Ok(false);
        }
        let threshold = self
            .config
            .backlog_factor
            .saturating_mul(self.config.batch_size as u64);
        Ok(self.loader.backlog_size()? > threshold)
    }

    /// Run batches until caught up, out of repetitions, or cancelled.
    ///
    /// Cancellation is only observed between batches. A dry run executes a
    /// single batch.
    pub fn run(
        &mut self,
        lease: &RunLease,
        cancel: &CancellationToken,
    ) -> Result<RunReport, IndexingError> {
        self.check_lease(lease)?;
        let mut report = RunReport::default();

        loop {
            if cancel.is_cancelled() {
                info!(key = %self.config.index_key, "Indexer run cancelled");
                report.cancelled = true;
                break;
            }

            let batch = self.run_batch(lease)?;
            report.batches.push(batch);

            if self.config.dry_run || !self.do_more(report.batches.len())? {
                break;
            }
        }

        Ok(report)
    }

    /// Run exactly one batch.
    pub fn run_batch(&mut self, lease: &RunLease) -> Result<BatchReport, IndexingError> {
        self.check_lease(lease)?;
        let start = Instant::now();
        let dry_run = self.config.dry_run;
        let mut report = BatchReport::default();

        // FETCH (the backlog is only drained once the log read succeeded)
        let records = self.loader.next_batch(self.config.batch_size)?;
        let drained = self.backlog.drain();
        report.from_backlog = drained.len();
        report.fetched = records.len();
        let last_sequence = records.last().map(|r| r.sequence_id);

        let mut scheduled: HashSet<EntityRef> = HashSet::new();
        let mut queue: VecDeque<WorkItem> = drained
            .iter()
            .map(BacklogEntry::to_record)
            .chain(records)
            .map(|record| {
                if let Some(kind) = EntityKind::parse(&record.entity_type) {
                    scheduled.insert(EntityRef::new(kind, record.entity_id));
                }
                WorkItem { record, depth: 0 }
            })
            .collect();

        // CLASSIFY + APPLY
        let mut parser = ParserSession::new(self.parsers.clone());
        let mut rollback: Option<u64> = None;
        let mut retry: Vec<BacklogEntry> = Vec::new();

        while let Some(item) = queue.pop_front() {
            if item.depth > 0 {
                report.reindexed += 1;
            }
            match self.apply_record(&item.record, &mut parser) {
                Ok(Outcome::Indexed(parents)) => {
                    report.indexed += 1;
                    self.metrics.record_indexed();
                    if item.depth == 0 {
                        for parent in parents {
                            if scheduled.insert(parent) {
                                queue.push_back(WorkItem {
                                    record: LogRecord::new(
                                        0,
                                        parent.kind.as_str(),
                                        parent.id,
                                        Action::Reindex,
                                    ),
                                    depth: 1,
                                });
                            }
                        }
                    }
                }
                Ok(Outcome::Purged) => {
                    report.purged += 1;
                    self.metrics.record_purged();
                }
                Ok(Outcome::Skipped) => {
                    report.skipped += 1;
                    self.metrics.record_skipped();
                }
                Err(failure) => {
                    warn!(
                        sequence_id = failure.record.sequence_id,
                        entity_type = %failure.record.entity_type,
                        entity_id = failure.record.entity_id,
                        stage = %failure.kind,
                        error = %failure.message,
                        "Failed to index entity"
                    );
                    self.metrics.record_failed();
                    if self.notify(&failure) == FailureResponse::Rollback {
                        if failure.has_log_position() {
                            let target = failure.record.sequence_id - 1;
                            rollback = Some(rollback.map_or(target, |r| r.min(target)));
                        } else {
                            retry.push(BacklogEntry::new(
                                failure.record.entity_type.clone(),
                                failure.record.entity_id,
                                failure.record.action.clone(),
                            ));
                        }
                    }
                    report.failures.push(failure);
                }
            }
        }

        let closed = parser.close_all();
        if closed.failed > 0 {
            warn!(failed = closed.failed, "Some file readers failed to close");
        }

        // COMMIT
        if dry_run {
            for entry in drained {
                self.backlog.add(entry);
            }
        } else {
            for entry in retry {
                self.backlog.add(entry);
            }
            if let Some(last) = last_sequence {
                let watermark = rollback.unwrap_or(last);
                if rollback.is_some() {
                    info!(
                        key = %self.config.index_key,
                        watermark,
                        "Rolling cursor back to retry failed records"
                    );
                }
                self.loader.advance(watermark)?;
            }
        }
        report.rolled_back = rollback.is_some() && !dry_run;
        report.watermark = self.loader.watermark();

        // REPORT
        self.batches_run += 1;
        self.metrics.record_batch();

        let highest = self.loader.highest_sequence()?;
        report.percent_approx = if highest == 0 {
            100.0
        } else {
            (report.watermark as f64 / highest as f64 * 100.0).min(100.0)
        };
        self.metrics.set_percent_approx(report.percent_approx);

        let every = self.config.exact_progress_every;
        if every > 0 && self.batches_run % every == 0 {
            let exact = self.loader.exact_progress()? * 100.0;
            self.metrics.set_percent_exact(exact);
            report.percent_exact = Some(exact);
        }

        report.elapsed = start.elapsed();
        if report.is_empty() {
            debug!(key = %self.config.index_key, "Nothing to index");
        } else {
            info!(
                key = %self.config.index_key,
                indexed = report.indexed,
                purged = report.purged,
                failed = report.failures.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                percent_complete = %format!("{:.1}", report.percent_exact.unwrap_or(report.percent_approx)),
                dry_run,
                "Indexed batch"
            );
        }

        Ok(report)
    }

    fn notify(&self, failure: &IndexFailure) -> FailureResponse {
        // Every listener sees every failure
        self.listeners
            .iter()
            .map(|l| l.on_failure(failure))
            .fold(FailureResponse::Continue, |acc, r| {
                if r == FailureResponse::Rollback {
                    r
                } else {
                    acc
                }
            })
    }

    fn apply_record(
        &self,
        record: &LogRecord,
        parser: &mut ParserSession,
    ) -> Result<Outcome, IndexFailure> {
        let Some(kind) = EntityKind::parse(&record.entity_type) else {
            debug!(
                entity_type = %record.entity_type,
                entity_id = record.entity_id,
                "Unknown entity type, skipped"
            );
            return Ok(Outcome::Skipped);
        };

        match &record.action {
            Action::Delete => self.purge(record, kind),
            Action::Insert | Action::Update | Action::Reindex => {
                let fetched = self
                    .objects
                    .fetch_by_id(kind, record.entity_id)
                    .map_err(|e| IndexFailure::new(record.clone(), FailureKind::Fetch, e.to_string()))?;
                match fetched {
                    Some(entity) => {
                        let mut ctx = BridgeContext {
                            parser,
                            objects: self.objects.as_ref(),
                        };
                        let output = self.bridge.build_document(&entity, &mut ctx).map_err(|e| {
                            IndexFailure::new(record.clone(), FailureKind::Build, e.to_string())
                        })?;
                        if !self.config.dry_run {
                            self.engine
                                .upsert(&output.document)
                                .and_then(|_| self.engine.flush())
                                .map_err(|e| {
                                    IndexFailure::new(record.clone(), FailureKind::Apply, e.to_string())
                                })?;
                        }
                        Ok(Outcome::Indexed(output.reindex))
                    }
                    None => {
                        debug!(
                            entity_type = %kind,
                            entity_id = record.entity_id,
                            "Entity no longer exists, purging"
                        );
                        self.purge(record, kind)
                    }
                }
            }
            Action::Other(action) => {
                debug!(
                    action = %action,
                    entity_type = %kind,
                    entity_id = record.entity_id,
                    "Unhandled action, skipped"
                );
                Ok(Outcome::Skipped)
            }
        }
    }

    fn purge(&self, record: &LogRecord, kind: EntityKind) -> Result<Outcome, IndexFailure> {
        if !self.config.dry_run {
            self.engine
                .purge(kind.as_str(), record.entity_id)
                .and_then(|_| self.engine.flush())
                .map_err(|e| IndexFailure::new(record.clone(), FailureKind::Apply, e.to_string()))?;
        }
        Ok(Outcome::Purged)
    }
}
