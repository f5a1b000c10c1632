//! Full index rebuild from the primary store.
//!
//! A rebuild clears the index (or one entity type), walks every stored
//! entity with a [`FullScanLoader`], and finally moves the event-log cursor
//! to the highest sequence id seen before the scan started. Log records
//! written during the scan are therefore replayed by the next normal run,
//! which is harmless because applying a record is idempotent.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fts_types::EntityKind;

use crate::backlog::Backlog;
use crate::error::IndexingError;
use crate::indexer::{FullTextIndexer, IndexerConfig};
use crate::loader::{CursorLoader, EventLogLoader, FullScanLoader};
use crate::lock::RunLease;
use crate::parser::ParserRegistry;
use crate::store::IndexStores;

/// What a rebuild covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RebuildScope {
    /// Every configured kind; also moves the event-log cursor
    All,
    /// One kind; the event-log cursor is left alone
    Kind(EntityKind),
}

impl RebuildScope {
    fn kind(&self) -> Option<EntityKind> {
        match self {
            RebuildScope::All => None,
            RebuildScope::Kind(kind) => Some(*kind),
        }
    }
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub scope: RebuildScope,
    /// Entities found by the scan when it started
    pub total: u64,
    pub indexed: usize,
    pub purged: usize,
    pub failed: usize,
    pub batches: usize,
    /// Event-log watermark set at the end, for full rebuilds
    pub log_watermark: Option<u64>,
    pub cancelled: bool,
}

/// Rebuild the index from the primary store. Requires the run lease.
pub fn rebuild_index(
    config: &IndexerConfig,
    scope: RebuildScope,
    stores: &IndexStores,
    parsers: Arc<ParserRegistry>,
    lease: &RunLease,
    cancel: &CancellationToken,
) -> Result<RebuildReport, IndexingError> {
    let target = stores.log.max_sequence()?;

    match scope {
        RebuildScope::All => stores.engine.purge_all()?,
        RebuildScope::Kind(kind) => stores.engine.purge_type(kind.as_str())?,
    }
    stores.engine.flush()?;

    let kinds = match scope {
        RebuildScope::All => config.kinds.clone(),
        RebuildScope::Kind(kind) => vec![kind],
    };
    let key = config.scan_key(scope.kind());
    let mut loader = FullScanLoader::open(
        stores.objects.clone(),
        stores.cursors.clone(),
        &key,
        &kinds,
    )?;
    loader.reset(0)?;
    let total = loader.backlog_size()?;
    info!(scope = ?scope, total, key = %key, "Starting index rebuild");

    // Private backlog: producer entries stay queued for the next normal run
    let mut indexer = FullTextIndexer::new(
        config.clone().with_dry_run(false),
        Box::new(loader),
        stores.objects.clone(),
        stores.engine.clone(),
        Arc::new(Backlog::new()),
        parsers,
    );

    let mut report = RebuildReport {
        scope,
        total,
        indexed: 0,
        purged: 0,
        failed: 0,
        batches: 0,
        log_watermark: None,
        cancelled: false,
    };

    loop {
        if cancel.is_cancelled() {
            warn!(scope = ?scope, "Rebuild cancelled before completion");
            report.cancelled = true;
            break;
        }

        let before = indexer.watermark();
        let batch = indexer.run_batch(lease)?;
        report.batches += 1;
        report.indexed += batch.indexed;
        report.purged += batch.purged;
        report.failed += batch.failures.len();

        info!(
            processed = report.indexed + report.purged + report.failed,
            total,
            "Rebuild progress"
        );

        if batch.fetched == 0 || indexer.loader_backlog()? == 0 {
            break;
        }
        if indexer.watermark() == before {
            warn!(watermark = before, "Rebuild made no progress, stopping");
            break;
        }
    }

    if !report.cancelled && scope == RebuildScope::All {
        let mut log_loader =
            EventLogLoader::open(stores.log.clone(), stores.cursors.clone(), &config.index_key)?;
        log_loader.reset(target)?;
        report.log_watermark = Some(target);
    }

    info!(
        scope = ?scope,
        indexed = report.indexed,
        failed = report.failed,
        batches = report.batches,
        "Index rebuild finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::RunLock;
    use crate::store::CursorStore;
    use crate::testing::{EngineOp, MemoryCursors, MemoryEngine, MemoryLog, MemoryObjects};
    use fts_types::{Action, EntityRef};

    fn setup() -> (IndexStores, Arc<MemoryEngine>, Arc<MemoryCursors>) {
        let log = MemoryLog::default();
        log.append("Image", 1, Action::Insert);
        log.append("Image", 2, Action::Insert);
        log.append("Dataset", 3, Action::Insert);

        let objects = MemoryObjects::default();
        for id in 1..=5 {
            objects.insert_bare(EntityRef::new(EntityKind::Image, id));
        }
        objects.insert_bare(EntityRef::new(EntityKind::Dataset, 3));

        let engine = Arc::new(MemoryEngine::default());
        let cursors = Arc::new(MemoryCursors::default());
        let stores = IndexStores {
            log: Arc::new(log),
            objects: Arc::new(objects),
            cursors: cursors.clone(),
            engine: engine.clone(),
        };
        (stores, engine, cursors)
    }

    fn parsers() -> Arc<ParserRegistry> {
        Arc::new(ParserRegistry::with_defaults(1024))
    }

    #[test]
    fn test_full_rebuild() {
        let (stores, engine, cursors) = setup();
        let lock = RunLock::new("fulltext");
        let lease = lock.try_acquire().unwrap();
        let config = IndexerConfig::default().with_batch_size(2);

        let report = rebuild_index(
            &config,
            RebuildScope::All,
            &stores,
            parsers(),
            &lease,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.total, 6);
        assert_eq!(report.indexed, 6);
        assert_eq!(report.batches, 3);
        assert_eq!(report.log_watermark, Some(3));
        assert_eq!(engine.len(), 6);
        assert_eq!(engine.ops()[0], EngineOp::PurgeAll);
        assert_eq!(cursors.get("fulltext").unwrap().unwrap().watermark, 3);
    }

    #[test]
    fn test_rebuild_single_type() {
        let (stores, engine, cursors) = setup();
        let lock = RunLock::new("fulltext");
        let lease = lock.try_acquire().unwrap();

        let report = rebuild_index(
            &IndexerConfig::default(),
            RebuildScope::Kind(EntityKind::Dataset),
            &stores,
            parsers(),
            &lease,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.indexed, 1);
        assert_eq!(report.log_watermark, None);
        assert!(engine.document("Dataset:3").is_some());
        assert_eq!(engine.ops()[0], EngineOp::PurgeType("Dataset".to_string()));
        assert!(cursors.get("fulltext").unwrap().is_none());
        assert!(cursors.get("fulltext.full_scan.Dataset").unwrap().is_some());
    }

    #[test]
    fn test_cancelled_rebuild_leaves_log_cursor() {
        let (stores, _engine, cursors) = setup();
        let lock = RunLock::new("fulltext");
        let lease = lock.try_acquire().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = rebuild_index(
            &IndexerConfig::default(),
            RebuildScope::All,
            &stores,
            parsers(),
            &lease,
            &cancel,
        )
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.batches, 0);
        assert!(cursors.get("fulltext").unwrap().is_none());
    }
}
