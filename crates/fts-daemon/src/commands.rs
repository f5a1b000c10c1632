//! Command implementations for the indexer binary.
//!
//! Handles:
//! - start: open storage and index, register the cron job, run until a
//!   shutdown signal arrives
//! - admin: one-off operations under the run lock (cursor reset, rebuilds,
//!   targeted reindex, single runs, status)

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use fts_indexing::{
    AcquireMode, Backlog, FullTextIndexer, IndexStores, IndexerConfig, IndexerStatus,
    ParserRegistry, RebuildReport, RebuildScope, RunReport,
};
use fts_scheduler::{
    create_indexing_job, IndexingJobConfig, RunCoordinator, RunOutcome, SchedulerConfig,
    SchedulerService,
};
use fts_search::{SearchIndex, SearchIndexConfig, SearchIndexer};
use fts_storage::Storage;
use fts_types::{EntityKind, EntityRef, Settings};

use crate::cli::AdminCommands;

/// Values given on the command line, applied over loaded settings.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub db_path: Option<String>,
    pub index_path: Option<String>,
    pub log_level: Option<String>,
}

/// Load configuration (defaults -> file -> env) and apply CLI overrides.
pub fn load_settings(config_path: Option<&str>, overrides: Overrides) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(db_path) = overrides.db_path {
        settings.db_path = db_path;
    }
    if let Some(index_path) = overrides.index_path {
        settings.index_path = index_path;
    }
    if let Some(log_level) = overrides.log_level {
        settings.log_level = log_level;
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Opened storage, index and the coordinator driving the indexer.
pub struct IndexerRuntime {
    pub settings: Settings,
    pub storage: Arc<Storage>,
    pub index: SearchIndex,
    pub coordinator: Arc<RunCoordinator>,
}

impl IndexerRuntime {
    pub fn open(settings: Settings) -> Result<Self> {
        let db_path = settings.expanded_db_path();
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
        info!(path = ?db_path, "Opening storage");
        let storage = Arc::new(Storage::open(&db_path).context("Failed to open storage")?);

        let index_path = settings.expanded_index_path();
        let index = SearchIndex::open_or_create(SearchIndexConfig::new(index_path))
            .context("Failed to open search index")?;
        let engine = Arc::new(SearchIndexer::new(&index).context("Failed to open index writer")?);

        let stores = IndexStores::from_storage(storage.clone(), engine);
        let parsers = Arc::new(ParserRegistry::with_defaults(settings.indexer.max_file_size));
        let indexer = FullTextIndexer::from_stores(
            IndexerConfig::from(&settings.indexer),
            &stores,
            Arc::new(Backlog::new()),
            parsers.clone(),
        )
        .context("Failed to load indexer cursor")?;

        let coordinator = RunCoordinator::new(indexer, stores, parsers, storage.clone())
            .with_shutdown_timeout(Duration::from_secs(settings.schedule.shutdown_timeout_secs));

        Ok(Self {
            settings,
            storage,
            index,
            coordinator: Arc::new(coordinator),
        })
    }

    /// Admin commands wait for a scheduled run instead of skipping.
    fn wait_mode(&self) -> AcquireMode {
        AcquireMode::Wait(Duration::from_secs(self.settings.schedule.lock_wait_secs))
    }
}

/// Run the scheduled indexer until SIGINT/SIGTERM.
pub async fn start_daemon(settings: Settings) -> Result<()> {
    info!(
        db_path = %settings.db_path,
        index_path = %settings.index_path,
        cron = %settings.schedule.cron,
        index_key = %settings.indexer.index_key,
        "Full-text indexer starting"
    );

    let runtime = IndexerRuntime::open(settings)?;
    let schedule = &runtime.settings.schedule;

    let mut scheduler = SchedulerService::new(SchedulerConfig::from(schedule))
        .await
        .context("Failed to create scheduler")?;
    create_indexing_job(
        &scheduler,
        runtime.coordinator.clone(),
        IndexingJobConfig::from(schedule),
    )
    .await
    .context("Failed to register indexing job")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    shutdown_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler shutdown reported an error");
    }
    runtime.coordinator.shutdown().await;
    if let Err(e) = runtime.storage.flush() {
        warn!(error = %e, "Failed to flush storage on shutdown");
    }

    info!("Full-text indexer stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Open the runtime, run one admin command and print its output.
pub async fn handle_admin(settings: Settings, command: AdminCommands) -> Result<()> {
    let runtime = IndexerRuntime::open(settings)?;
    let output = run_admin(&runtime, command).await?;
    println!("{}", output);
    Ok(())
}

/// Execute an admin command and render its result.
pub async fn run_admin(runtime: &IndexerRuntime, command: AdminCommands) -> Result<String> {
    let coordinator = &runtime.coordinator;
    let mode = runtime.wait_mode();
    let key = &runtime.settings.indexer.index_key;

    match command {
        AdminCommands::ResetCursor { value } => {
            completed(coordinator.reset_cursor(mode, value).await?)?;
            Ok(format!("Cursor {} reset to {}", key, value))
        }
        AdminCommands::Rebuild => {
            let report = completed(coordinator.rebuild(mode, RebuildScope::All).await?)?;
            Ok(format_rebuild(&report))
        }
        AdminCommands::RebuildType { entity_type } => {
            let kind = EntityKind::parse(&entity_type)
                .with_context(|| format!("Unknown entity type: {}", entity_type))?;
            let report = completed(coordinator.rebuild(mode, RebuildScope::Kind(kind)).await?)?;
            Ok(format_rebuild(&report))
        }
        AdminCommands::Reindex { entity_type, id } => {
            let kind = EntityKind::parse(&entity_type)
                .with_context(|| format!("Unknown entity type: {}", entity_type))?;
            let entity = EntityRef::new(kind, id);
            let queued = coordinator.request_reindex(entity);
            let report = completed(coordinator.run_once(mode, false).await?)?;
            let note = if queued { "queued" } else { "already queued" };
            Ok(format!("Reindex {} {}\n{}", entity, note, format_run(&report, false)))
        }
        AdminCommands::RunOnce { dry_run } => {
            let report = completed(coordinator.run_once(mode, dry_run).await?)?;
            Ok(format_run(&report, dry_run))
        }
        AdminCommands::Status { json } => {
            let status = coordinator.status().await?;
            if json {
                Ok(serde_json::to_string_pretty(&status)?)
            } else {
                Ok(format_status(&status))
            }
        }
    }
}

fn completed<T>(outcome: RunOutcome<T>) -> Result<T> {
    match outcome {
        RunOutcome::Completed(value) => Ok(value),
        RunOutcome::Skipped => bail!("Indexer is currently running"),
        RunOutcome::Inactive => bail!("Indexer is shutting down"),
    }
}

fn format_run(report: &RunReport, dry_run: bool) -> String {
    let mut out = format!(
        "{}Batches: {}\nIndexed: {}\nPurged: {}\nFailures: {}\nWatermark: {}",
        if dry_run { "Dry run\n" } else { "" },
        report.batches.len(),
        report.indexed(),
        report.purged(),
        report.failures().count(),
        report
            .watermark()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    for failure in report.failures() {
        out.push_str(&format!(
            "\n  {} {}:{} seq {}: {}",
            failure.kind,
            failure.record.entity_type,
            failure.record.entity_id,
            failure.record.sequence_id,
            failure.message
        ));
    }
    out
}

fn format_rebuild(report: &RebuildReport) -> String {
    let mut out = format!(
        "Rebuilt {:?}: {} of {} entities indexed, {} purged, {} failed, {} batches",
        report.scope, report.indexed, report.total, report.purged, report.failed, report.batches
    );
    if let Some(watermark) = report.log_watermark {
        out.push_str(&format!("\nCursor set to {}", watermark));
    }
    if report.cancelled {
        out.push_str("\nRebuild was cancelled before completion");
    }
    out
}

fn format_status(status: &IndexerStatus) -> String {
    let exact = status
        .metrics
        .percent_exact
        .map(|p| format!("{:.1}%", p))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "Index key:        {}\nWatermark:        {}\nHighest sequence: {}\nBacklog estimate: {}\nQueued reindex:   {}\nProgress:         {:.1}% (exact {})",
        status.key,
        status.watermark,
        status.highest_sequence,
        status.backlog_estimate,
        status.backlog.pending,
        status.metrics.percent_approx,
        exact,
    )
}
