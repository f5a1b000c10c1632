//! Scheduled full-text indexing job.
//!
//! Each tick asks the [`RunCoordinator`] for a run in `Try` mode. A tick that
//! lands while the previous run is still going is skipped, so runs never
//! queue up behind each other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fts_indexing::AcquireMode;
use fts_types::ScheduleSettings;

use crate::coordinator::{RunCoordinator, RunOutcome};
use crate::{with_jitter, JitterConfig, SchedulerError, SchedulerService};

/// Name the job is registered under.
pub const INDEXING_JOB_NAME: &str = "fulltext_indexing";

/// Schedule for the indexing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingJobConfig {
    /// Cron expression (default: every 30 seconds)
    pub cron: String,

    /// Timezone for scheduling (default: "UTC")
    pub timezone: String,

    /// Max jitter in seconds (default: 5)
    pub jitter_secs: u64,
}

impl Default for IndexingJobConfig {
    fn default() -> Self {
        Self::from(&ScheduleSettings::default())
    }
}

impl From<&ScheduleSettings> for IndexingJobConfig {
    fn from(settings: &ScheduleSettings) -> Self {
        Self {
            cron: settings.cron.clone(),
            timezone: settings.timezone.clone(),
            jitter_secs: settings.jitter_secs,
        }
    }
}

impl IndexingJobConfig {
    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = cron.into();
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_jitter(mut self, jitter_secs: u64) -> Self {
        self.jitter_secs = jitter_secs;
        self
    }
}

/// Register the indexing job with the scheduler.
///
/// # Errors
///
/// Returns error if the cron expression or timezone is invalid.
pub async fn create_indexing_job(
    scheduler: &SchedulerService,
    coordinator: Arc<RunCoordinator>,
    config: IndexingJobConfig,
) -> Result<uuid::Uuid, SchedulerError> {
    let jitter = JitterConfig::new(config.jitter_secs);

    let uuid = scheduler
        .schedule(
            INDEXING_JOB_NAME,
            &config.cron,
            Some(&config.timezone),
            move |token| {
                let coordinator = coordinator.clone();
                async move {
                    with_jitter(jitter, async {
                        if token.is_cancelled() {
                            return;
                        }
                        run_indexing_job(&coordinator).await;
                    })
                    .await
                }
            },
        )
        .await?;

    info!(cron = %config.cron, jitter_secs = config.jitter_secs, "Registered indexing job");
    Ok(uuid)
}

/// One scheduled tick. Errors are logged; the next tick tries again.
async fn run_indexing_job(coordinator: &RunCoordinator) -> Option<RunOutcome<()>> {
    match coordinator.run(AcquireMode::Try).await {
        Ok(RunOutcome::Completed(report)) => {
            let failures = report.failures().count();
            if report.indexed() + report.purged() + failures > 0 {
                info!(
                    batches = report.batches.len(),
                    indexed = report.indexed(),
                    purged = report.purged(),
                    failures,
                    watermark = ?report.watermark(),
                    "Indexing job processed records"
                );
            } else {
                debug!("Indexing job: nothing to do");
            }
            Some(RunOutcome::Completed(()))
        }
        Ok(RunOutcome::Skipped) => Some(RunOutcome::Skipped),
        Ok(RunOutcome::Inactive) => Some(RunOutcome::Inactive),
        Err(e) => {
            warn!(error = %e, "Indexing job failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchedulerConfig;
    use chrono::{TimeZone, Utc};
    use fts_indexing::{Backlog, FullTextIndexer, IndexStores, IndexerConfig, ParserRegistry};
    use fts_search::{SearchIndex, SearchIndexConfig, SearchIndexer};
    use fts_storage::Storage;
    use fts_types::{Action, Details, Entity, EntityKind, Experimenter, Group};
    use std::time::Duration;
    use tempfile::TempDir;

    fn coordinator(dir: &TempDir) -> (Arc<Storage>, Arc<RunCoordinator>) {
        let storage = Arc::new(Storage::open(&dir.path().join("db")).unwrap());
        let index =
            SearchIndex::open_or_create(SearchIndexConfig::new(dir.path().join("index"))).unwrap();
        let stores =
            IndexStores::from_storage(storage.clone(), Arc::new(SearchIndexer::new(&index).unwrap()));
        let parsers = Arc::new(ParserRegistry::with_defaults(1024));
        let indexer = FullTextIndexer::from_stores(
            IndexerConfig::default(),
            &stores,
            Arc::new(Backlog::new()),
            parsers.clone(),
        )
        .unwrap();
        let coordinator = RunCoordinator::new(indexer, stores, parsers, storage.clone());
        (storage, Arc::new(coordinator))
    }

    fn image(id: u64) -> Entity {
        let details = Details {
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
            created: Utc.timestamp_millis_opt(0).unwrap(),
            updated: Utc.timestamp_millis_opt(0).unwrap(),
            permissions: "rw----".to_string(),
        };
        Entity::new(EntityKind::Image, id, details)
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ScheduleSettings {
            cron: "0 */5 * * * *".to_string(),
            jitter_secs: 0,
            ..Default::default()
        };
        let config = IndexingJobConfig::from(&settings).with_timezone("Europe/Paris");
        assert_eq!(config.cron, "0 */5 * * * *");
        assert_eq!(config.timezone, "Europe/Paris");
        assert_eq!(config.jitter_secs, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tick_runs_indexer() {
        let dir = TempDir::new().unwrap();
        let (storage, coordinator) = coordinator(&dir);
        let seq = storage.put_entity(&image(4), Action::Insert).unwrap();

        let outcome = run_indexing_job(&coordinator).await;
        assert!(matches!(outcome, Some(RunOutcome::Completed(()))));
        assert_eq!(coordinator.status().await.unwrap().watermark, seq);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tick_skips_while_running() {
        let dir = TempDir::new().unwrap();
        let (_storage, coordinator) = coordinator(&dir);

        let _lease = coordinator.lock().try_acquire().unwrap();
        let outcome = run_indexing_job(&coordinator).await;
        assert!(matches!(outcome, Some(RunOutcome::Skipped)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registered_job_fires() {
        let dir = TempDir::new().unwrap();
        let (storage, coordinator) = coordinator(&dir);
        let seq = storage.put_entity(&image(9), Action::Insert).unwrap();

        let mut scheduler = SchedulerService::new(SchedulerConfig::default())
            .await
            .unwrap();
        let config = IndexingJobConfig::default()
            .with_cron("* * * * * *")
            .with_jitter(0);
        create_indexing_job(&scheduler, coordinator.clone(), config)
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        let mut watermark = 0;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            watermark = coordinator.status().await.unwrap().watermark;
            if watermark == seq {
                break;
            }
        }
        scheduler.shutdown().await.unwrap();
        assert!(coordinator.shutdown().await);

        assert_eq!(watermark, seq);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_cron_rejected() {
        let dir = TempDir::new().unwrap();
        let (_storage, coordinator) = coordinator(&dir);
        let scheduler = SchedulerService::new(SchedulerConfig::default())
            .await
            .unwrap();

        let result = create_indexing_job(
            &scheduler,
            coordinator,
            IndexingJobConfig::default().with_cron("every minute"),
        )
        .await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));
    }
}
