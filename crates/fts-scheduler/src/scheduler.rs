//! Cron runtime for the indexer daemon.
//!
//! Owns the [`JobScheduler`] and a stop token. Every tick receives the token
//! and is dropped without running once shutdown has begun, so a tick that
//! fires while the daemon is stopping never starts new indexer work.

use std::future::Future;
use std::sync::Arc;

use chrono_tz::Tz;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::parse_timezone;
use crate::{SchedulerConfig, SchedulerError};

pub struct SchedulerService {
    cron: JobScheduler,
    default_tz: Tz,
    stop: CancellationToken,
    started: bool,
}

impl SchedulerService {
    /// Fails on an unknown default timezone. Nothing fires before `start`.
    pub async fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let default_tz = config.parse_timezone()?;
        Ok(Self {
            cron: JobScheduler::new().await?,
            default_tz,
            stop: CancellationToken::new(),
            started: false,
        })
    }

    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.started {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.cron.start().await?;
        self.started = true;
        info!(timezone = %self.default_tz.name(), "Scheduler started");
        Ok(())
    }

    /// Cancel the stop token and stop firing ticks.
    ///
    /// A tick already in flight is not awaited here; the run coordinator
    /// waits for its own lease on shutdown.
    pub async fn shutdown(&mut self) -> Result<(), SchedulerError> {
        if !self.started {
            return Err(SchedulerError::NotRunning);
        }
        self.stop.cancel();
        self.started = false;
        self.cron.shutdown().await?;
        info!("Scheduler stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Register `tick` on a 6-field cron expression (sec min hour day month
    /// weekday), evaluated in `timezone` or the configured default.
    pub async fn schedule<F, Fut>(
        &self,
        name: &str,
        cron: &str,
        timezone: Option<&str>,
        tick: F,
    ) -> Result<Uuid, SchedulerError>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let tz = match timezone {
            Some(name) => parse_timezone(name)?,
            None => self.default_tz,
        };

        let tick = Arc::new(tick);
        let stop = self.stop.clone();
        let job_name = name.to_string();
        let job = Job::new_async_tz(cron, tz, move |_uuid, _lock| {
            let tick = tick.clone();
            let stop = stop.clone();
            let name = job_name.clone();
            Box::pin(async move {
                if stop.is_cancelled() {
                    debug!(job = %name, "Tick after shutdown ignored");
                    return;
                }
                tick(stop).await;
            })
        })
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", cron, e)))?;

        let uuid = self.cron.add(job).await?;
        info!(job = %name, %uuid, cron, timezone = %tz.name(), "Job scheduled");
        Ok(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn service() -> SchedulerService {
        SchedulerService::new(SchedulerConfig::default()).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_and_shutdown_cancel_token() {
        let mut scheduler = service().await;
        let stop = scheduler.stop_token();

        assert!(matches!(
            scheduler.shutdown().await,
            Err(SchedulerError::NotRunning)
        ));
        scheduler.start().await.unwrap();
        assert!(scheduler.is_started());
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        scheduler.shutdown().await.unwrap();
        assert!(!scheduler.is_started());
        assert!(stop.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_default_timezone() {
        let config = SchedulerConfig {
            default_timezone: "Atlantis/Capital".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            SchedulerService::new(config).await,
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_schedule_validates_cron_and_timezone() {
        let scheduler = service().await;

        let result = scheduler.schedule("bad", "every minute", None, |_| async {}).await;
        assert!(matches!(result, Err(SchedulerError::InvalidCron(_))));

        let result = scheduler
            .schedule("bad-tz", "0 0 * * * *", Some("Mars/Olympus"), |_| async {})
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidTimezone(_))));

        let uuid = scheduler
            .schedule("nightly", "0 0 2 * * *", Some("Europe/Berlin"), |_| async {})
            .await
            .unwrap();
        assert!(!uuid.is_nil());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ticks_stop_after_shutdown() {
        let mut scheduler = service().await;
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        scheduler
            .schedule("tick", "* * * * * *", None, move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let fired = ticks.load(Ordering::SeqCst);
        assert!(fired >= 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), fired);
    }
}
