//! Random start delay for scheduled runs.
//!
//! Several indexer processes sharing one cron expression would otherwise all
//! wake on the same second and contend for the primary store at once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Upper bound for the random delay applied before a scheduled run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// Maximum delay in seconds (0 = none)
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }

    /// A delay in `[0, max_jitter_secs)` with millisecond resolution.
    pub fn generate_jitter(&self) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }
}

/// Sleep for a random jitter, then await `job`.
pub async fn with_jitter<F, T>(config: JitterConfig, job: F) -> T
where
    F: Future<Output = T>,
{
    let jitter = config.generate_jitter();
    if !jitter.is_zero() {
        debug!(jitter_ms = jitter.as_millis() as u64, "Applying jitter delay");
        tokio::time::sleep(jitter).await;
    }
    job.await
}
