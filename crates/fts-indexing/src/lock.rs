//! Single-flight run lock.
//!
//! One [`RunLock`] exists per logical index. Whoever wants to run the
//! indexer must hold its [`RunLease`], and the indexer takes the lease as a
//! parameter, so "is a run in progress" is never a free-floating flag.
//! The lease releases the lock when dropped, including on panic unwind.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::IndexingError;

/// How to acquire the run lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Give up immediately if another run holds the lock
    Try,
    /// Block up to the given duration
    Wait(Duration),
}

/// Shared lock service for one index key.
#[derive(Clone)]
pub struct RunLock {
    key: Arc<str>,
    inner: Arc<Mutex<()>>,
}

impl RunLock {
    pub fn new(key: &str) -> Self {
        Self {
            key: Arc::from(key),
            inner: Arc::new(Mutex::new(())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Acquire without waiting. None if a run is in progress.
    pub fn try_acquire(&self) -> Option<RunLease> {
        let guard = self.inner.clone().try_lock_owned().ok()?;
        debug!(key = %self.key, "Run lock acquired");
        Some(self.lease(guard))
    }

    /// Acquire, waiting at most `timeout`.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<RunLease, IndexingError> {
        match tokio::time::timeout(timeout, self.inner.clone().lock_owned()).await {
            Ok(guard) => {
                debug!(key = %self.key, "Run lock acquired after wait");
                Ok(self.lease(guard))
            }
            Err(_) => Err(IndexingError::LockTimeout(timeout)),
        }
    }

    /// Acquire according to `mode`. `Ok(None)` means a `Try` found the lock
    /// held.
    pub async fn acquire(&self, mode: AcquireMode) -> Result<Option<RunLease>, IndexingError> {
        match mode {
            AcquireMode::Try => Ok(self.try_acquire()),
            AcquireMode::Wait(timeout) => self.acquire_timeout(timeout).await.map(Some),
        }
    }

    /// Whether a lease is currently outstanding.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    fn lease(&self, guard: OwnedMutexGuard<()>) -> RunLease {
        RunLease {
            key: self.key.clone(),
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }
}

/// Proof of holding the run lock for one index key.
pub struct RunLease {
    key: Arc<str>,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl RunLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl std::fmt::Debug for RunLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLease")
            .field("key", &self.key)
            .field("held_for", &self.held_for())
            .finish()
    }
}
