//! Indexer counters and progress gauges.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running totals for one indexer, shared with status reporting.
#[derive(Debug, Default)]
pub struct IndexerMetrics {
    indexed: AtomicU64,
    purged: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    batches: AtomicU64,
    /// f64 bits
    percent_approx: AtomicU64,
    /// f64 bits, u64::MAX until first computed
    percent_exact: AtomicU64,
}

/// Point-in-time copy of [`IndexerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub indexed: u64,
    pub purged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub batches: u64,
    pub percent_approx: f64,
    pub percent_exact: Option<f64>,
}

impl IndexerMetrics {
    pub fn new() -> Self {
        Self {
            percent_exact: AtomicU64::new(u64::MAX),
            ..Default::default()
        }
    }

    pub fn record_indexed(&self) {
        self.indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purged(&self) {
        self.purged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_percent_approx(&self, percent: f64) {
        self.percent_approx.store(percent.to_bits(), Ordering::Relaxed);
    }

    pub fn set_percent_exact(&self, percent: f64) {
        self.percent_exact.store(percent.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let exact = self.percent_exact.load(Ordering::Relaxed);
        MetricsSnapshot {
            indexed: self.indexed.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            percent_approx: f64::from_bits(self.percent_approx.load(Ordering::Relaxed)),
            percent_exact: (exact != u64::MAX).then(|| f64::from_bits(exact)),
        }
    }
}
