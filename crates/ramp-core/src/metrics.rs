//! Process-wide fold execution counters.
//!
//! Incremented by the fold executor; [`Metrics::flush`] reports them as one
//! `info!` event, which the scheduler does at the end of every batch.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    folds_executed: AtomicU64,
    fold_failures: AtomicU64,
    cache_hits: AtomicU64,
    retrains: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            folds_executed: AtomicU64::new(0),
            fold_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            retrains: AtomicU64::new(0),
        }
    }

    pub fn inc_folds_executed(&self) {
        self.folds_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "folds_executed", "counter incremented");
    }

    pub fn inc_fold_failures(&self) {
        self.fold_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fold_failures", "counter incremented");
    }

    /// A stored model was reused instead of fitting.
    pub fn inc_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_hits", "counter incremented");
    }

    /// A stored model existed but was unusable and had to be refitted.
    pub fn inc_retrains(&self) {
        self.retrains.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retrains", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            folds_executed = self.folds_executed(),
            fold_failures = self.fold_failures(),
            cache_hits = self.cache_hits(),
            retrains = self.retrains(),
        );
    }

    pub fn folds_executed(&self) -> u64 {
        self.folds_executed.load(Ordering::Relaxed)
    }

    pub fn fold_failures(&self) -> u64 {
        self.fold_failures.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn retrains(&self) -> u64 {
        self.retrains.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        self.folds_executed.store(0, Ordering::Relaxed);
        self.fold_failures.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.retrains.store(0, Ordering::Relaxed);
    }
}
