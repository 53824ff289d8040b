//! Refresh engine counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for refresh activity since the cache was built.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    /// Cycles that acquired refresh access
    pub cycles_started: AtomicU64,

    /// Cycles where every planned chunk loaded
    pub cycles_succeeded: AtomicU64,

    /// Cycles with no chunks to load
    pub cycles_trivial: AtomicU64,

    /// Cycles that ended in an error
    pub cycles_failed: AtomicU64,

    /// Scheduler ticks skipped due to overlap or disconnection
    pub ticks_skipped: AtomicU64,

    /// Loader calls made
    pub chunk_attempts: AtomicU64,

    /// Loader calls that failed
    pub chunk_failures: AtomicU64,

    /// Chunks that exhausted their retry budget
    pub chunks_exhausted: AtomicU64,
}

impl RefreshMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> RefreshMetricsSnapshot {
        RefreshMetricsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_succeeded: self.cycles_succeeded.load(Ordering::Relaxed),
            cycles_trivial: self.cycles_trivial.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            chunk_attempts: self.chunk_attempts.load(Ordering::Relaxed),
            chunk_failures: self.chunk_failures.load(Ordering::Relaxed),
            chunks_exhausted: self.chunks_exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshMetricsSnapshot {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_trivial: u64,
    pub cycles_failed: u64,
    pub ticks_skipped: u64,
    pub chunk_attempts: u64,
    pub chunk_failures: u64,
    pub chunks_exhausted: u64,
}

impl RefreshMetricsSnapshot {
    /// Fraction of loader calls that succeeded (0.0 to 1.0).
    ///
    /// Counters are read one at a time, so a snapshot taken mid-attempt may
    /// show more failures than attempts.
    pub fn attempt_success_rate(&self) -> f64 {
        if self.chunk_attempts == 0 {
            0.0
        } else {
            let succeeded = self.chunk_attempts.saturating_sub(self.chunk_failures);
            succeeded as f64 / self.chunk_attempts as f64
        }
    }
}
