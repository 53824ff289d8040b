//! Watermark tracking across refresh cycles.
//!
//! Two values live here. The committed watermark is the baseline handed to
//! incremental loads. The candidate is the running maximum that loaders
//! propose while a cycle is in flight; it replaces the committed value only
//! when the whole cycle succeeds.

use restock_core::Watermark;
use std::sync::{Mutex, MutexGuard};

/// Committed and candidate watermarks for one cache instance.
#[derive(Debug, Default)]
pub struct WatermarkTracker {
    committed: Mutex<Watermark>,
    candidate: Mutex<Watermark>,
}

impl WatermarkTracker {
    /// Create a tracker with both watermarks at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker starting from a known committed watermark.
    pub fn starting_at(committed: Watermark) -> Self {
        Self {
            committed: Mutex::new(committed),
            candidate: Mutex::new(committed),
        }
    }

    /// The baseline for the next incremental load.
    pub fn committed(&self) -> Watermark {
        *lock(&self.committed)
    }

    /// The running maximum proposed during the current cycle.
    pub fn candidate(&self) -> Watermark {
        *lock(&self.candidate)
    }

    /// Propose that the cache is complete through `watermark`.
    ///
    /// Keeps the maximum of all proposals; returns true if the candidate moved.
    pub fn propose(&self, watermark: Watermark) -> bool {
        let mut candidate = lock(&self.candidate);
        if watermark.is_newer_than(&candidate) {
            *candidate = watermark;
            true
        } else {
            false
        }
    }

    /// Reset the candidate to the committed value at the start of a cycle.
    pub(crate) fn seed(&self) -> Watermark {
        let committed = self.committed();
        *lock(&self.candidate) = committed;
        committed
    }

    /// Promote the candidate after a fully successful cycle.
    pub(crate) fn commit(&self) -> Watermark {
        let candidate = self.candidate();
        let mut committed = lock(&self.committed);
        if candidate.is_newer_than(&committed) {
            *committed = candidate;
        }
        *committed
    }

    /// Drop the candidate after a failed cycle.
    pub(crate) fn discard(&self) {
        self.seed();
    }
}

/// Critical sections never panic, so a poisoned lock still holds a valid value.
fn lock(mutex: &Mutex<Watermark>) -> MutexGuard<'_, Watermark> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
