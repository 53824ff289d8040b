//! Per-chunk retry accounting for one cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Failure counters and success flags, indexed by chunk.
///
/// A chunk is permanently failed once its failure count reaches the retry
/// budget. Counters are only touched by the worker currently holding the
/// chunk, but the coordinator reads them all after the pool drains, so each
/// slot is atomic rather than the ledger being locked as a whole.
#[derive(Debug)]
pub struct RetryLedger {
    failures: Vec<AtomicU32>,
    succeeded: Vec<AtomicBool>,
    budget: u32,
}

impl RetryLedger {
    /// Create a ledger for `chunks` chunks with the given attempt budget.
    pub fn new(chunks: usize, budget: u32) -> Self {
        Self {
            failures: (0..chunks).map(|_| AtomicU32::new(0)).collect(),
            succeeded: (0..chunks).map(|_| AtomicBool::new(false)).collect(),
            budget: budget.max(1),
        }
    }

    /// Attempts allowed per chunk.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Record a failed attempt, returning the post-increment failure count.
    pub fn record_failure(&self, index: usize) -> u32 {
        self.failures
            .get(index)
            .map(|count| count.fetch_add(1, Ordering::AcqRel) + 1)
            .unwrap_or(0)
    }

    /// Record that a chunk loaded successfully.
    pub fn record_success(&self, index: usize) {
        if let Some(flag) = self.succeeded.get(index) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Failed attempts so far for a chunk.
    pub fn failures(&self, index: usize) -> u32 {
        self.failures
            .get(index)
            .map(|count| count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Returns true if the chunk may be attempted again after a failure count of `failures`.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.budget
    }

    /// Returns true if the chunk has used up its budget.
    pub fn is_exhausted(&self, index: usize) -> bool {
        self.failures(index) >= self.budget
    }

    /// Returns true if the chunk loaded successfully.
    pub fn is_succeeded(&self, index: usize) -> bool {
        self.succeeded
            .get(index)
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Number of chunks that exhausted their budget.
    pub fn permanently_failed(&self) -> usize {
        (0..self.failures.len())
            .filter(|&index| self.is_exhausted(index))
            .count()
    }

    /// Number of chunks that loaded successfully.
    pub fn succeeded(&self) -> usize {
        (0..self.succeeded.len())
            .filter(|&index| self.is_succeeded(index))
            .count()
    }

    /// Indices of chunks that exhausted their budget.
    pub fn exhausted_indices(&self) -> Vec<usize> {
        (0..self.failures.len())
            .filter(|&index| self.is_exhausted(index))
            .collect()
    }

    /// Number of chunks tracked.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Returns true if the ledger tracks no chunks.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_of_one_means_no_retry() {
        let ledger = RetryLedger::new(2, 1);
        let failures = ledger.record_failure(0);
        assert_eq!(failures, 1);
        assert!(!ledger.should_retry(failures));
        assert!(ledger.is_exhausted(0));
        assert!(!ledger.is_exhausted(1));
        assert_eq!(ledger.permanently_failed(), 1);
        assert_eq!(ledger.exhausted_indices(), vec![0]);
    }

    #[test]
    fn test_recover_within_budget() {
        let ledger = RetryLedger::new(1, 3);
        assert!(ledger.should_retry(ledger.record_failure(0)));
        assert!(ledger.should_retry(ledger.record_failure(0)));
        ledger.record_success(0);

        assert_eq!(ledger.failures(0), 2);
        assert!(!ledger.is_exhausted(0));
        assert_eq!(ledger.succeeded(), 1);
        assert_eq!(ledger.permanently_failed(), 0);
    }

    #[test]
    fn test_zero_budget_is_treated_as_one() {
        let ledger = RetryLedger::new(1, 0);
        assert_eq!(ledger.budget(), 1);
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let ledger = RetryLedger::new(1, 2);
        assert_eq!(ledger.record_failure(5), 0);
        ledger.record_success(5);
        assert!(!ledger.is_succeeded(5));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_concurrent_failures_count_exactly() {
        let ledger = std::sync::Arc::new(RetryLedger::new(1, 1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = std::sync::Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        ledger.record_failure(0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should not panic");
        }
        assert_eq!(ledger.failures(0), 400);
    }
}
