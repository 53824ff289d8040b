//! Bounded worker pool draining one cycle's work queue.
//!
//! Every worker loops: pop a chunk index, call the loader, and on failure
//! either push the index to the back of the shared queue (budget left) or
//! report it as permanently failed. Requeueing at the back staggers retries
//! behind chunks that have not had their first attempt yet. A loader that
//! panics is caught and charged as a failed attempt.

use futures_util::FutureExt;
use restock_core::{
    AttemptOutcome, ChunkAttemptEvent, DiagnosticLevel, LoadError, LoadKind, LoadResult,
    Watermark,
};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::engine::Engine;
use crate::ledger::RetryLedger;
use crate::loader::{LoadContext, Loader};
use crate::metrics::RefreshMetrics;
use crate::planner::ChunkPlan;

/// FIFO of chunk indices shared by every worker of a cycle.
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    inner: Mutex<VecDeque<usize>>,
}

impl WorkQueue {
    pub(crate) fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner: Mutex::new(indices.into_iter().collect()),
        }
    }

    pub(crate) fn pop(&self) -> Option<usize> {
        self.lock().pop_front()
    }

    pub(crate) fn push(&self, index: usize) {
        self.lock().push_back(index);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<usize>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Transient state of one refresh attempt, discarded when the cycle ends.
pub(crate) struct CycleRun<U> {
    pub(crate) cycle_id: Uuid,
    pub(crate) kind: LoadKind,
    pub(crate) identifier: String,
    pub(crate) since: Watermark,
    pub(crate) plan: ChunkPlan<U>,
    pub(crate) ledger: RetryLedger,
    pub(crate) queue: WorkQueue,
}

impl<U> CycleRun<U> {
    pub(crate) fn new(
        cycle_id: Uuid,
        kind: LoadKind,
        identifier: String,
        since: Watermark,
        plan: ChunkPlan<U>,
        retry_budget: u32,
    ) -> Self {
        let ledger = RetryLedger::new(plan.len(), retry_budget);
        let queue = WorkQueue::new(plan.indices());
        Self {
            cycle_id,
            kind,
            identifier,
            since,
            plan,
            ledger,
            queue,
        }
    }
}

/// How the pool finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PoolOutcome {
    pub(crate) workers: usize,
    pub(crate) panicked: usize,
    pub(crate) attempts: u64,
}

/// Run workers until the queue is drained or shutdown is signalled.
///
/// Never times out: while workers are busy a "still waiting" diagnostic is
/// emitted every heartbeat interval.
pub(crate) async fn drain<L: Loader>(
    engine: &Arc<Engine<L>>,
    run: &Arc<CycleRun<L::Chunk>>,
) -> PoolOutcome {
    let workers = engine.config.effective_pool_size().min(run.plan.len());
    let heartbeat = engine.config.heartbeat_interval;

    let mut set = JoinSet::new();
    for worker_id in 0..workers {
        let engine = Arc::clone(engine);
        let run = Arc::clone(run);
        let span = tracing::debug_span!("refresh_worker", worker_id);
        set.spawn(async move { run_worker(worker_id, &engine, &run).await }.instrument(span));
    }

    let mut outcome = PoolOutcome {
        workers,
        ..PoolOutcome::default()
    };
    let started = Instant::now();

    loop {
        match tokio::time::timeout(heartbeat, set.join_next()).await {
            Ok(Some(Ok(attempts))) => outcome.attempts += attempts,
            Ok(Some(Err(err))) => {
                outcome.panicked += 1;
                engine.diagnostic(
                    DiagnosticLevel::Error,
                    run.kind,
                    &format!("Refresh worker terminated abnormally: {}", err),
                );
            }
            Ok(None) => break,
            Err(_) => {
                engine.diagnostic(
                    DiagnosticLevel::Info,
                    run.kind,
                    &still_waiting_message(set.len(), run.queue.len(), started.elapsed()),
                );
            }
        }
    }

    outcome
}

/// Worker loop; returns the number of loader calls made.
///
/// Every dequeued chunk gets a ledger entry and an attempt event, whether the
/// loader returned or panicked.
async fn run_worker<L: Loader>(
    worker_id: usize,
    engine: &Engine<L>,
    run: &CycleRun<L::Chunk>,
) -> u64 {
    let mut attempts = 0u64;

    loop {
        if engine.is_shutting_down() {
            engine.diagnostic(
                DiagnosticLevel::Debug,
                run.kind,
                &format!("Shutdown signalled, refresh worker {} stopping", worker_id),
            );
            break;
        }
        let Some(index) = run.queue.pop() else {
            break;
        };
        let Some(chunk) = run.plan.get(index) else {
            continue;
        };

        let attempt = run.ledger.failures(index) + 1;
        let started = Instant::now();
        let result = AssertUnwindSafe(load_chunk(engine, run, index, chunk, attempt))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(LoadError::from_panic(panic.as_ref())));
        let elapsed = started.elapsed();
        attempts += 1;
        RefreshMetrics::incr(&engine.metrics.chunk_attempts);

        let outcome = match result {
            Ok(()) => {
                run.ledger.record_success(index);
                AttemptOutcome::Succeeded
            }
            Err(err) => {
                RefreshMetrics::incr(&engine.metrics.chunk_failures);
                let failures = run.ledger.record_failure(index);
                if run.ledger.should_retry(failures) {
                    run.queue.push(index);
                    AttemptOutcome::Retrying {
                        error: err.to_string(),
                    }
                } else {
                    RefreshMetrics::incr(&engine.metrics.chunks_exhausted);
                    AttemptOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            }
        };

        engine.telemetry.attempt(&ChunkAttemptEvent {
            identifier: run.identifier.clone(),
            cycle_id: run.cycle_id,
            kind: run.kind,
            chunk_index: index,
            chunk: format!("{:?}", chunk),
            attempt,
            elapsed,
            outcome,
        });
    }

    attempts
}

/// One loader call. Proposals reach the candidate watermark only on success.
async fn load_chunk<L: Loader>(
    engine: &Engine<L>,
    run: &CycleRun<L::Chunk>,
    index: usize,
    chunk: &L::Chunk,
    attempt: u32,
) -> LoadResult<()> {
    let ctx = LoadContext::new(&engine.registry, run.cycle_id, run.kind, index, attempt);
    match run.kind {
        LoadKind::Full => engine.loader.load_full(chunk, &ctx).await?,
        LoadKind::Incremental => {
            engine
                .loader
                .load_incremental(chunk, run.since, &ctx)
                .await?
        }
    }
    if let Some(proposed) = ctx.proposal() {
        engine.watermark.propose(proposed);
    }
    Ok(())
}

fn still_waiting_message(busy_workers: usize, queued: usize, elapsed: Duration) -> String {
    format!(
        "Still waiting for {} refresh worker(s) after {}ms ({} chunk(s) queued)",
        busy_workers,
        elapsed.as_millis(),
        queued
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo_with_requeue_at_back() {
        let queue = WorkQueue::new(0..3);
        let first = queue.pop();
        assert_eq!(first, Some(0));
        queue.push(0);

        let order: Vec<usize> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_cycle_run_seeds_queue_and_ledger() {
        let plan = ChunkPlan::new(vec!["a", "b"]).expect("distinct chunks should plan");
        let run = CycleRun::new(
            Uuid::now_v7(),
            LoadKind::Full,
            "Test_Full".to_string(),
            Watermark::zero(),
            plan,
            3,
        );
        assert_eq!(run.queue.len(), 2);
        assert_eq!(run.ledger.len(), 2);
        assert_eq!(run.ledger.budget(), 3);
    }

    #[test]
    fn test_still_waiting_message() {
        let msg = still_waiting_message(2, 5, Duration::from_millis(3000));
        assert!(msg.contains("2 refresh worker"));
        assert!(msg.contains("3000ms"));
        assert!(msg.contains("5 chunk"));
    }
}
