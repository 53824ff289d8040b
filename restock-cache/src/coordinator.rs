//! Cycle coordination.
//!
//! One refresh attempt, end to end: hold refresh access, plan chunks, run the
//! worker pool, then commit or discard the candidate watermark. This is the
//! only path by which the committed watermark moves, and it moves all or
//! nothing: a cycle with any chunk that did not load advances nothing, even
//! though the chunks that did load have already written to the registry.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use restock_core::{
    duration_millis, CacheError, CacheResult, DiagnosticLevel, LoadError, LoadKind, Watermark,
};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::MutexGuard;
use tracing::Instrument;
use uuid::Uuid;

use crate::engine::Engine;
use crate::loader::Loader;
use crate::metrics::RefreshMetrics;
use crate::planner::ChunkPlan;
use crate::pool::{self, CycleRun};

/// Summary of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Correlation id shared by every log line and telemetry event of the cycle
    pub cycle_id: Uuid,
    pub kind: LoadKind,
    /// Chunks the source produced
    pub planned: usize,
    /// Chunks that loaded
    pub succeeded: usize,
    /// Loader calls made, retries included
    pub attempts: u64,
    /// Committed watermark after the cycle
    pub watermark: Watermark,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl CycleReport {
    /// Returns true if there was nothing to load.
    pub fn is_trivial(&self) -> bool {
        self.planned == 0
    }
}

impl<L: Loader> Engine<L> {
    /// Run an on-demand cycle, waiting at most the scheduling interval for
    /// refresh access.
    pub(crate) async fn refresh(self: &Arc<Self>, kind: LoadKind) -> CacheResult<CycleReport> {
        let waited = self.config.lock_timeout();
        let guard = match tokio::time::timeout(waited, self.refresh_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                self.diagnostic(
                    DiagnosticLevel::Warn,
                    kind,
                    &format!(
                        "Timed out after {}ms waiting for refresh access",
                        duration_millis(waited)
                    ),
                );
                return Err(CacheError::RefreshLockTimeout {
                    cache: self.type_name.clone(),
                    waited,
                });
            }
        };
        self.run_cycle(kind, guard).await
    }

    /// Run one cycle while holding refresh access.
    ///
    /// Access is released when `_access` drops, on every exit path.
    pub(crate) async fn run_cycle(
        self: &Arc<Self>,
        kind: LoadKind,
        _access: MutexGuard<'_, ()>,
    ) -> CacheResult<CycleReport> {
        let cycle_id = Uuid::now_v7();
        let identifier = self.identifier(kind);
        let span = tracing::info_span!("refresh_cycle", %cycle_id, identifier = %identifier);

        async move {
            RefreshMetrics::incr(&self.metrics.cycles_started);
            let result = self.execute(cycle_id, kind, identifier).await;
            match &result {
                Ok(report) => self.record_report(report.clone()),
                Err(err) => {
                    RefreshMetrics::incr(&self.metrics.cycles_failed);
                    self.diagnostic(
                        DiagnosticLevel::Error,
                        kind,
                        &format!("Refresh cycle failed: {}", err),
                    );
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        self: &Arc<Self>,
        cycle_id: Uuid,
        kind: LoadKind,
        identifier: String,
    ) -> CacheResult<CycleReport> {
        let started_at = Utc::now();
        let started = Instant::now();

        let chunks = AssertUnwindSafe(self.chunk_source.read_chunk_items())
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(LoadError::from_panic(panic.as_ref())))
            .map_err(|source| CacheError::ChunkSource {
                cache: self.type_name.clone(),
                source,
            })?;

        let plan = ChunkPlan::new(chunks)?;

        if plan.is_empty() {
            RefreshMetrics::incr(&self.metrics.cycles_trivial);
            self.diagnostic(DiagnosticLevel::Info, kind, "No chunks to load, skipping cycle");
            return Ok(CycleReport {
                cycle_id,
                kind,
                planned: 0,
                succeeded: 0,
                attempts: 0,
                watermark: self.watermark.committed(),
                started_at,
                elapsed: started.elapsed(),
            });
        }

        let planned = plan.len();
        let since = self.watermark.seed();
        self.diagnostic(
            DiagnosticLevel::Info,
            kind,
            &format!(
                "Refresh cycle started: {} chunk(s), pool size {}, retry budget {}, since {}",
                planned,
                self.config.effective_pool_size(),
                self.config.retry_budget,
                since
            ),
        );

        let run = Arc::new(CycleRun::new(
            cycle_id,
            kind,
            identifier,
            since,
            plan,
            self.config.retry_budget,
        ));
        let outcome = pool::drain(self, &run).await;

        // Loader calls in flight at shutdown may have written after the
        // registry was released.
        if self.is_shutting_down() {
            self.registry.clear();
        }

        let succeeded = run.ledger.succeeded();
        let permanently_failed = run.ledger.permanently_failed();
        let unfinished = planned.saturating_sub(succeeded + permanently_failed);

        if succeeded == planned {
            let watermark = self.watermark.commit();
            RefreshMetrics::incr(&self.metrics.cycles_succeeded);
            let elapsed = started.elapsed();
            self.diagnostic(
                DiagnosticLevel::Info,
                kind,
                &format!(
                    "Refresh cycle completed: {} chunk(s) on {} worker(s), {} attempt(s), watermark {}, {}ms",
                    planned,
                    outcome.workers,
                    outcome.attempts,
                    watermark,
                    duration_millis(elapsed)
                ),
            );
            return Ok(CycleReport {
                cycle_id,
                kind,
                planned,
                succeeded,
                attempts: outcome.attempts,
                watermark,
                started_at,
                elapsed,
            });
        }

        self.watermark.discard();
        self.diagnostic(
            DiagnosticLevel::Warn,
            kind,
            &format!(
                "Refresh cycle incomplete, watermark not advanced: {} of {} chunk(s) loaded, failed indices {:?}, {} unfinished, {} worker(s) panicked",
                succeeded,
                planned,
                run.ledger.exhausted_indices(),
                unfinished,
                outcome.panicked
            ),
        );
        Err(CacheError::RefreshFailed {
            cache: self.type_name.clone(),
            planned,
            permanently_failed,
            unfinished,
        })
    }
}
