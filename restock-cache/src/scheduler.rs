//! Scheduled refresh driver.
//!
//! One background task ticks at the configured interval and runs a cycle per
//! tick. Ticks are skipped, not queued, when the cache is disconnected or
//! an on-demand refresh already holds refresh access. The first tick fires
//! immediately so the cache warms up at construction.

use restock_core::{duration_millis, DiagnosticLevel, LoadKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::engine::Engine;
use crate::loader::Loader;
use crate::metrics::RefreshMetrics;

// ============================================================================
// LOAD KIND ROTATION
// ============================================================================

/// Decides whether each scheduled cycle is a full or incremental load.
///
/// Elapsed scheduled time is measured in ticks (`run_count * interval`), not
/// wall-clock time, so the rotation is unaffected by slow cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSchedule {
    run_count: u64,
}

impl LoadSchedule {
    /// Start with a full load.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cycles run since the last full load.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Kind of the next cycle; advances the run counter.
    pub fn next(&mut self, interval: Duration, full_reload_interval: Option<Duration>) -> LoadKind {
        if let Some(threshold) = full_reload_interval {
            let elapsed = interval
                .as_nanos()
                .saturating_mul(u128::from(self.run_count));
            if elapsed >= threshold.as_nanos() {
                self.run_count = 0;
            }
        }

        let kind = if self.run_count == 0 {
            LoadKind::Full
        } else {
            LoadKind::Incremental
        };
        self.run_count = self.run_count.saturating_add(1);
        kind
    }
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Spawn the scheduler task for `engine`.
pub(crate) fn spawn<L: Loader>(engine: Arc<Engine<L>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(run(engine, every))
}

/// Tick until shutdown is signalled.
///
/// A cycle in progress is awaited before shutdown is observed; its workers
/// stop pulling new chunks as soon as the signal is sent.
async fn run<L: Loader>(engine: Arc<Engine<L>>, every: Duration) {
    let mut shutdown_rx = engine.shutdown.subscribe();
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut schedule = LoadSchedule::new();

    let full_reload = match engine.config.full_reload_interval {
        Some(threshold) => format!("{}ms", duration_millis(threshold)),
        None => "never".to_string(),
    };
    engine.lifecycle(
        DiagnosticLevel::Info,
        &format!(
            "Refresh scheduler started: every {}ms, full reload after {}, pool size {}",
            duration_millis(every),
            full_reload,
            engine.config.effective_pool_size()
        ),
    );

    loop {
        if *shutdown_rx.borrow_and_update() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                tick(&engine, &mut schedule, every).await;
            }
        }
    }

    engine.lifecycle(DiagnosticLevel::Info, "Refresh scheduler stopped");
}

/// One scheduled firing. Failures are logged, never propagated.
async fn tick<L: Loader>(engine: &Arc<Engine<L>>, schedule: &mut LoadSchedule, every: Duration) {
    if !engine.is_connected() {
        RefreshMetrics::incr(&engine.metrics.ticks_skipped);
        engine.lifecycle(
            DiagnosticLevel::Debug,
            "Cache disconnected, skipping scheduled refresh",
        );
        return;
    }

    let access = match engine.refresh_lock.try_lock() {
        Ok(access) => access,
        Err(_) => {
            RefreshMetrics::incr(&engine.metrics.ticks_skipped);
            engine.lifecycle(
                DiagnosticLevel::Debug,
                "Refresh already in progress, skipping scheduled refresh",
            );
            return;
        }
    };

    let kind = schedule.next(every, engine.config.full_reload_interval);
    match engine.run_cycle(kind, access).await {
        Ok(report) => engine.diagnostic(
            DiagnosticLevel::Debug,
            kind,
            &format!(
                "Scheduled refresh {} completed with {} chunk(s)",
                report.cycle_id, report.planned
            ),
        ),
        Err(err) => engine.diagnostic(
            DiagnosticLevel::Warn,
            kind,
            &format!("Scheduled refresh failed, will retry next tick: {}", err),
        ),
    }

    if engine.gate.open() {
        engine.lifecycle(DiagnosticLevel::Info, "Cache ready after first refresh");
    }
}
