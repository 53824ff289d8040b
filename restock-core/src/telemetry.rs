//! Telemetry events and the sink boundary.
//!
//! The refresh engine reports one [`ChunkAttemptEvent`] per loader call and
//! forwards every diagnostic it logs. Events are always emitted through
//! `tracing`; a [`TelemetrySink`] receives a copy for external delivery
//! (metrics backends, audit tables, test recorders).
//!
//! Sinks are untrusted: a panicking sink is caught and ignored so telemetry
//! delivery can never take down a refresh cycle.

use crate::config::LoadKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Result of a single chunk attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// The loader returned successfully.
    Succeeded,
    /// The loader failed and the chunk was requeued.
    Retrying { error: String },
    /// The loader failed and the chunk exhausted its retry budget.
    Failed { error: String },
}

impl AttemptOutcome {
    /// Returns true if the attempt succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if this attempt was the chunk's last.
    pub fn is_final_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Error text for failed attempts.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Retrying { error } | Self::Failed { error } => Some(error),
        }
    }
}

/// One loader call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAttemptEvent {
    /// Telemetry tag, e.g. `PriceLoader_Incremental`
    pub identifier: String,
    /// Cycle this attempt belongs to
    pub cycle_id: Uuid,
    /// Full or incremental
    pub kind: LoadKind,
    /// Dense index of the chunk within its cycle
    pub chunk_index: usize,
    /// Debug rendering of the chunk value
    pub chunk: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Wall time spent inside the loader
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// Severity of a forwarded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// External receiver of refresh telemetry.
///
/// Implementations must be cheap; they are called from worker tasks while a
/// cycle is in progress.
pub trait TelemetrySink: Send + Sync {
    /// Receive the outcome of one chunk attempt.
    fn record_attempt(&self, event: &ChunkAttemptEvent);

    /// Receive a diagnostic message.
    fn record_message(&self, _level: DiagnosticLevel, _identifier: &str, _message: &str) {}
}

/// Sink that drops everything.
///
/// The engine traces every event itself, so this is the default when no
/// external delivery is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn record_attempt(&self, _event: &ChunkAttemptEvent) {}
}

/// Panic-isolating wrapper around a sink that also traces every event.
#[derive(Clone)]
pub struct Telemetry {
    sink: Arc<dyn TelemetrySink>,
}

impl Telemetry {
    /// Wrap a sink.
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    /// Telemetry that only traces.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Trace and deliver a chunk attempt.
    pub fn attempt(&self, event: &ChunkAttemptEvent) {
        match &event.outcome {
            AttemptOutcome::Succeeded => tracing::debug!(
                identifier = %event.identifier,
                cycle_id = %event.cycle_id,
                chunk_index = event.chunk_index,
                chunk = %event.chunk,
                attempt = event.attempt,
                elapsed_ms = duration_millis(event.elapsed),
                "Chunk loaded"
            ),
            AttemptOutcome::Retrying { error } => tracing::warn!(
                identifier = %event.identifier,
                cycle_id = %event.cycle_id,
                chunk_index = event.chunk_index,
                chunk = %event.chunk,
                attempt = event.attempt,
                elapsed_ms = duration_millis(event.elapsed),
                error = %error,
                "Chunk load failed, requeued"
            ),
            AttemptOutcome::Failed { error } => tracing::error!(
                identifier = %event.identifier,
                cycle_id = %event.cycle_id,
                chunk_index = event.chunk_index,
                chunk = %event.chunk,
                attempt = event.attempt,
                elapsed_ms = duration_millis(event.elapsed),
                error = %error,
                "Chunk load failed, retry budget exhausted"
            ),
        }

        let sink = &self.sink;
        if catch_unwind(AssertUnwindSafe(|| sink.record_attempt(event))).is_err() {
            tracing::trace!("Telemetry sink panicked in record_attempt, ignoring");
        }
    }

    /// Trace and deliver a diagnostic message.
    pub fn message(&self, level: DiagnosticLevel, identifier: &str, message: &str) {
        match level {
            DiagnosticLevel::Trace => tracing::trace!(identifier, "{}", message),
            DiagnosticLevel::Debug => tracing::debug!(identifier, "{}", message),
            DiagnosticLevel::Info => tracing::info!(identifier, "{}", message),
            DiagnosticLevel::Warn => tracing::warn!(identifier, "{}", message),
            DiagnosticLevel::Error => tracing::error!(identifier, "{}", message),
        }

        let sink = &self.sink;
        if catch_unwind(AssertUnwindSafe(|| {
            sink.record_message(level, identifier, message)
        }))
        .is_err()
        {
            tracing::trace!("Telemetry sink panicked in record_message, ignoring");
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry").finish_non_exhaustive()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PanickingSink;

    impl TelemetrySink for PanickingSink {
        fn record_attempt(&self, _event: &ChunkAttemptEvent) {
            panic!("sink exploded");
        }

        fn record_message(&self, _level: DiagnosticLevel, _identifier: &str, _message: &str) {
            panic!("sink exploded");
        }
    }

    #[derive(Default)]
    struct CountingSink {
        attempts: AtomicUsize,
        messages: AtomicUsize,
    }

    impl TelemetrySink for CountingSink {
        fn record_attempt(&self, _event: &ChunkAttemptEvent) {
            self.attempts.fetch_add(1, Ordering::SeqCst);
        }

        fn record_message(&self, _level: DiagnosticLevel, _identifier: &str, _message: &str) {
            self.messages.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_event(outcome: AttemptOutcome) -> ChunkAttemptEvent {
        ChunkAttemptEvent {
            identifier: "TestLoader_Full".to_string(),
            cycle_id: Uuid::now_v7(),
            kind: LoadKind::Full,
            chunk_index: 0,
            chunk: "WholeDataSet".to_string(),
            attempt: 1,
            elapsed: Duration::from_millis(12),
            outcome,
        }
    }

    #[test]
    fn test_panicking_sink_is_swallowed() {
        let telemetry = Telemetry::new(Arc::new(PanickingSink));
        telemetry.attempt(&make_event(AttemptOutcome::Succeeded));
        telemetry.message(DiagnosticLevel::Info, "TestLoader_Full", "hello");
    }

    #[test]
    fn test_events_reach_sink() {
        let sink = Arc::new(CountingSink::default());
        let telemetry = Telemetry::new(sink.clone());

        telemetry.attempt(&make_event(AttemptOutcome::Succeeded));
        telemetry.attempt(&make_event(AttemptOutcome::Failed {
            error: "boom".to_string(),
        }));
        telemetry.message(DiagnosticLevel::Warn, "TestLoader_Full", "still waiting");

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sink.messages.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duration_millis_saturates() {
        assert_eq!(duration_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_attempt_outcome_helpers() {
        assert!(AttemptOutcome::Succeeded.is_success());
        assert_eq!(AttemptOutcome::Succeeded.error(), None);

        let retry = AttemptOutcome::Retrying {
            error: "timeout".to_string(),
        };
        assert!(!retry.is_final_failure());
        assert_eq!(retry.error(), Some("timeout"));

        let failed = AttemptOutcome::Failed {
            error: "timeout".to_string(),
        };
        assert!(failed.is_final_failure());
    }
}
