//! State shared by the public cache handle, the scheduler and pool workers.

use restock_core::{DiagnosticLevel, LoadKind, RefreshConfig, Telemetry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::coordinator::CycleReport;
use crate::gate::ReadinessGate;
use crate::loader::{ChunkSource, Loader};
use crate::metrics::RefreshMetrics;
use crate::registry::EntryRegistry;
use crate::watermark::WatermarkTracker;

/// Everything one cache instance owns.
///
/// Refresh access is a per-instance mutex: at most one cycle, scheduled or
/// explicit, runs at a time, and unrelated caches never contend.
pub(crate) struct Engine<L: Loader> {
    pub(crate) loader: L,
    pub(crate) chunk_source: Arc<dyn ChunkSource<L::Chunk>>,
    pub(crate) registry: EntryRegistry<L::Key, L::Item>,
    pub(crate) watermark: WatermarkTracker,
    pub(crate) gate: ReadinessGate,
    pub(crate) config: RefreshConfig,
    pub(crate) telemetry: Telemetry,
    pub(crate) metrics: RefreshMetrics,
    pub(crate) refresh_lock: tokio::sync::Mutex<()>,
    pub(crate) connected: AtomicBool,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) last_report: Mutex<Option<CycleReport>>,
    pub(crate) type_name: String,
}

impl<L: Loader> Engine<L> {
    pub(crate) fn new(
        loader: L,
        chunk_source: Arc<dyn ChunkSource<L::Chunk>>,
        config: RefreshConfig,
        telemetry: Telemetry,
    ) -> Self {
        let (shutdown, _rx) = watch::channel(false);
        Self {
            loader,
            chunk_source,
            registry: EntryRegistry::new(),
            watermark: WatermarkTracker::new(),
            gate: ReadinessGate::new(),
            config,
            telemetry,
            metrics: RefreshMetrics::new(),
            refresh_lock: tokio::sync::Mutex::new(()),
            connected: AtomicBool::new(true),
            shutdown,
            last_report: Mutex::new(None),
            type_name: short_type_name::<L>(),
        }
    }

    pub(crate) fn identifier(&self, kind: LoadKind) -> String {
        self.config.identifier_for(&self.type_name, kind)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub(crate) fn diagnostic(&self, level: DiagnosticLevel, kind: LoadKind, message: &str) {
        self.telemetry
            .message(level, &self.identifier(kind), message);
    }

    /// Diagnostic not tied to a cycle, tagged with the bare identifier.
    pub(crate) fn lifecycle(&self, level: DiagnosticLevel, message: &str) {
        let identifier = self.config.identifier.as_deref().unwrap_or(&self.type_name);
        self.telemetry.message(level, identifier, message);
    }

    /// Stop serving fresh data; readers keep whatever is cached.
    pub(crate) fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.gate.open();
    }

    /// Stop the scheduler and tell workers to stop pulling work.
    ///
    /// In-flight loader calls are not interrupted.
    pub(crate) fn stop(&self) {
        self.disconnect();
        self.shutdown.send_replace(true);
    }

    pub(crate) fn record_report(&self, report: CycleReport) {
        let mut last = self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(report);
    }

    pub(crate) fn last_report(&self) -> Option<CycleReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PriceLoader;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<PriceLoader>(), "PriceLoader");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
        assert_eq!(short_type_name::<u32>(), "u32");
    }
}
