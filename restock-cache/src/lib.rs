//! restock Cache - Self-Refreshing Read Cache
//!
//! A keyed in-memory store populated and periodically refreshed from an
//! external, possibly partitioned, data source. Readers never block on a
//! refresh beyond the initial warm-up.
//!
//! # Architecture
//!
//! - [`RefreshCache`]: public read surface and lifecycle
//! - [`scheduler`]: interval-driven cycles alternating full and incremental loads
//! - `coordinator`: one exclusive refresh attempt, all-or-nothing watermark commit
//! - `pool`: bounded workers draining a shared chunk queue with retry
//! - [`EntryRegistry`], [`ReadinessGate`], [`ChunkPlan`], [`RetryLedger`],
//!   [`WatermarkTracker`]: the building blocks
//!
//! What is loaded is entirely up to the caller's [`Loader`]; how the data
//! set is partitioned is up to its [`ChunkSource`].

pub mod cache;
mod coordinator;
mod engine;
pub mod gate;
pub mod ledger;
pub mod loader;
pub mod metrics;
pub mod planner;
mod pool;
pub mod registry;
pub mod scheduler;
pub mod watermark;

pub use cache::{RefreshCache, RefreshCacheBuilder};
pub use coordinator::CycleReport;
pub use gate::ReadinessGate;
pub use ledger::RetryLedger;
pub use loader::{ChunkSource, FixedChunks, LoadContext, Loader, SingleChunk, WholeDataSet};
pub use metrics::{RefreshMetrics, RefreshMetricsSnapshot};
pub use planner::ChunkPlan;
pub use registry::EntryRegistry;
pub use scheduler::LoadSchedule;
pub use watermark::WatermarkTracker;

// Re-export core types so callers need a single dependency
pub use restock_core::{
    AttemptOutcome, CacheError, CacheResult, ChunkAttemptEvent, ConfigError, DiagnosticLevel,
    LoadError, LoadKind, LoadResult, NoopSink, PlanningError, RefreshConfig, TelemetrySink,
    Watermark,
};
