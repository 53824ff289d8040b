//! restock Core - Shared Types
//!
//! Value types used by every layer of the self-refreshing cache:
//! the error taxonomy, tuning configuration, the watermark timestamp
//! and the telemetry boundary. The refresh engine itself lives in
//! `restock-cache`.

pub mod config;
pub mod constants;
pub mod error;
pub mod telemetry;
pub mod watermark;

pub use config::{LoadKind, RefreshConfig};
pub use error::{CacheError, CacheResult, ConfigError, LoadError, LoadResult, PlanningError};
pub use telemetry::{
    duration_millis, AttemptOutcome, ChunkAttemptEvent, DiagnosticLevel, NoopSink, Telemetry,
    TelemetrySink,
};
pub use watermark::Watermark;
