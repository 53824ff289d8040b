//! Error types for restock operations

use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Chunk planning errors.
///
/// Raised before any work is dispatched, so a planning failure never leaves
/// partial side effects behind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Duplicate chunk {chunk} at indices {first_index} and {duplicate_index}")]
    DuplicateChunk {
        chunk: String,
        first_index: usize,
        duplicate_index: usize,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Error returned by loaders and chunk sources.
///
/// Loader failures are transient by contract: the worker pool retries the
/// chunk until its retry budget runs out, so the error only needs to carry a
/// human-readable message for telemetry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    /// Create a load error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Wrap any error value, keeping only its display text.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        Self::new(err.to_string())
    }

    /// Describe a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::new(format!("panicked: {}", detail))
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for LoadError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for LoadError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        Self::from_error(&err)
    }
}

/// Master error type for all restock errors.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Chunk source failed for {cache}: {source}")]
    ChunkSource { cache: String, source: LoadError },

    #[error("Timed out after {waited:?} waiting for refresh access on {cache}")]
    RefreshLockTimeout { cache: String, waited: Duration },

    #[error(
        "Refresh of {cache} failed: {permanently_failed} of {planned} chunks permanently failed, {unfinished} unfinished"
    )]
    RefreshFailed {
        cache: String,
        planned: usize,
        permanently_failed: usize,
        unfinished: usize,
    },

    #[error("Cache {cache} unavailable: not loaded within {waited:?}")]
    CacheUnavailable { cache: String, waited: Duration },
}

impl CacheError {
    /// Returns true if the error was caused by losing the race for refresh access.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::RefreshLockTimeout { .. })
    }

    /// Returns true if one or more chunks exhausted their retry budget.
    pub fn is_refresh_failed(&self) -> bool {
        matches!(self, Self::RefreshFailed { .. })
    }
}

/// Result type alias for restock operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for loader and chunk source calls.
pub type LoadResult<T> = Result<T, LoadError>;

// =============================================================================
// TESTS
// =============================================================================
