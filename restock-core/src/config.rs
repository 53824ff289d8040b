//! Tuning configuration for the refresh engine

use crate::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_POOL_SIZE, DEFAULT_READY_TIMEOUT_SECS,
    DEFAULT_REFRESH_INTERVAL_MS, DEFAULT_RETRY_BUDGET, FULL_LOAD_SUFFIX, INCREMENTAL_LOAD_SUFFIX,
    MAX_POOL_SIZE,
};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which loader entry point a cycle drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadKind {
    /// Reload every chunk from scratch.
    Full,
    /// Load only what changed since the committed watermark.
    Incremental,
}

impl LoadKind {
    /// Build a load kind from the boolean flag used by on-demand refreshes.
    pub fn from_full(full: bool) -> Self {
        if full {
            Self::Full
        } else {
            Self::Incremental
        }
    }

    /// Returns true for full loads.
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    /// Suffix appended to telemetry identifiers.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Full => FULL_LOAD_SUFFIX,
            Self::Incremental => INCREMENTAL_LOAD_SUFFIX,
        }
    }
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Configuration for a self-refreshing cache.
///
/// Disabled schedules are expressed as `None`: a cache without a
/// `refresh_interval` never refreshes on its own and is ready immediately,
/// and a cache without a `full_reload_interval` runs a single full load
/// followed by incremental loads forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Workers per refresh cycle (clamped to `1..=100` when used)
    pub pool_size: usize,

    /// Time between scheduled cycles; `None` disables scheduling
    pub refresh_interval: Option<Duration>,

    /// Scheduled time after which the next cycle is forced to be a full load;
    /// `None` never forces another full load after the first
    pub full_reload_interval: Option<Duration>,

    /// Attempts per chunk within one cycle
    pub retry_budget: u32,

    /// How long readers wait for the first cycle before giving up
    pub ready_timeout: Duration,

    /// Period of the "still waiting" diagnostic while workers drain
    pub heartbeat_interval: Duration,

    /// Telemetry tag; derived from the loader type name when unset
    pub identifier: Option<String>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            refresh_interval: Some(Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS)),
            full_reload_interval: None,
            retry_budget: DEFAULT_RETRY_BUDGET,
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            identifier: None,
        }
    }
}

impl RefreshConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create RefreshConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RESTOCK_POOL_SIZE`: Workers per cycle (default: 1)
    /// - `RESTOCK_REFRESH_INTERVAL_MS`: Scheduling interval, negative disables (default: 30000)
    /// - `RESTOCK_FULL_RELOAD_INTERVAL_MS`: Time between full loads, negative means never (default: never)
    /// - `RESTOCK_RETRY_BUDGET`: Attempts per chunk per cycle (default: 1)
    /// - `RESTOCK_READY_TIMEOUT_SECS`: Reader wait for the first load (default: 300)
    /// - `RESTOCK_HEARTBEAT_INTERVAL_MS`: "Still waiting" diagnostic period (default: 3000)
    /// - `RESTOCK_IDENTIFIER`: Telemetry tag (default: derived from the loader type)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let pool_size = env_parse("RESTOCK_POOL_SIZE").unwrap_or(defaults.pool_size);

        let refresh_interval = match env_parse::<i64>("RESTOCK_REFRESH_INTERVAL_MS") {
            Some(ms) => signed_millis(ms),
            None => defaults.refresh_interval,
        };

        let full_reload_interval = match env_parse::<i64>("RESTOCK_FULL_RELOAD_INTERVAL_MS") {
            Some(ms) => signed_millis(ms),
            None => defaults.full_reload_interval,
        };

        let retry_budget = env_parse("RESTOCK_RETRY_BUDGET").unwrap_or(defaults.retry_budget);

        let ready_timeout = env_parse("RESTOCK_READY_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.ready_timeout);

        let heartbeat_interval = env_parse("RESTOCK_HEARTBEAT_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.heartbeat_interval);

        let identifier = std::env::var("RESTOCK_IDENTIFIER")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Self {
            pool_size,
            refresh_interval,
            full_reload_interval,
            retry_budget,
            ready_timeout,
            heartbeat_interval,
            identifier,
        }
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the scheduling interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Disable scheduled refreshes; only on-demand refreshes will run.
    pub fn without_schedule(mut self) -> Self {
        self.refresh_interval = None;
        self
    }

    /// Force a full load whenever this much scheduled time has elapsed.
    pub fn with_full_reload_interval(mut self, interval: Duration) -> Self {
        self.full_reload_interval = Some(interval);
        self
    }

    /// Set the per-chunk retry budget.
    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Set the reader readiness timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the worker heartbeat period.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the telemetry identifier.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Pool size clamped to the supported range.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.clamp(1, MAX_POOL_SIZE)
    }

    /// Timeout used when an explicit refresh waits for refresh access.
    ///
    /// Bounded by the scheduling interval; caches without a schedule fall
    /// back to the default interval.
    pub fn lock_timeout(&self) -> Duration {
        self.refresh_interval
            .unwrap_or(Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS))
    }

    /// Returns true if the scheduler should run.
    pub fn is_scheduled(&self) -> bool {
        self.refresh_interval.is_some()
    }

    /// Telemetry identifier for a given load kind.
    ///
    /// `type_name` is used when no explicit identifier was configured.
    pub fn identifier_for(&self, type_name: &str, kind: LoadKind) -> String {
        let base = self.identifier.as_deref().unwrap_or(type_name);
        format!("{}_{}", base, kind.suffix())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_budget == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry_budget".to_string(),
                value: "0".to_string(),
                reason: "every chunk needs at least one attempt".to_string(),
            });
        }

        if self.refresh_interval == Some(Duration::ZERO) {
            return Err(ConfigError::InvalidValue {
                field: "refresh_interval".to_string(),
                value: "0ms".to_string(),
                reason: "use without_schedule() to disable scheduling".to_string(),
            });
        }

        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat_interval".to_string(),
                value: "0ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Negative values mean "disabled".
fn signed_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms).ok().map(Duration::from_millis)
}
