//! Constants for restock
//!
//! Default tuning values shared by the config layer and the refresh engine.

// ============================================================================
// WORKER POOL
// ============================================================================

/// Default number of concurrent workers per refresh cycle
pub const DEFAULT_POOL_SIZE: usize = 1;

/// Upper bound on workers per refresh cycle
pub const MAX_POOL_SIZE: usize = 100;

/// Default attempts per chunk per cycle (1 means no retry)
pub const DEFAULT_RETRY_BUDGET: u32 = 1;

// ============================================================================
// SCHEDULING
// ============================================================================

/// Default interval between scheduled refresh cycles in milliseconds (30 seconds)
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;

/// Period of the "still waiting" diagnostic while a cycle drains its workers
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;

// ============================================================================
// READINESS
// ============================================================================

/// Default time readers wait for the first load in seconds (5 minutes)
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Identifier suffix for full-load telemetry
pub const FULL_LOAD_SUFFIX: &str = "Full";

/// Identifier suffix for incremental-load telemetry
pub const INCREMENTAL_LOAD_SUFFIX: &str = "Incremental";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_bounds_are_consistent() {
        assert!(DEFAULT_POOL_SIZE >= 1);
        assert!(DEFAULT_POOL_SIZE <= MAX_POOL_SIZE);
    }

    #[test]
    fn test_heartbeat_shorter_than_interval() {
        assert!(DEFAULT_HEARTBEAT_INTERVAL_MS < DEFAULT_REFRESH_INTERVAL_MS);
    }
}
