//! Property-Based Tests for Refresh Cycles
//!
//! **Property 1: Bounded Retry**
//!
//! For any set of distinct chunks, any pool size and any retry budget R,
//! a chunk that always fails is attempted exactly R times in one cycle and a
//! chunk that never fails is attempted exactly once.
//!
//! **Property 2: All-or-Nothing Watermark**
//!
//! The committed watermark advances only when every planned chunk loads.

use proptest::prelude::*;
use restock_cache::{CacheError, Watermark};
use restock_test_utils::fixtures::{manual_cache, manual_config};
use restock_test_utils::generators::{arb_distinct_chunks, arb_watermark};
use restock_test_utils::MockLoader;
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

/// Distinct chunks paired with a failure mask of the same length.
fn chunks_with_failures() -> impl Strategy<Value = (Vec<u32>, Vec<bool>)> {
    arb_distinct_chunks(12).prop_flat_map(|chunks| {
        let n = chunks.len();
        (Just(chunks), proptest::collection::vec(any::<bool>(), n))
    })
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_attempts_are_bounded_by_budget(
        (chunks, failing) in chunks_with_failures(),
        pool_size in 1usize..=6,
        budget in 1u32..=4,
        proposed in arb_watermark(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let mut loader = MockLoader::new();
            for (chunk, fails) in chunks.iter().zip(&failing) {
                loader = if *fails {
                    loader.always_fail(*chunk)
                } else {
                    loader.propose_on(*chunk, proposed)
                };
            }

            let cache = manual_cache(
                loader.clone(),
                chunks.clone(),
                manual_config().with_pool_size(pool_size).with_retry_budget(budget),
            )
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let result = cache.run_now(true).await;
            let failing_count = failing.iter().filter(|f| **f).count();

            for (chunk, fails) in chunks.iter().zip(&failing) {
                let expected = if *fails { budget as usize } else { 1 };
                prop_assert_eq!(loader.attempts_for(*chunk), expected);
            }

            if failing_count == 0 {
                let report = result
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .ok_or_else(|| TestCaseError::fail("cycle did not run"))?;
                prop_assert_eq!(report.succeeded, chunks.len());
                let expected = if chunks.is_empty() { Watermark::zero() } else { proposed };
                prop_assert_eq!(cache.committed_watermark(), expected);
            } else {
                match result {
                    Err(CacheError::RefreshFailed { planned, permanently_failed, unfinished, .. }) => {
                        prop_assert_eq!(planned, chunks.len());
                        prop_assert_eq!(permanently_failed, failing_count);
                        prop_assert_eq!(unfinished, 0);
                    }
                    other => prop_assert!(false, "expected RefreshFailed, got {:?}", other),
                }
                prop_assert!(cache.committed_watermark().is_zero());
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_registry_holds_every_successful_chunk(
        (chunks, failing) in chunks_with_failures(),
        pool_size in 1usize..=6,
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let mut loader = MockLoader::new();
            for (chunk, fails) in chunks.iter().zip(&failing) {
                if *fails {
                    loader = loader.always_fail(*chunk);
                }
            }

            let cache = manual_cache(
                loader,
                chunks.clone(),
                manual_config().with_pool_size(pool_size),
            )
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let _ = cache.run_now(true).await;

            for (chunk, fails) in chunks.iter().zip(&failing) {
                let key = u64::from(*chunk) * 1000;
                let present = cache
                    .try_get(&key)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?
                    .is_some();
                prop_assert_eq!(present, !*fails);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
