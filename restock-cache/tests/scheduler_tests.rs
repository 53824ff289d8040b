//! Scheduled refresh behavior under a paused clock.

use async_trait::async_trait;
use restock_cache::{
    CacheError, ChunkSource, DiagnosticLevel, FixedChunks, LoadKind, LoadResult, RefreshCache,
    Watermark,
};
use restock_test_utils::fixtures::scheduled_config;
use restock_test_utils::{MockLoader, RecordingSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

const EVERY: Duration = Duration::from_secs(10);

fn scheduled_cache(
    loader: MockLoader,
    chunks: impl IntoIterator<Item = u32>,
    config: restock_cache::RefreshConfig,
) -> RefreshCache<MockLoader> {
    RefreshCache::builder_with_source(loader, FixedChunks::new(chunks))
        .config(config)
        .build()
        .expect("valid config should build")
}

// ============================================================================
// WARM-UP
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_readers_block_until_first_cycle() {
    let loader = MockLoader::new().with_delay(Duration::from_secs(5));
    let cache = scheduled_cache(loader.clone(), 0..2, scheduled_config(EVERY));
    assert!(!cache.is_ready());
    assert!(cache.is_scheduled());

    let started = Instant::now();
    let entry = cache
        .try_get(&1000u64)
        .await
        .expect("first cycle completes within the ready timeout");

    assert!(entry.is_some());
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(cache.is_ready());
    assert_eq!(loader.cycle_kinds(), vec![LoadKind::Full]);
}

#[tokio::test(start_paused = true)]
async fn test_reader_gives_up_after_ready_timeout() {
    let loader = MockLoader::new().with_delay(Duration::from_secs(30));
    let cache = scheduled_cache(
        loader,
        0..1,
        scheduled_config(EVERY).with_ready_timeout(Duration::from_secs(5)),
    );

    let err = cache
        .try_get(&0u64)
        .await
        .expect_err("first cycle outlasts the ready timeout");
    match err {
        CacheError::CacheUnavailable { cache, waited } => {
            assert_eq!(cache, "MockLoader");
            assert_eq!(waited, Duration::from_secs(5));
        }
        other => panic!("expected CacheUnavailable, got {:?}", other),
    }
    assert!(!cache.is_ready());
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_cycle_still_opens_gate() {
    let loader = MockLoader::new().always_fail(0);
    let cache = scheduled_cache(loader, 0..2, scheduled_config(EVERY));

    cache.wait_ready().await.expect("gate opens after the first tick");
    assert!(cache.try_get(&1000u64).await.expect("cache is ready").is_some());
    assert!(cache.try_get(&0u64).await.expect("cache is ready").is_none());
    assert_eq!(cache.metrics().cycles_failed, 1);
    assert!(cache.committed_watermark().is_zero());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_chunk_source_does_not_kill_scheduler() {
    struct BrokenPartitionMap;

    #[async_trait]
    impl ChunkSource<u32> for BrokenPartitionMap {
        async fn read_chunk_items(&self) -> LoadResult<Vec<u32>> {
            panic!("partition map missing");
        }
    }

    let loader = MockLoader::new();
    let cache = RefreshCache::builder_with_source(loader.clone(), BrokenPartitionMap)
        .config(scheduled_config(EVERY))
        .build()
        .expect("valid config should build");

    cache.wait_ready().await.expect("gate opens after the first tick");

    // Ticks at 0s, 10s and 20s
    sleep(Duration::from_secs(25)).await;
    assert!(cache.is_scheduled());
    assert_eq!(cache.metrics().cycles_failed, 3);
    assert_eq!(loader.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unscheduled_cache_is_ready_immediately() {
    let loader = MockLoader::new();
    let cache = scheduled_cache(
        loader.clone(),
        0..2,
        scheduled_config(EVERY).without_schedule(),
    );

    assert!(cache.is_ready());
    assert!(!cache.is_scheduled());
    assert_eq!(cache.try_get(&0u64).await.expect("cache is ready"), None);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(loader.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_now_is_skipped_before_warm_up() {
    let loader = MockLoader::new().with_delay(Duration::from_secs(5));
    let cache = scheduled_cache(loader.clone(), 0..1, scheduled_config(EVERY));

    let skipped = cache.run_now(true).await.expect("skipped refresh is not an error");
    assert!(skipped.is_none());

    cache.wait_ready().await.expect("first cycle completes");
    assert_eq!(loader.cycles().len(), 1);
}

// ============================================================================
// ROTATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_full_and_incremental_rotation() {
    use LoadKind::{Full, Incremental};

    let loader = MockLoader::new();
    let _cache = scheduled_cache(
        loader.clone(),
        0..2,
        scheduled_config(EVERY).with_full_reload_interval(Duration::from_secs(25)),
    );

    // Ticks at 0s, 10s, ..., 70s
    sleep(Duration::from_secs(75)).await;

    assert_eq!(
        loader.cycle_kinds(),
        vec![Full, Incremental, Incremental, Full, Incremental, Incremental, Full, Incremental]
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_incremental_uses_committed_watermark() {
    let committed = Watermark::from_millis(123_456);
    let loader = MockLoader::new().propose_on(0, committed);
    let cache = scheduled_cache(loader.clone(), 0..2, scheduled_config(EVERY));

    sleep(Duration::from_secs(15)).await;

    let cycles = loader.cycles();
    assert_eq!(cycles.len(), 2);
    let second: Vec<_> = loader
        .calls()
        .into_iter()
        .filter(|call| call.cycle_id == cycles[1])
        .collect();
    assert!(second.iter().all(|call| call.kind == LoadKind::Incremental));
    assert!(second.iter().all(|call| call.since == Some(committed)));
    assert_eq!(cache.committed_watermark(), committed);
}

// ============================================================================
// OVERLAP AND LIFECYCLE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_tick_is_skipped_while_explicit_refresh_runs() {
    let start = Instant::now();
    let loader = MockLoader::new().with_delay(Duration::from_secs(4));
    let cache = Arc::new(scheduled_cache(loader.clone(), 0..1, scheduled_config(EVERY)));

    // First scheduled cycle runs 0s..4s
    cache.wait_ready().await.expect("first cycle completes");

    // Explicit cycle runs 8s..12s, covering the 10s tick
    sleep_until(start + Duration::from_secs(8)).await;
    let explicit = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move { cache.run_now(true).await })
    };

    // The 20s tick runs normally
    sleep_until(start + Duration::from_secs(25)).await;
    explicit
        .await
        .expect("refresh task should not panic")
        .expect("explicit refresh should succeed")
        .expect("cache is ready and connected");

    assert_eq!(cache.metrics().ticks_skipped, 1);
    assert_eq!(loader.cycles().len(), 3);
    assert!(!loader.saw_overlapping_cycles());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_opens_gate_and_stops_refreshing() {
    let loader = MockLoader::new();
    let cache = scheduled_cache(loader.clone(), 0..2, scheduled_config(EVERY));

    cache.disconnect();
    assert!(cache.is_ready());
    assert_eq!(cache.try_get(&0u64).await.expect("gate is open"), None);

    sleep(Duration::from_secs(35)).await;
    assert_eq!(loader.call_count(), 0);
    assert!(cache.metrics().ticks_skipped >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_diagnostics_reach_sink() {
    let sink = RecordingSink::new();
    let cache = RefreshCache::builder_with_source(MockLoader::new(), FixedChunks::new(0..1))
        .config(scheduled_config(EVERY).with_identifier("stock"))
        .telemetry(sink.clone())
        .build()
        .expect("valid config should build");
    cache.wait_ready().await.expect("first cycle completes");

    cache.disconnect();
    sleep(Duration::from_secs(15)).await;
    cache.shutdown();
    sleep(Duration::from_secs(1)).await;

    let messages = sink.messages();
    let saw = |level: DiagnosticLevel, identifier: &str, prefix: &str| {
        messages.iter().any(|m| {
            m.level == level && m.identifier == identifier && m.message.starts_with(prefix)
        })
    };
    assert!(saw(DiagnosticLevel::Info, "stock", "Refresh scheduler started"));
    assert!(saw(DiagnosticLevel::Debug, "stock_Full", "Scheduled refresh"));
    assert!(saw(DiagnosticLevel::Info, "stock", "Cache ready after first refresh"));
    assert!(saw(DiagnosticLevel::Debug, "stock", "Cache disconnected, skipping"));
    assert!(saw(DiagnosticLevel::Info, "stock", "Refresh scheduler stopped"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_scheduler() {
    let loader = MockLoader::new();
    let cache = scheduled_cache(loader.clone(), 0..2, scheduled_config(EVERY));
    cache.wait_ready().await.expect("first cycle completes");
    assert_eq!(cache.len(), 2);

    cache.shutdown();
    sleep(Duration::from_secs(1)).await;
    assert!(!cache.is_scheduled());
    assert!(cache.is_empty());

    let calls = loader.call_count();
    sleep(Duration::from_secs(100)).await;
    assert_eq!(loader.call_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_scheduler() {
    let loader = MockLoader::new();
    let cache = scheduled_cache(loader.clone(), 0..1, scheduled_config(EVERY));
    cache.wait_ready().await.expect("first cycle completes");
    drop(cache);

    let calls = loader.call_count();
    sleep(Duration::from_secs(100)).await;
    assert_eq!(loader.call_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycle_does_not_queue_missed_ticks() {
    let loader = MockLoader::new().with_delay(Duration::from_secs(25));
    let cache = scheduled_cache(loader, 0..1, scheduled_config(EVERY));

    // Cycles start at 0s and 30s; the 10s and 20s ticks are dropped
    sleep(Duration::from_secs(45)).await;
    let metrics = cache.metrics();
    assert_eq!(metrics.cycles_started, 2);
    assert_eq!(metrics.cycles_succeeded, 1);
}
