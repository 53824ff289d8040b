//! restock demo
//!
//! Runs a self-refreshing inventory cache over an in-memory warehouse split
//! into shards, one of which drops every other connection. Tune it with the
//! `RESTOCK_*` environment variables and `RUST_LOG`.

use async_trait::async_trait;
use restock_cache::{
    FixedChunks, LoadContext, LoadError, LoadResult, Loader, RefreshCache, RefreshConfig,
    Watermark,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type DemoResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const SHARDS: u16 = 4;
const SKUS_PER_SHARD: u32 = 25;
const FLAKY_SHARD: u16 = 2;
const ROUNDS: u32 = 5;

#[derive(Debug, Clone)]
struct StockLevel {
    sku: String,
    shard: u16,
    on_hand: i64,
    updated_at: Watermark,
}

/// In-memory stand-in for an inventory database.
#[derive(Debug, Default)]
struct Warehouse {
    rows: Mutex<Vec<StockLevel>>,
}

impl Warehouse {
    fn seeded() -> Self {
        let now = Watermark::now();
        let rows = (0..SHARDS)
            .flat_map(|shard| {
                (0..SKUS_PER_SHARD).map(move |n| StockLevel {
                    sku: format!("SKU-{}-{}", shard, n),
                    shard,
                    on_hand: 100,
                    updated_at: now,
                })
            })
            .collect();
        Self {
            rows: Mutex::new(rows),
        }
    }

    fn rows(&self) -> MutexGuard<'_, Vec<StockLevel>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Touch every seventh row, offset by `round`.
    fn restock(&self, round: u32) -> usize {
        let now = Watermark::now();
        let mut rows = self.rows();
        let mut touched = 0;
        for row in rows.iter_mut().skip(round as usize % 7).step_by(7) {
            row.on_hand += i64::from(round) * 10;
            row.updated_at = now;
            touched += 1;
        }
        touched
    }

    fn shard_rows(&self, shard: u16, since: Option<Watermark>) -> Vec<StockLevel> {
        self.rows()
            .iter()
            .filter(|row| row.shard == shard)
            .filter(|row| since.map_or(true, |since| row.updated_at.is_newer_than(&since)))
            .cloned()
            .collect()
    }
}

struct InventoryLoader {
    warehouse: Arc<Warehouse>,
    flaky_calls: AtomicU32,
}

impl InventoryLoader {
    fn new(warehouse: Arc<Warehouse>) -> Self {
        Self {
            warehouse,
            flaky_calls: AtomicU32::new(0),
        }
    }

    fn apply(
        &self,
        shard: u16,
        rows: Vec<StockLevel>,
        ctx: &LoadContext<'_, String, StockLevel>,
    ) -> LoadResult<()> {
        if shard == FLAKY_SHARD && self.flaky_calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            return Err(LoadError::new(format!("shard {} connection reset", shard)));
        }

        let newest = rows.iter().map(|row| row.updated_at).max();
        for row in rows {
            ctx.registry().put(row.sku.clone(), row);
        }
        if let Some(newest) = newest {
            ctx.propose(newest);
        }
        Ok(())
    }
}

#[async_trait]
impl Loader for InventoryLoader {
    type Key = String;
    type Item = StockLevel;
    type Chunk = u16;

    async fn load_full(
        &self,
        shard: &u16,
        ctx: &LoadContext<'_, String, StockLevel>,
    ) -> LoadResult<()> {
        let rows = self.warehouse.shard_rows(*shard, None);
        self.apply(*shard, rows, ctx)
    }

    async fn load_incremental(
        &self,
        shard: &u16,
        since: Watermark,
        ctx: &LoadContext<'_, String, StockLevel>,
    ) -> LoadResult<()> {
        let rows = self.warehouse.shard_rows(*shard, Some(since));
        self.apply(*shard, rows, ctx)
    }
}

#[tokio::main]
async fn main() -> DemoResult<()> {
    init_tracing()?;

    let warehouse = Arc::new(Warehouse::seeded());
    let cache = RefreshCache::builder_with_source(
        InventoryLoader::new(Arc::clone(&warehouse)),
        FixedChunks::new(0..SHARDS),
    )
    .config(demo_config())
    .build()?;

    cache.wait_ready().await?;
    tracing::info!(
        entries = cache.len(),
        watermark = %cache.committed_watermark(),
        "Inventory cache warmed up"
    );

    tokio::select! {
        result = drive(&cache, &warehouse) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    println!("{}", serde_json::to_string_pretty(&cache.metrics())?);
    cache.shutdown();
    Ok(())
}

/// Mutate the warehouse and pull the changes in with explicit refreshes.
async fn drive(cache: &RefreshCache<InventoryLoader>, warehouse: &Warehouse) -> DemoResult<()> {
    for round in 1..=ROUNDS {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let touched = warehouse.restock(round);

        match cache.run_now(false).await {
            Ok(Some(report)) => tracing::info!(
                round,
                touched,
                cycle_id = %report.cycle_id,
                attempts = report.attempts,
                watermark = %report.watermark,
                "Incremental refresh applied"
            ),
            Ok(None) => tracing::info!(round, "Refresh skipped"),
            Err(err) => tracing::warn!(round, error = %err, "Refresh failed"),
        }

        if let Some(level) = cache.try_get("SKU-0-0").await? {
            tracing::info!(sku = %level.sku, on_hand = level.on_hand, "Spot check");
        }
    }

    let report = cache.run_now(true).await?;
    tracing::info!(report = ?report, "Full reload finished");
    Ok(())
}

/// Demo defaults, overridable through the environment.
fn demo_config() -> RefreshConfig {
    let mut config = RefreshConfig::from_env();
    if std::env::var("RESTOCK_POOL_SIZE").is_err() {
        config = config.with_pool_size(2);
    }
    if std::env::var("RESTOCK_RETRY_BUDGET").is_err() {
        config = config.with_retry_budget(3);
    }
    if std::env::var("RESTOCK_REFRESH_INTERVAL_MS").is_err() {
        config = config.with_refresh_interval(Duration::from_secs(3));
    }
    config
}

fn init_tracing() -> DemoResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("restock_cache=debug,info"));

    let json = std::env::var("RESTOCK_LOG_JSON")
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
