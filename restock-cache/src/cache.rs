//! Public cache handle.

use restock_core::{
    CacheError, CacheResult, DiagnosticLevel, LoadKind, NoopSink, RefreshConfig, Telemetry,
    TelemetrySink, Watermark,
};
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::coordinator::CycleReport;
use crate::engine::Engine;
use crate::loader::{ChunkSource, Loader, SingleChunk};
use crate::metrics::RefreshMetricsSnapshot;
use crate::scheduler;

/// A keyed in-memory cache that refreshes itself from a [`Loader`].
///
/// Building the cache starts its scheduler (when an interval is configured),
/// which runs the first cycle immediately. Readers wait for that first cycle,
/// up to the configured readiness timeout, and never wait on later ones.
///
/// Dropping the handle stops the scheduler; call [`RefreshCache::shutdown`]
/// to also release cached entries.
///
/// # Example
///
/// ```ignore
/// let cache = RefreshCache::builder_with_source(PriceLoader::new(db), FixedChunks::new(shards))
///     .config(RefreshConfig::new().with_pool_size(4).with_retry_budget(3))
///     .build()?;
///
/// let price = cache.try_get(&sku).await?;
/// ```
pub struct RefreshCache<L: Loader> {
    engine: Arc<Engine<L>>,
    scheduler: Option<JoinHandle<()>>,
}

/// Builder for [`RefreshCache`].
pub struct RefreshCacheBuilder<L: Loader> {
    loader: L,
    chunk_source: Arc<dyn ChunkSource<L::Chunk>>,
    config: RefreshConfig,
    sink: Arc<dyn TelemetrySink>,
}

impl<L> RefreshCache<L>
where
    L: Loader,
    L::Chunk: Default,
{
    /// Start building a cache that loads the whole data set as one chunk.
    pub fn builder(loader: L) -> RefreshCacheBuilder<L> {
        Self::builder_with_source(loader, SingleChunk::<L::Chunk>::default())
    }
}

impl<L: Loader> RefreshCache<L> {
    /// Start building a cache with a custom partitioning policy.
    pub fn builder_with_source<S>(loader: L, chunk_source: S) -> RefreshCacheBuilder<L>
    where
        S: ChunkSource<L::Chunk> + 'static,
    {
        RefreshCacheBuilder {
            loader,
            chunk_source: Arc::new(chunk_source),
            config: RefreshConfig::default(),
            sink: Arc::new(NoopSink),
        }
    }

    /// Wait, bounded by the readiness timeout, for the first cycle.
    pub async fn wait_ready(&self) -> CacheResult<()> {
        let waited = self.engine.config.ready_timeout;
        if self.engine.gate.wait_ready(waited).await {
            Ok(())
        } else {
            Err(CacheError::CacheUnavailable {
                cache: self.engine.type_name.clone(),
                waited,
            })
        }
    }

    /// Look up an item.
    pub async fn try_get<Q>(&self, key: &Q) -> CacheResult<Option<L::Item>>
    where
        L::Key: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.wait_ready().await?;
        Ok(self.engine.registry.get(key))
    }

    /// Every item matching the predicate.
    pub async fn search<F>(&self, predicate: F) -> CacheResult<Vec<L::Item>>
    where
        F: Fn(&L::Item) -> bool,
    {
        self.wait_ready().await?;
        Ok(self.engine.registry.scan(predicate).collect())
    }

    /// Every key currently cached.
    pub async fn all_keys(&self) -> CacheResult<Vec<L::Key>> {
        self.wait_ready().await?;
        Ok(self.engine.registry.keys().collect())
    }

    /// Run a cycle now and wait for it.
    ///
    /// Only runs when the cache is both ready and connected; otherwise
    /// returns `Ok(None)` without doing anything. Unlike scheduled cycles,
    /// failures are returned to the caller.
    pub async fn run_now(&self, full: bool) -> CacheResult<Option<CycleReport>> {
        let (ready, connected) = (self.is_ready(), self.is_connected());
        if !ready || !connected {
            self.engine.lifecycle(
                DiagnosticLevel::Debug,
                &format!(
                    "On-demand refresh skipped (ready: {}, connected: {})",
                    ready, connected
                ),
            );
            return Ok(None);
        }
        self.engine.refresh(LoadKind::from_full(full)).await.map(Some)
    }

    /// Stop refreshing and serve whatever is cached.
    ///
    /// Opens the readiness gate so no reader waits for a load that will
    /// never come.
    pub fn disconnect(&self) {
        self.engine.disconnect();
        self.engine.lifecycle(DiagnosticLevel::Info, "Cache disconnected");
    }

    /// Stop the scheduler and release cached entries.
    ///
    /// In-flight loader calls finish on their own; no new chunks are started.
    /// Entries those calls write are released again when their cycle ends.
    pub fn shutdown(&self) {
        self.engine.stop();
        self.engine.registry.clear();
        self.engine.lifecycle(DiagnosticLevel::Info, "Cache shut down");
    }

    /// Returns true once the first cycle has completed (or scheduling is off).
    pub fn is_ready(&self) -> bool {
        self.engine.gate.is_open()
    }

    /// Returns true until the cache is disconnected or shut down.
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Returns true while the scheduler task is alive.
    pub fn is_scheduled(&self) -> bool {
        self.scheduler
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Baseline of the next incremental load.
    pub fn committed_watermark(&self) -> Watermark {
        self.engine.watermark.committed()
    }

    /// Number of cached entries, without waiting for readiness.
    pub fn len(&self) -> usize {
        self.engine.registry.len()
    }

    /// Returns true if nothing is cached, without waiting for readiness.
    pub fn is_empty(&self) -> bool {
        self.engine.registry.is_empty()
    }

    /// Report of the last cycle that completed without error.
    pub fn last_report(&self) -> Option<CycleReport> {
        self.engine.last_report()
    }

    /// Refresh counters.
    pub fn metrics(&self) -> RefreshMetricsSnapshot {
        self.engine.metrics.snapshot()
    }

    /// Telemetry tag used for cycles of the given kind.
    pub fn identifier(&self, kind: LoadKind) -> String {
        self.engine.identifier(kind)
    }

    /// The tuning in effect.
    pub fn config(&self) -> &RefreshConfig {
        &self.engine.config
    }

    /// The loader this cache drives.
    pub fn loader(&self) -> &L {
        &self.engine.loader
    }
}

impl<L: Loader> Drop for RefreshCache<L> {
    fn drop(&mut self) {
        self.engine.stop();
    }
}

impl<L: Loader> RefreshCacheBuilder<L> {
    /// Set the tuning configuration.
    pub fn config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    /// Deliver telemetry to `sink` in addition to tracing.
    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink + 'static,
    {
        self.sink = Arc::new(sink);
        self
    }

    /// Deliver telemetry to a shared sink.
    pub fn telemetry_shared(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validate the config and start the cache.
    ///
    /// Must be called inside a tokio runtime when scheduling is enabled.
    pub fn build(self) -> CacheResult<RefreshCache<L>> {
        self.config.validate()?;

        let every = self.config.refresh_interval;
        let engine = Arc::new(Engine::new(
            self.loader,
            self.chunk_source,
            self.config,
            Telemetry::new(self.sink),
        ));

        let scheduler = match every {
            Some(every) => Some(scheduler::spawn(Arc::clone(&engine), every)),
            None => {
                engine.gate.open();
                engine.lifecycle(
                    DiagnosticLevel::Info,
                    "Scheduled refresh disabled, cache ready immediately",
                );
                None
            }
        };

        Ok(RefreshCache { engine, scheduler })
    }
}
