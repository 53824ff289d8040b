//! restock Test Utilities
//!
//! Shared test infrastructure for the restock workspace:
//! - A scriptable mock loader that records every call
//! - A chunk source whose output can be changed between cycles
//! - Telemetry sinks that record or panic
//! - Proptest generators for core types

// Re-export core types for convenience
pub use restock_cache::{
    AttemptOutcome, CacheError, CacheResult, ChunkAttemptEvent, ChunkSource, CycleReport,
    DiagnosticLevel, FixedChunks, LoadContext, LoadError, LoadKind, LoadResult, Loader,
    RefreshCache, RefreshConfig, TelemetrySink, Watermark,
};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// MOCK LOADER
// ============================================================================

/// Item written by [`MockLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEntry {
    pub key: u64,
    pub chunk: u32,
    pub kind: LoadKind,
    /// Global call number that wrote this entry
    pub written_by_call: usize,
}

/// One recorded loader call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCall {
    pub cycle_id: Uuid,
    pub kind: LoadKind,
    pub chunk: u32,
    pub attempt: u32,
    /// Baseline passed to incremental loads
    pub since: Option<Watermark>,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct MockScript {
    fail_next: HashMap<u32, u32>,
    always_fail: HashSet<u32>,
    proposals: HashMap<u32, Watermark>,
    delay: Option<Duration>,
    entries_per_chunk: u64,
    calls: Vec<LoadCall>,
    active_cycles: HashMap<Uuid, usize>,
}

#[derive(Debug, Default)]
struct MockState {
    script: Mutex<MockScript>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    overlapping_cycles: AtomicBool,
}

/// Scriptable loader over `u32` chunks.
///
/// Each successful call writes `entries_per_chunk` entries keyed
/// `chunk * 1000 + n` and proposes the chunk's scripted watermark, if any.
/// Clones share state, so a test can keep a handle after moving one into a
/// cache.
#[derive(Debug, Clone)]
pub struct MockLoader {
    state: Arc<MockState>,
}

impl Default for MockLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLoader {
    pub fn new() -> Self {
        let loader = Self {
            state: Arc::new(MockState::default()),
        };
        lock(&loader.state.script).entries_per_chunk = 1;
        loader
    }

    /// Fail the next `times` calls for `chunk`, then succeed.
    pub fn fail_times(self, chunk: u32, times: u32) -> Self {
        lock(&self.state.script).fail_next.insert(chunk, times);
        self
    }

    /// Fail every call for `chunk`.
    pub fn always_fail(self, chunk: u32) -> Self {
        lock(&self.state.script).always_fail.insert(chunk);
        self
    }

    /// Stop failing `chunk`.
    pub fn heal(&self, chunk: u32) {
        let mut script = lock(&self.state.script);
        script.always_fail.remove(&chunk);
        script.fail_next.remove(&chunk);
    }

    /// Propose `watermark` whenever `chunk` loads successfully.
    pub fn propose_on(self, chunk: u32, watermark: Watermark) -> Self {
        lock(&self.state.script).proposals.insert(chunk, watermark);
        self
    }

    /// Sleep inside every call.
    pub fn with_delay(self, delay: Duration) -> Self {
        lock(&self.state.script).delay = Some(delay);
        self
    }

    pub fn with_entries_per_chunk(self, entries: u64) -> Self {
        lock(&self.state.script).entries_per_chunk = entries;
        self
    }

    /// Every call made so far, in completion order.
    pub fn calls(&self) -> Vec<LoadCall> {
        lock(&self.state.script).calls.clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.state.script).calls.len()
    }

    /// Calls made for `chunk` across all cycles.
    pub fn attempts_for(&self, chunk: u32) -> usize {
        lock(&self.state.script)
            .calls
            .iter()
            .filter(|call| call.chunk == chunk)
            .count()
    }

    /// Distinct cycles observed, in first-seen order.
    pub fn cycles(&self) -> Vec<Uuid> {
        let script = lock(&self.state.script);
        let mut seen = Vec::new();
        for call in &script.calls {
            if !seen.contains(&call.cycle_id) {
                seen.push(call.cycle_id);
            }
        }
        seen
    }

    /// Load kinds of each observed cycle, in order.
    pub fn cycle_kinds(&self) -> Vec<LoadKind> {
        let calls = self.calls();
        self.cycles()
            .into_iter()
            .filter_map(|id| calls.iter().find(|c| c.cycle_id == id).map(|c| c.kind))
            .collect()
    }

    /// Highest number of calls ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Returns true if calls from two different cycles ever ran at once.
    pub fn saw_overlapping_cycles(&self) -> bool {
        self.state.overlapping_cycles.load(Ordering::SeqCst)
    }

    fn enter(&self, cycle_id: Uuid) {
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut script = lock(&self.state.script);
        *script.active_cycles.entry(cycle_id).or_insert(0) += 1;
        if script.active_cycles.len() > 1 {
            self.state.overlapping_cycles.store(true, Ordering::SeqCst);
        }
    }

    fn exit(&self, cycle_id: Uuid) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut script = lock(&self.state.script);
        if let Some(count) = script.active_cycles.get_mut(&cycle_id) {
            *count -= 1;
            if *count == 0 {
                script.active_cycles.remove(&cycle_id);
            }
        }
    }

    /// Decide the outcome of a call and record it.
    fn settle(&self, chunk: u32, since: Option<Watermark>, ctx: &LoadContext<'_, u64, MockEntry>) -> LoadResult<()> {
        let mut script = lock(&self.state.script);

        let fail = if script.always_fail.contains(&chunk) {
            true
        } else if let Some(remaining) = script.fail_next.get_mut(&chunk) {
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        } else {
            false
        };

        let call_number = script.calls.len();
        script.calls.push(LoadCall {
            cycle_id: ctx.cycle_id(),
            kind: ctx.kind(),
            chunk,
            attempt: ctx.attempt(),
            since,
            succeeded: !fail,
        });

        if fail {
            return Err(LoadError::new(format!(
                "scripted failure for chunk {} (attempt {})",
                chunk,
                ctx.attempt()
            )));
        }

        for n in 0..script.entries_per_chunk {
            let key = u64::from(chunk) * 1000 + n;
            ctx.registry().put(
                key,
                MockEntry {
                    key,
                    chunk,
                    kind: ctx.kind(),
                    written_by_call: call_number,
                },
            );
        }
        if let Some(watermark) = script.proposals.get(&chunk) {
            ctx.propose(*watermark);
        }
        Ok(())
    }

    async fn call(&self, chunk: u32, since: Option<Watermark>, ctx: &LoadContext<'_, u64, MockEntry>) -> LoadResult<()> {
        self.enter(ctx.cycle_id());
        let delay = lock(&self.state.script).delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.settle(chunk, since, ctx);
        self.exit(ctx.cycle_id());
        result
    }
}

#[async_trait]
impl Loader for MockLoader {
    type Key = u64;
    type Item = MockEntry;
    type Chunk = u32;

    async fn load_full(&self, chunk: &u32, ctx: &LoadContext<'_, u64, MockEntry>) -> LoadResult<()> {
        self.call(*chunk, None, ctx).await
    }

    async fn load_incremental(
        &self,
        chunk: &u32,
        since: Watermark,
        ctx: &LoadContext<'_, u64, MockEntry>,
    ) -> LoadResult<()> {
        self.call(*chunk, Some(since), ctx).await
    }
}

// ============================================================================
// SCRIPTED CHUNK SOURCE
// ============================================================================

/// Chunk source whose output tests can change between cycles.
#[derive(Debug, Clone)]
pub struct ScriptedChunks {
    inner: Arc<Mutex<Result<Vec<u32>, String>>>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedChunks {
    pub fn new(chunks: impl IntoIterator<Item = u32>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ok(chunks.into_iter().collect()))),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, chunks: impl IntoIterator<Item = u32>) {
        *lock(&self.inner) = Ok(chunks.into_iter().collect());
    }

    /// Make every following read fail.
    pub fn fail_with(&self, message: impl Into<String>) {
        *lock(&self.inner) = Err(message.into());
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkSource<u32> for ScriptedChunks {
    async fn read_chunk_items(&self) -> LoadResult<Vec<u32>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner).clone().map_err(LoadError::new)
    }
}

// ============================================================================
// TELEMETRY SINKS
// ============================================================================

/// Diagnostic message captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub level: DiagnosticLevel,
    pub identifier: String,
    pub message: String,
}

/// Sink that keeps everything it receives. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    attempts: Arc<Mutex<Vec<ChunkAttemptEvent>>>,
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<ChunkAttemptEvent> {
        lock(&self.attempts).clone()
    }

    pub fn messages(&self) -> Vec<RecordedMessage> {
        lock(&self.messages).clone()
    }

    /// Messages at `level` or above.
    pub fn messages_at_least(&self, level: DiagnosticLevel) -> Vec<RecordedMessage> {
        lock(&self.messages)
            .iter()
            .filter(|m| m.level >= level)
            .cloned()
            .collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn record_attempt(&self, event: &ChunkAttemptEvent) {
        lock(&self.attempts).push(event.clone());
    }

    fn record_message(&self, level: DiagnosticLevel, identifier: &str, message: &str) {
        lock(&self.messages).push(RecordedMessage {
            level,
            identifier: identifier.to_string(),
            message: message.to_string(),
        });
    }
}

/// Sink that panics on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingSink;

impl TelemetrySink for PanickingSink {
    fn record_attempt(&self, _event: &ChunkAttemptEvent) {
        panic!("telemetry sink exploded");
    }

    fn record_message(&self, _level: DiagnosticLevel, _identifier: &str, _message: &str) {
        panic!("telemetry sink exploded");
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Watermark between the epoch and 2100.
    pub fn arb_watermark() -> impl Strategy<Value = Watermark> {
        (0i64..4_102_444_800_000).prop_map(Watermark::from_millis)
    }

    pub fn arb_load_kind() -> impl Strategy<Value = LoadKind> {
        prop_oneof![Just(LoadKind::Full), Just(LoadKind::Incremental)]
    }

    /// Pairwise-distinct chunk list of up to `max` entries.
    pub fn arb_distinct_chunks(max: usize) -> impl Strategy<Value = Vec<u32>> {
        proptest::collection::hash_set(0u32..10_000, 0..=max)
            .prop_map(|set| set.into_iter().collect())
    }

    /// Valid, unscheduled config.
    pub fn arb_valid_config() -> impl Strategy<Value = RefreshConfig> {
        (1usize..=16, 1u32..=5).prop_map(|(pool_size, retry_budget)| {
            RefreshConfig::new()
                .without_schedule()
                .with_pool_size(pool_size)
                .with_retry_budget(retry_budget)
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    /// Config for tests driven by explicit `run_now` calls.
    pub fn manual_config() -> RefreshConfig {
        RefreshConfig::new()
            .without_schedule()
            .with_heartbeat_interval(Duration::from_secs(1))
    }

    /// Config for scheduler tests under a paused clock.
    pub fn scheduled_config(every: Duration) -> RefreshConfig {
        RefreshConfig::new()
            .with_refresh_interval(every)
            .with_ready_timeout(Duration::from_secs(60))
            .with_heartbeat_interval(Duration::from_secs(1))
    }

    /// Unscheduled cache over `chunks`.
    pub fn manual_cache(
        loader: MockLoader,
        chunks: impl IntoIterator<Item = u32>,
        config: RefreshConfig,
    ) -> CacheResult<RefreshCache<MockLoader>> {
        RefreshCache::builder_with_source(loader, FixedChunks::new(chunks))
            .config(config)
            .build()
    }
}
