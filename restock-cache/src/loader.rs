//! Loader and chunk source boundaries.
//!
//! The engine never knows what it caches. A [`Loader`] pulls data for one
//! chunk from the backing source and writes it into the registry through a
//! [`LoadContext`]; a [`ChunkSource`] decides how the data set is
//! partitioned for each cycle.

use async_trait::async_trait;
use restock_core::{LoadKind, LoadResult, Watermark};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Mutex;
use uuid::Uuid;

use crate::registry::EntryRegistry;

/// Handle a loader uses to mutate the cache during one chunk attempt.
///
/// Watermark proposals are held here until the attempt returns; the pool
/// forwards them to the cycle's candidate only if the attempt succeeded.
pub struct LoadContext<'a, K, T>
where
    K: Eq + Hash,
{
    registry: &'a EntryRegistry<K, T>,
    proposed: Mutex<Option<Watermark>>,
    cycle_id: Uuid,
    kind: LoadKind,
    chunk_index: usize,
    attempt: u32,
}

impl<'a, K, T> LoadContext<'a, K, T>
where
    K: Eq + Hash,
{
    pub(crate) fn new(
        registry: &'a EntryRegistry<K, T>,
        cycle_id: Uuid,
        kind: LoadKind,
        chunk_index: usize,
        attempt: u32,
    ) -> Self {
        Self {
            registry,
            proposed: Mutex::new(None),
            cycle_id,
            kind,
            chunk_index,
            attempt,
        }
    }

    /// The cache's entry registry.
    pub fn registry(&self) -> &'a EntryRegistry<K, T> {
        self.registry
    }

    /// Propose that the cache is complete through `watermark`.
    ///
    /// Only propose timestamps the chunk can attest are fully covered. The
    /// highest proposal counts once this attempt returns `Ok`, and is
    /// committed only if every chunk of the cycle succeeds. Returns true if
    /// this attempt's highest proposal moved.
    pub fn propose(&self, watermark: Watermark) -> bool {
        let mut proposed = self
            .proposed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *proposed {
            Some(current) if !watermark.is_newer_than(&current) => false,
            _ => {
                *proposed = Some(watermark);
                true
            }
        }
    }

    /// Highest watermark proposed during this attempt.
    pub(crate) fn proposal(&self) -> Option<Watermark> {
        *self
            .proposed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Identifier of the running cycle.
    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    /// Whether this is a full or incremental cycle.
    pub fn kind(&self) -> LoadKind {
        self.kind
    }

    /// Dense index of the chunk being loaded.
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// 1-based attempt number for this chunk within the cycle.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Caller-supplied loader for one kind of cached data.
///
/// Both entry points may fail with any error; failures are treated as
/// transient and retried up to the configured budget. Implementations must
/// tolerate reprocessing data they have already seen, since a failed cycle
/// leaves the committed watermark where it was.
#[async_trait]
pub trait Loader: Send + Sync + 'static {
    /// Key entries are addressed by.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    /// Cached item.
    type Item: Clone + Send + Sync + 'static;
    /// Unit of partitioned load work.
    type Chunk: Eq + Hash + Clone + Debug + Send + Sync + 'static;

    /// Load everything belonging to `chunk`.
    async fn load_full(
        &self,
        chunk: &Self::Chunk,
        ctx: &LoadContext<'_, Self::Key, Self::Item>,
    ) -> LoadResult<()>;

    /// Load what changed in `chunk` since the committed watermark.
    async fn load_incremental(
        &self,
        chunk: &Self::Chunk,
        since: Watermark,
        ctx: &LoadContext<'_, Self::Key, Self::Item>,
    ) -> LoadResult<()>;
}

/// Pluggable partitioning policy, consulted at the start of every cycle.
#[async_trait]
pub trait ChunkSource<U>: Send + Sync {
    /// Chunks to load this cycle; values must be pairwise distinct.
    async fn read_chunk_items(&self) -> LoadResult<Vec<U>>;
}

/// Sentinel chunk meaning "the whole data set is one unit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WholeDataSet;

/// Chunk source that always yields a single chunk.
#[derive(Debug, Clone, Default)]
pub struct SingleChunk<U> {
    chunk: U,
}

impl<U> SingleChunk<U> {
    /// Always yield `chunk`.
    pub fn new(chunk: U) -> Self {
        Self { chunk }
    }
}

#[async_trait]
impl<U> ChunkSource<U> for SingleChunk<U>
where
    U: Clone + Send + Sync,
{
    async fn read_chunk_items(&self) -> LoadResult<Vec<U>> {
        Ok(vec![self.chunk.clone()])
    }
}

/// Chunk source with a fixed list of chunks.
#[derive(Debug, Clone, Default)]
pub struct FixedChunks<U> {
    chunks: Vec<U>,
}

impl<U> FixedChunks<U> {
    pub fn new(chunks: impl IntoIterator<Item = U>) -> Self {
        Self {
            chunks: chunks.into_iter().collect(),
        }
    }
}

#[async_trait]
impl<U> ChunkSource<U> for FixedChunks<U>
where
    U: Clone + Send + Sync,
{
    async fn read_chunk_items(&self) -> LoadResult<Vec<U>> {
        Ok(self.chunks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_chunk_default_is_whole_data_set() {
        let source: SingleChunk<WholeDataSet> = SingleChunk::default();
        let chunks = source
            .read_chunk_items()
            .await
            .expect("single chunk source should succeed");
        assert_eq!(chunks, vec![WholeDataSet]);
    }

    #[tokio::test]
    async fn test_fixed_chunks() {
        let source = FixedChunks::new(0..4u32);
        let chunks = source
            .read_chunk_items()
            .await
            .expect("fixed chunk source should succeed");
        assert_eq!(chunks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_context_buffers_highest_proposal() {
        let registry: EntryRegistry<u32, String> = EntryRegistry::new();
        let ctx = LoadContext::new(&registry, Uuid::now_v7(), LoadKind::Full, 3, 1);
        assert_eq!(ctx.proposal(), None);

        ctx.registry().put(1, "one".to_string());
        assert!(ctx.propose(Watermark::from_millis(42)));
        assert!(!ctx.propose(Watermark::from_millis(7)));
        assert!(!ctx.propose(Watermark::from_millis(42)));

        assert_eq!(ctx.chunk_index(), 3);
        assert_eq!(ctx.attempt(), 1);
        assert!(ctx.kind().is_full());
        assert_eq!(registry.get(&1), Some("one".to_string()));
        assert_eq!(ctx.proposal(), Some(Watermark::from_millis(42)));
    }
}
