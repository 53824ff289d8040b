//! Chunk planning.
//!
//! Turns the chunk source's output into a densely indexed work set for one
//! cycle. Chunk values must be pairwise distinct: the retry ledger and the
//! work queue address chunks by index, and two indices for the same slice
//! of data would let two workers race over the same keys.

use restock_core::PlanningError;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Chunks of one cycle, addressed by dense index `0..n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan<U> {
    chunks: Vec<U>,
}

impl<U> ChunkPlan<U>
where
    U: Eq + Hash + Debug,
{
    /// Index the chunks, rejecting value-equal duplicates.
    pub fn new(chunks: Vec<U>) -> Result<Self, PlanningError> {
        {
            let mut seen: HashMap<&U, usize> = HashMap::with_capacity(chunks.len());
            for (index, chunk) in chunks.iter().enumerate() {
                if let Some(&first_index) = seen.get(chunk) {
                    return Err(PlanningError::DuplicateChunk {
                        chunk: format!("{:?}", chunk),
                        first_index,
                        duplicate_index: index,
                    });
                }
                seen.insert(chunk, index);
            }
        }
        Ok(Self { chunks })
    }
}

impl<U> ChunkPlan<U> {
    /// Chunk at the given index.
    pub fn get(&self, index: usize) -> Option<&U> {
        self.chunks.get(index)
    }

    /// Number of planned chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if there is nothing to load.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate `(index, chunk)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &U)> {
        self.chunks.iter().enumerate()
    }

    /// Every index, in order.
    pub fn indices(&self) -> std::ops::Range<usize> {
        0..self.chunks.len()
    }
}
