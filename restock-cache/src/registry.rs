//! Concurrent keyed store that readers query and loaders mutate.

use dashmap::DashMap;
use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

/// The cache's entry store.
///
/// Backed by a sharded concurrent map: point reads and writes only touch
/// one shard, so readers never wait on a global lock while a refresh is
/// writing. Mutations are atomic per key and last-writer-wins; loaders own
/// conflict resolution between chunks that touch the same keys.
pub struct EntryRegistry<K, T>
where
    K: Eq + Hash,
{
    entries: DashMap<K, T>,
}

impl<K, T> EntryRegistry<K, T>
where
    K: Eq + Hash,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Look up an entry by key.
    pub fn get<Q>(&self, key: &Q) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        T: Clone,
    {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Check whether a key is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Insert or replace an entry, returning the previous item.
    pub fn put(&self, key: K, item: T) -> Option<T> {
        self.entries.insert(key, item)
    }

    /// Remove an entry, returning it if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|(_, item)| item)
    }

    /// Remove every listed key, returning how many were present.
    pub fn remove_all<I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
    {
        keys.into_iter()
            .filter(|key| self.entries.remove(key).is_some())
            .count()
    }

    /// Lazily yield clones of every item matching the predicate.
    ///
    /// The iterator holds a shard read guard while it is positioned inside
    /// that shard; do not keep it alive across an `.await`.
    pub fn scan<'a, F>(&'a self, predicate: F) -> impl Iterator<Item = T> + 'a
    where
        F: Fn(&T) -> bool + 'a,
        T: Clone,
    {
        self.entries
            .iter()
            .filter(move |entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
    }

    /// Lazily yield clones of every key.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_
    where
        K: Clone,
    {
        self.entries.iter().map(|entry| entry.key().clone())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, T> Default for EntryRegistry<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for EntryRegistry<K, T>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRegistry")
            .field("len", &self.entries.len())
            .finish()
    }
}
