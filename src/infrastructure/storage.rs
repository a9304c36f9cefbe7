//! Storage implementations for gateway state.
//!
//! Provides concurrent, sharded storage for counters, cache entries,
//! breakers and per-rule metrics.

use crate::application::ports::Storage;
use ahash::RandomState;
use dashmap::DashMap;
use std::hash::Hash;

/// Keyed gateway state backed by DashMap.
///
/// Each rate-limit counter, cache entry, breaker and metrics handle lives
/// under its own key. Accessors lock only the shard holding that key, so
/// traffic on one rule never waits on another rule's state, and a sweep
/// holds one shard at a time.
#[derive(Debug)]
pub struct ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    map: DashMap<K, V, RandomState>,
}

impl<K, V> ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a new sharded storage instance.
    pub fn new() -> Self {
        Self {
            map: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Insert or update a value.
    pub fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    /// Borrow a value. The shard stays read-locked while the guard lives.
    pub fn get<Q>(&self, key: &Q) -> Option<dashmap::mapref::one::Ref<'_, K, V>>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key)
    }

    /// Check if a key exists.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Remove a key and return its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<(K, V)>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key)
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.map.clear();
    }

    /// Entry API, used for create-once handles such as breakers.
    pub fn entry(&self, key: K) -> dashmap::mapref::entry::Entry<'_, K, V> {
        self.map.entry(key)
    }
}

impl<K, V> Default for ShardedStorage<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

// Implement the Storage port
impl<K, V> Storage<K, V> for ShardedStorage<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
    V: Send + Sync + std::fmt::Debug,
{
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        let entry = self.map.entry(key);
        let mut value_ref = entry.or_insert_with(factory);
        accessor(&mut value_ref)
    }

    fn with_existing_mut<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        self.map.get_mut(key).map(|mut value| accessor(&mut value))
    }

    fn read<F, R>(&self, key: &K, reader: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        self.map.get(key).map(|value| reader(&value))
    }

    fn insert(&self, key: K, value: V) {
        self.map.insert(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, v)| v)
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn clear(&self) {
        self.map.clear()
    }

    fn retain<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        let mut removed = 0;
        self.map.retain(|k, v| {
            let keep = f(k, v);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

// Components own an `Arc<ShardedStorage>` so tests can inspect the same map
impl<K, V> Storage<K, V> for std::sync::Arc<ShardedStorage<K, V>>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug,
    V: Send + Sync + std::fmt::Debug,
{
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R,
    {
        (**self).with_entry_mut(key, factory, accessor)
    }

    fn with_existing_mut<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R,
    {
        (**self).with_existing_mut(key, accessor)
    }

    fn read<F, R>(&self, key: &K, reader: F) -> Option<R>
    where
        F: FnOnce(&V) -> R,
    {
        (**self).read(key, reader)
    }

    fn insert(&self, key: K, value: V) {
        Storage::insert(&**self, key, value)
    }

    fn remove(&self, key: &K) -> Option<V> {
        Storage::remove(&**self, key)
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn retain<F>(&self, f: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        Storage::retain(&**self, f)
    }
}
