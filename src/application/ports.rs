//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::SystemTime;

/// Port for obtaining current time.
///
/// Wall-clock time is used because rate-limit windows are aligned to the
/// Unix epoch and reset timestamps are reported to callers.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> SystemTime;
}

/// Port for concurrent keyed storage.
///
/// Every accessor runs its closure while holding the lock for that single
/// key only, so unrelated keys never contend.
/// Infrastructure provides concrete implementations (ShardedStorage).
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Access an entry with mutable access, creating it if necessary.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `factory` - Function to create a new value if the key doesn't exist
    /// * `accessor` - Function that gets mutable access to the value
    ///
    /// # Returns
    /// The result from the accessor function
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R;

    /// Access an existing entry mutably without creating it.
    fn with_existing_mut<F, R>(&self, key: &K, accessor: F) -> Option<R>
    where
        F: FnOnce(&mut V) -> R;

    /// Read an existing entry.
    fn read<F, R>(&self, key: &K, reader: F) -> Option<R>
    where
        F: FnOnce(&V) -> R;

    /// Insert or overwrite a value.
    fn insert(&self, key: K, value: V);

    /// Remove a key, returning its value.
    fn remove(&self, key: &K) -> Option<V>;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Remove entries for which the predicate returns false.
    ///
    /// Returns the number of entries removed.
    fn retain<F>(&self, f: F) -> usize
    where
        F: FnMut(&K, &mut V) -> bool;
}
