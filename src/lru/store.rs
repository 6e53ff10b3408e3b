//! LRU Store Module
//!
//! Bounded, recency-ordered map with per-entry expiration.

use std::borrow::Borrow;
use std::hash::Hash;
use std::time::Duration;

use indexmap::IndexMap;

use crate::lru::LruEntry;

/// Capacity used by [`LruStore::default`].
pub const DEFAULT_MAX: usize = 1024;

// == LRU Store ==
/// In-process cache with LRU eviction and lazy TTL expiration.
///
/// Entries are kept in an `IndexMap` ordered from least to most recently
/// used. Expired entries are only removed when they are next accessed.
///
/// The store has no internal locking; wrap it in a mutex to share it.
#[derive(Debug, Clone)]
pub struct LruStore<K, V> {
    entries: IndexMap<K, LruEntry<V>>,
    max: usize,
}

impl<K: Hash + Eq, V> LruStore<K, V> {
    // == Constructor ==
    /// Creates a store retaining at most `max` entries (at least one).
    pub fn new(max: usize) -> Self {
        Self {
            entries: IndexMap::new(),
            max: max.max(1),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    // == Get ==
    /// Retrieves a value and marks it most recently used.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.entries.get_index_of(key)?;

        if self.entries[idx].is_expired() {
            self.entries.shift_remove_index(idx);
            return None;
        }

        let newest = self.entries.len() - 1;
        self.entries.move_index(idx, newest);
        self.entries.get_index(newest).map(|(_, entry)| &entry.value)
    }

    // == Set ==
    /// Stores a value as the most recently used entry.
    ///
    /// Any previous entry for the key is replaced. When the store grows past
    /// its capacity the least recently used entry is evicted.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The value to store
    /// * `ttl` - Optional time to live, None = never expires
    pub fn set(&mut self, key: K, value: V, ttl: Option<Duration>) -> &V {
        self.entries.shift_remove(&key);
        self.entries.insert(key, LruEntry::new(value, ttl));

        if self.entries.len() > self.max {
            self.entries.shift_remove_index(0);
        }

        // max >= 1, so the newest entry always survives eviction
        &self.entries[self.entries.len() - 1].value
    }

    // == Exists ==
    /// Same as `get(key).is_some()`, including the recency update.
    pub fn exists<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    // == Delete ==
    /// Removes an entry, returning its value if it was present.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.shift_remove(key).map(|entry| entry.value)
    }

    /// Stores every pair with the same TTL.
    pub fn mset<I>(&mut self, pairs: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in pairs {
            self.set(key, value, ttl);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored entries, expired ones included until accessed.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> LruStore<K, V> {
    /// Gets every key in order, skipping misses.
    pub fn mget<'a, I>(&mut self, keys: I) -> IndexMap<K, V>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut found = IndexMap::new();
        for key in keys {
            if let Some(value) = self.get(key) {
                let value = value.clone();
                found.insert(key.clone(), value);
            }
        }
        found
    }

    /// Key/value pairs, most recently used first.
    pub fn to_ordered_pairs(&self) -> Vec<(K, V)> {
        self.entries
            .iter()
            .rev()
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect()
    }
}

impl<K: Hash + Eq, V> Default for LruStore<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX)
    }
}
