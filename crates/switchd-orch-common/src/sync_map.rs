//! Map wrapper that prevents auto-vivification bugs in reference-counted
//! resource caches.
//!
//! Indexing a missing key must never create a default entry: a refcount
//! incremented on an entry that was silently created is the classic way a
//! shared resource ends up undeletable. `SyncMap` only ever creates
//! entries through explicit `insert`.

use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Error type for SyncMap operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncMapError {
    #[error("key not found")]
    KeyNotFound,

    #[error("reference count underflow")]
    RefCountUnderflow,
}

/// Trait for entries that carry a reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count, or `None` on underflow.
    fn decrement_ref(&mut self) -> Option<u32>;

    /// Returns the current reference count.
    fn ref_count(&self) -> u32;
}

/// A map that never creates entries implicitly.
#[derive(Debug, Clone, Default)]
pub struct SyncMap<K, V> {
    inner: HashMap<K, V>,
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true if the map contains the given key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the value for a key; never creates entries.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Returns the value mutably; never creates entries.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Inserts a value, returning any previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Removes a key, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    /// Iterates over entries.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    /// Iterates over keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    /// Iterates over values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }
}

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash,
    V: HasRefCount,
{
    /// Increments the reference count for an existing entry.
    pub fn increase_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        let entry = self.inner.get_mut(key).ok_or(SyncMapError::KeyNotFound)?;
        Ok(entry.increment_ref())
    }

    /// Decrements the reference count for an existing entry.
    ///
    /// Fails on underflow instead of wrapping; a decrement on a zero
    /// count is always a caller bug.
    pub fn decrease_ref(&mut self, key: &K) -> Result<u32, SyncMapError> {
        let entry = self.inner.get_mut(key).ok_or(SyncMapError::KeyNotFound)?;
        entry.decrement_ref().ok_or(SyncMapError::RefCountUnderflow)
    }

    /// Returns the reference count for an entry.
    pub fn ref_count(&self, key: &K) -> Option<u32> {
        self.inner.get(key).map(|e| e.ref_count())
    }
}
