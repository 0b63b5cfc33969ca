//! Per-run memoization shared by concurrent workers
//!
//! Each key owns a single [`OnceCell`], so concurrent misses on the same key
//! wait on one computation instead of issuing duplicate network calls.
//! Entries are never evicted; a cache lives for one run.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;

/// Concurrent cache that computes each key at most once
pub struct AsyncCache<K, V> {
    entries: Mutex<HashMap<K, Arc<OnceCell<V>>>>,
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<K, Arc<OnceCell<V>>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached value for `key`, computing it with `init` on a miss
    ///
    /// Callers racing on the same missing key share one `init` run.
    pub async fn get_or_insert_with<F, Fut>(&self, key: K, init: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = {
            let mut entries = self.entries();
            Arc::clone(entries.entry(key).or_default())
        };
        cell.get_or_init(init).await.clone()
    }

    /// Return the value for `key` if it has been computed
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries()
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Seed a value, replacing any existing entry
    pub fn insert(&self, key: K, value: V) {
        self.entries()
            .insert(key, Arc::new(OnceCell::new_with(Some(value))));
    }

    /// Number of keys with a computed value
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for AsyncCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
