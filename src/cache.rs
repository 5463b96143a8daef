//! A thread-safe map with sliding expiry per entry, shared by the topology cache, the
//! round-robin cursor table, and the Limitless router list's monitor registry.
//!
//! Every operation holds a single `std::sync::Mutex` for its entire duration and never
//! performs long-running work (or awaits) under the lock, per the concurrency model in the
//! specification.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::Mutex,
    time::{Duration, Instant},
};

struct CacheEntry<V> {
    value: V,
    expiry: Instant,
    ttl: Duration,
}

/// A mapping from `K` to `V` with sliding TTL expiry. `get`/`find` refresh an entry's expiry
/// on every successful lookup; an expired entry is evicted lazily, on the next access that
/// notices it.
pub(crate) struct SlidingCache<K, V> {
    default_ttl: Duration,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> SlidingCache<K, V>
where
    K: Eq + Hash,
    V: Clone + Default,
{
    pub(crate) fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub(crate) fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                expiry: Instant::now() + ttl,
                ttl,
            },
        );
    }

    /// If `key` is present and unexpired, refresh its expiry only; otherwise insert `value`.
    pub(crate) fn put_if_absent(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if let Some(entry) = entries.get_mut(&key) {
            if entry.expiry > now {
                entry.expiry = now + entry.ttl;
                return;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expiry: now + ttl,
                ttl,
            },
        );
    }

    /// Returns the value for `key`, refreshing its expiry, or `V::default()` if the entry is
    /// absent or has expired (an expired entry is evicted as a side effect).
    pub(crate) fn get(&self, key: &K) -> V {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expiry > now => {
                entry.expiry = now + entry.ttl;
                entry.value.clone()
            }
            Some(_) => {
                entries.remove(key);
                V::default()
            }
            None => V::default(),
        }
    }

    /// Same sliding-refresh semantics as [`Self::get`], without materializing the value.
    pub(crate) fn find(&self, key: &K) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expiry > now => {
                entry.expiry = now + entry.ttl;
                true
            }
            Some(_) => {
                entries.remove(key);
                false
            }
            None => false,
        }
    }

    /// Drops all expired entries and returns the remaining count.
    pub(crate) fn size(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expiry > now);
        entries.len()
    }

    pub(crate) fn delete(&self, key: &K) {
        self.entries.lock().unwrap().remove(key);
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
