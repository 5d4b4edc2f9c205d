//! Bounded memoisation of remote lookups.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::ApiResult;

/// Default number of entries kept per lookup cache.
pub const DEFAULT_LOOKUP_CACHE_CAPACITY: usize = 100;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the resolver.
    pub misses: u64,
    /// Entries currently held.
    pub len: usize,
}

/// Least-recently-used cache in front of a fallible async resolver.
///
/// Only successful resolutions are stored. A failed lookup, including a
/// not-found answer, is retried against the remote on the next call.
pub struct LookupCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K: Hash + Eq, V> std::fmt::Debug for LookupCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("LookupCache")
            .field("capacity", &entries.cap())
            .field("len", &entries.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> Default for LookupCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_CACHE_CAPACITY)
    }
}

impl<K, V> LookupCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Cached value for `key`, marking it as recently used.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    /// Store a value, evicting the least recently used entry when full.
    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().put(key, value);
    }

    /// Cached value for `key`, or the result of `resolve` stored on success.
    ///
    /// The lock is not held while `resolve` runs, so two concurrent misses
    /// for the same key may both reach the remote.
    ///
    /// # Errors
    /// Returns the resolver's error; nothing is cached in that case.
    pub async fn get_or_resolve<Fut>(
        &self,
        key: K,
        resolve: impl FnOnce() -> Fut,
    ) -> ApiResult<V>
    where
        Fut: Future<Output = ApiResult<V>>,
    {
        if let Some(value) = self.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = resolve().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.len(),
        }
    }
}
