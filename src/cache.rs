//! In-memory cache with per-entry time-to-live.
//!
//! Stale entries are evicted lazily when they are looked up; nothing sweeps
//! the map in the background. Contents are lost on restart.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cached value with its insertion time and lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached value.
    pub value: V,
    /// When the value was stored.
    pub inserted_at: Instant,
    /// How long the value stays fresh.
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Returns true while `now` is before `inserted_at + ttl`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing fresh.
    pub misses: u64,
    /// Stale entries removed on lookup.
    pub evictions: u64,
}

/// Concurrent key/value cache with per-entry expiry.
///
/// Two tasks missing on the same key at once both compute; the later store
/// wins. Failed computations are not cached.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    /// Creates an empty cache whose entries live for `default_ttl`.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Lifetime used by [`TtlCache::insert`].
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the value for `key` if it is still fresh.
    ///
    /// A stale entry is removed.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();

        // The read guard must be released before remove_if touches the shard.
        let fresh = self
            .entries
            .get(key)
            .map(|entry| entry.is_fresh(now).then(|| entry.value.clone()));

        match fresh {
            Some(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(?key, "cache hit");
                Some(value)
            }
            Some(None) => {
                if self
                    .entries
                    .remove_if(key, |_, entry| !entry.is_fresh(now))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(?key, "cache entry expired");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(?key, "cache miss");
                None
            }
        }
    }

    /// Stores `value` with the default lifetime.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    /// Stores `value` with an explicit lifetime.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Returns the cached value, or computes, stores and returns a new one.
    ///
    /// `compute` runs only on a miss or after expiry. Its error is returned
    /// as is and nothing is stored.
    ///
    /// # Errors
    /// Returns the error produced by `compute`.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, ttl: Duration, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.insert_with_ttl(key, value.clone(), ttl);
        Ok(value)
    }

    /// Removes an entry regardless of freshness.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
