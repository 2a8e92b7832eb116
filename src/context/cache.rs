//! Document cache — bounded, TTL'd, LRU.
//!
//! Thread-safe through one internal mutex; composed operations take the
//! lock once per primitive and never nested, so there is no lock-ordering
//! hazard. Expired entries are invisible to readers and removed lazily on
//! access. Every LRU eviction and TTL expiration increments its counter
//! exactly once.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use crate::config::CacheConfig;

// ---------------------------------------------------------------------------
// Entries and statistics
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: String,
    created_at: Instant,
    ttl: Duration,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub max_size: usize,
    /// Hits over total observed accesses, in `[0, 1]`.
    pub hit_rate: f64,
    /// Estimated memory held by cached values, in bytes.
    pub memory_bytes: usize,
}

struct Inner {
    lru: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

// ---------------------------------------------------------------------------
// ContextCache
// ---------------------------------------------------------------------------

/// Thread-safe LRU cache with per-entry TTL.
pub struct ContextCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
    max_size: usize,
}

impl ContextCache {
    /// A cache holding at most `max_size` entries (minimum 1), expiring
    /// entries after `default_ttl` unless overridden per key.
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                lru: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            default_ttl,
            max_size: capacity.get(),
        }
    }

    /// A cache sized from engine configuration.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_seconds), config.max_size)
    }

    /// Get a value if present and not expired. Updates LRU order and
    /// counters.
    pub fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.lock();

        let expired = matches!(inner.lru.get(key), Some(entry) if entry.is_expired());
        if expired {
            inner.lru.pop(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        let value = inner.lru.get_mut(key).map(|entry| {
            entry.access_count += 1;
            entry.value.clone()
        });
        match value {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace a value, with an optional TTL override.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) {
        let key = key.into();
        let entry = CacheEntry {
            value: value.into(),
            created_at: Instant::now(),
            ttl: ttl.unwrap_or(self.default_ttl),
            access_count: 0,
        };

        let mut inner = self.lock();
        if let Some((old_key, _)) = inner.lru.push(key.clone(), entry) {
            // push returns the displaced pair: the previous value when the
            // key was already present (a replacement, not an eviction), or
            // the LRU victim when the cache was full.
            if old_key != key {
                inner.evictions += 1;
            }
        }
    }

    /// Get a cached value or load and cache it. The loader runs without
    /// the lock held; a `None` from the loader is not cached.
    pub fn get_or_load(
        &self,
        key: &str,
        loader: impl FnOnce() -> Option<String>,
        ttl: Option<Duration>,
    ) -> Option<String> {
        if let Some(value) = self.get(key) {
            return Some(value);
        }
        let value = loader()?;
        self.set(key, value.clone(), ttl);
        Some(value)
    }

    /// Remove a key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().lru.pop(key).is_some()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) {
        self.lock().lru.clear();
    }

    /// Whether a key is present and unexpired. Does not count as an
    /// access and does not change LRU order.
    pub fn has_key(&self, key: &str) -> bool {
        let mut inner = self.lock();
        match inner.lru.peek(key) {
            Some(entry) if entry.is_expired() => {
                inner.lru.pop(key);
                inner.expirations += 1;
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// All unexpired keys, most recently used first. Expired entries are
    /// removed on the way.
    pub fn keys(&self) -> Vec<String> {
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .lru
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.lru.pop(key);
            inner.expirations += 1;
        }
        inner.lru.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Current number of entries (including not-yet-reaped expired ones).
    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot, taken under the same lock as all operations.
    pub fn statistics(&self) -> CacheStatistics {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        let hit_rate = if total > 0 {
            inner.hits as f64 / total as f64
        } else {
            0.0
        };
        let memory_bytes = inner.lru.iter().map(|(_, e)| e.value.len()).sum();

        CacheStatistics {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            size: inner.lru.len(),
            max_size: self.max_size,
            hit_rate,
            memory_bytes,
        }
    }

    /// Reset all counters to zero; entries are kept.
    pub fn reset_statistics(&self) {
        let mut inner = self.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expirations = 0;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
