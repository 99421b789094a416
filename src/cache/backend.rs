//! Cache backend contract plus the in-process implementations.

use crate::clock::{system_clock, SharedClock};
use crate::Result;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// One stored response. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub last_accessed_at: i64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Best-effort counters, monotonic since the backend was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
    /// Backend failures absorbed by the cache manager.
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Storage contract shared by every backend.
///
/// All methods take `&self`; implementations synchronize internally.
pub trait CacheBackend: Send + Sync {
    /// Returns `None` on miss or expiry. A hit refreshes `last_accessed_at`.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;
    /// Insert or overwrite. `ttl_seconds = None` means no TTL expiry.
    fn set(&self, namespace: &str, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;
    fn delete(&self, namespace: &str, key: &str) -> Result<bool>;
    fn clear(&self) -> Result<()>;
    fn clear_namespace(&self, namespace: &str) -> Result<()>;
    /// Drop every expired entry now instead of waiting for a lazy `get`.
    fn purge_expired(&self) -> Result<usize>;
    fn len(&self) -> Result<usize>;
    fn stats(&self) -> CacheStats;
    fn name(&self) -> &'static str;
}

pub(crate) struct HitCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounters {
    pub(crate) fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn to_stats(&self, size: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
            errors: 0,
        }
    }
}

/// Absolute expiry in epoch millis; TTLs past `i64` range clamp to the far future.
pub(crate) fn expiry(now: i64, ttl_seconds: Option<u64>) -> Option<i64> {
    ttl_seconds.map(|s| {
        let ttl_ms = i64::try_from(s).unwrap_or(i64::MAX).saturating_mul(1000);
        now.saturating_add(ttl_ms)
    })
}

/// Disables caching without branching caller code.
#[derive(Debug, Default)]
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

impl CacheBackend for NullCache {
    fn get(&self, _: &str, _: &str) -> Result<Option<String>> {
        Ok(None)
    }
    fn set(&self, _: &str, _: &str, _: &str, _: Option<u64>) -> Result<()> {
        Ok(())
    }
    fn delete(&self, _: &str, _: &str) -> Result<bool> {
        Ok(false)
    }
    fn clear(&self) -> Result<()> {
        Ok(())
    }
    fn clear_namespace(&self, _: &str) -> Result<()> {
        Ok(())
    }
    fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
    fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

type EntryId = (String, String);

struct MemoryState {
    entries: LruCache<EntryId, CacheEntry>,
    /// Last access stamp handed out; stamps are strictly increasing.
    last_stamp: i64,
}

impl MemoryState {
    fn stamp(&mut self, now: i64) -> i64 {
        self.last_stamp = now.max(self.last_stamp + 1);
        self.last_stamp
    }

    fn purge_expired(&mut self, now: i64) -> usize {
        let expired: Vec<EntryId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.entries.pop(k);
        }
        expired.len()
    }
}

/// In-process LRU cache keyed by `(namespace, key)`.
///
/// One mutex guards every read-modify-write sequence. Recency order is kept by
/// the LRU list itself, so the entry evicted on overflow is always the one
/// touched longest ago.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    max_entries: usize,
    clock: SharedClock,
    counters: HitCounters,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, system_clock())
    }

    pub fn with_clock(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                last_stamp: i64::MIN,
            }),
            max_entries: max_entries.max(1),
            clock,
            counters: HitCounters::new(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Copy of a stored entry without refreshing its recency.
    pub fn peek_entry(&self, namespace: &str, key: &str) -> Option<CacheEntry> {
        self.lock()
            .entries
            .peek(&(namespace.to_string(), key.to_string()))
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock still guards valid data.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let mut st = self.lock();
        let id = (namespace.to_string(), key.to_string());
        let expired = match st.entries.peek(&id) {
            None => {
                self.counters.miss();
                return Ok(None);
            }
            Some(e) => e.is_expired(now),
        };
        if expired {
            st.entries.pop(&id);
            self.counters.miss();
            debug!(namespace, key, "memory cache entry expired");
            return Ok(None);
        }
        let stamp = st.stamp(now);
        let value = st.entries.get_mut(&id).map(|e| {
            e.last_accessed_at = stamp;
            e.value.clone()
        });
        self.counters.hit();
        Ok(value)
    }

    fn set(&self, namespace: &str, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let now = self.clock.now_millis();
        let mut st = self.lock();
        let stamp = st.stamp(now);
        st.entries.put(
            (namespace.to_string(), key.to_string()),
            CacheEntry {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value: value.to_string(),
                created_at: now,
                expires_at: expiry(now, ttl_seconds),
                last_accessed_at: stamp,
            },
        );
        if st.entries.len() > self.max_entries {
            st.purge_expired(now);
        }
        while st.entries.len() > self.max_entries {
            match st.entries.pop_lru() {
                Some(((ns, k), _)) => debug!(namespace = %ns, key = %k, "evicted LRU entry"),
                None => break,
            }
        }
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self
            .lock()
            .entries
            .pop(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    fn clear(&self) -> Result<()> {
        self.lock().entries.clear();
        Ok(())
    }

    fn clear_namespace(&self, namespace: &str) -> Result<()> {
        let mut st = self.lock();
        let doomed: Vec<EntryId> = st
            .entries
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &doomed {
            st.entries.pop(k);
        }
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        Ok(self.lock().purge_expired(now))
    }

    fn len(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        Ok(self
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .count())
    }

    fn stats(&self) -> CacheStats {
        let size = self.len().unwrap_or(0) as u64;
        self.counters.to_stats(size)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
