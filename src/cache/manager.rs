//! Cache manager.
//!
//! Caller-facing side of the cache: applies the configured namespace and TTL,
//! and turns backend failures into misses so a broken cache never breaks the
//! request path. Administrative operations (`clear`, `clear_namespace`) still
//! return their errors.

use super::backend::{CacheBackend, CacheStats};
use super::key::CacheKeyBuilder;
use super::store::CacheStore;
use crate::client::CompletionRequest;
use crate::clock::{system_clock, SharedClock};
use crate::config::CacheSettings;
use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub struct CacheManager {
    store: CacheStore,
    namespace: String,
    default_ttl: Option<u64>,
    keys: CacheKeyBuilder,
    errors: AtomicU64,
}

impl CacheManager {
    pub fn new(store: impl Into<CacheStore>, settings: &CacheSettings) -> Self {
        Self {
            store: store.into(),
            namespace: settings.namespace.clone(),
            default_ttl: settings.ttl_seconds,
            keys: CacheKeyBuilder::new(),
            errors: AtomicU64::new(0),
        }
    }

    /// Build the backend described by `settings`. Fails on invalid settings
    /// or when the SQLite file cannot be opened/migrated.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self> {
        Self::from_settings_with_clock(settings, system_clock())
    }

    pub fn from_settings_with_clock(settings: &CacheSettings, clock: SharedClock) -> Result<Self> {
        let store = CacheStore::from_settings(settings, clock)?;
        Ok(Self::new(store, settings))
    }

    pub fn with_key_builder(mut self, keys: CacheKeyBuilder) -> Self {
        self.keys = keys;
        self
    }

    /// Configured namespace for this client.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn default_ttl(&self) -> Option<u64> {
        self.default_ttl
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn key_for(&self, namespace: &str, request: &CompletionRequest) -> String {
        self.keys.from_request(namespace, request)
    }

    /// Lookup; backend failures are logged and reported as a miss.
    pub fn get(&self, namespace: &str, key: &str) -> Option<String> {
        match self.store.get(namespace, key) {
            Ok(Some(v)) => {
                debug!(namespace, key, backend = self.store.name(), "cache hit");
                Some(v)
            }
            Ok(None) => {
                debug!(namespace, key, backend = self.store.name(), "cache miss");
                None
            }
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(namespace, key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    /// Store with an explicit TTL; failures are logged and swallowed.
    pub fn set(&self, namespace: &str, key: &str, value: &str, ttl_seconds: Option<u64>) {
        if let Err(e) = self.store.set(namespace, key, value, ttl_seconds) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            warn!(namespace, key, error = %e, "cache write failed; continuing uncached");
        }
    }

    /// Store with the configured default TTL.
    pub fn put(&self, namespace: &str, key: &str, value: &str) {
        self.set(namespace, key, value, self.default_ttl)
    }

    pub fn get_json<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let raw = self.get(namespace, key)?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(namespace, key, error = %e, "cached payload is not valid JSON; ignoring");
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(&self, namespace: &str, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.put(namespace, key, &raw),
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(namespace, key, error = %e, "failed to serialize cache payload");
            }
        }
    }

    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        match self.store.delete(namespace, key) {
            Ok(d) => d,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(namespace, key, error = %e, "cache delete failed");
                false
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    pub fn clear_namespace(&self, namespace: &str) -> Result<()> {
        self.store.clear_namespace(namespace)
    }

    pub fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.store.stats();
        stats.errors = self.errors.load(Ordering::Relaxed);
        stats
    }
}
