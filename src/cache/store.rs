//! Closed set of cache backends, selected once at construction.

use super::backend::{CacheBackend, CacheStats, MemoryCache, NullCache};
use super::sqlite::SqliteCache;
use crate::clock::SharedClock;
use crate::config::{CacheBackendKind, CacheSettings};
use crate::{Error, ErrorContext, Result};

/// Namespace used when a caller passes an empty one.
pub const DEFAULT_NAMESPACE: &str = "default";

pub enum CacheStore {
    Null(NullCache),
    Memory(MemoryCache),
    Sqlite(SqliteCache),
}

macro_rules! dispatch {
    ($self:ident, $c:ident => $body:expr) => {
        match $self {
            CacheStore::Null($c) => $body,
            CacheStore::Memory($c) => $body,
            CacheStore::Sqlite($c) => $body,
        }
    };
}

fn ns(namespace: &str) -> &str {
    if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    }
}

impl CacheStore {
    pub fn from_settings(settings: &CacheSettings, clock: SharedClock) -> Result<Self> {
        settings.validate()?;
        Ok(match settings.backend {
            CacheBackendKind::Null => CacheStore::Null(NullCache::new()),
            CacheBackendKind::Memory => {
                CacheStore::Memory(MemoryCache::with_clock(settings.max_entries, clock))
            }
            CacheBackendKind::Sqlite => {
                let path = settings.sqlite_path.as_ref().ok_or_else(|| {
                    Error::configuration_with_context(
                        "sqlite backend requires a database path",
                        ErrorContext::new().with_field_path("cache.sqlite_path"),
                    )
                })?;
                CacheStore::Sqlite(SqliteCache::open_with_clock(
                    path,
                    settings.max_entries,
                    clock,
                )?)
            }
        })
    }

    pub fn kind(&self) -> CacheBackendKind {
        match self {
            CacheStore::Null(_) => CacheBackendKind::Null,
            CacheStore::Memory(_) => CacheBackendKind::Memory,
            CacheStore::Sqlite(_) => CacheBackendKind::Sqlite,
        }
    }
}

impl From<NullCache> for CacheStore {
    fn from(c: NullCache) -> Self {
        CacheStore::Null(c)
    }
}

impl From<MemoryCache> for CacheStore {
    fn from(c: MemoryCache) -> Self {
        CacheStore::Memory(c)
    }
}

impl From<SqliteCache> for CacheStore {
    fn from(c: SqliteCache) -> Self {
        CacheStore::Sqlite(c)
    }
}

impl CacheBackend for CacheStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        dispatch!(self, c => c.get(ns(namespace), key))
    }
    fn set(&self, namespace: &str, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        dispatch!(self, c => c.set(ns(namespace), key, value, ttl_seconds))
    }
    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        dispatch!(self, c => c.delete(ns(namespace), key))
    }
    fn clear(&self) -> Result<()> {
        dispatch!(self, c => c.clear())
    }
    fn clear_namespace(&self, namespace: &str) -> Result<()> {
        dispatch!(self, c => c.clear_namespace(ns(namespace)))
    }
    fn purge_expired(&self) -> Result<usize> {
        dispatch!(self, c => c.purge_expired())
    }
    fn len(&self) -> Result<usize> {
        dispatch!(self, c => c.len())
    }
    fn stats(&self) -> CacheStats {
        dispatch!(self, c => c.stats())
    }
    fn name(&self) -> &'static str {
        dispatch!(self, c => c.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;

    #[test]
    fn test_empty_namespace_maps_to_default() {
        let store = CacheStore::from(MemoryCache::new(10));
        store.set("", "k", "v", None).unwrap();
        assert_eq!(store.get(DEFAULT_NAMESPACE, "k").unwrap().as_deref(), Some("v"));
        store.clear_namespace("").unwrap();
        assert_eq!(store.get(DEFAULT_NAMESPACE, "k").unwrap(), None);
    }

    #[test]
    fn test_sqlite_without_path_is_configuration_error() {
        let settings = CacheSettings::new().with_backend(CacheBackendKind::Sqlite);
        let err = CacheStore::from_settings(&settings, system_clock())
            .err()
            .expect("should fail");
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_from_settings_selects_variant() {
        let null = CacheStore::from_settings(
            &CacheSettings::new().with_backend(CacheBackendKind::Null),
            system_clock(),
        )
        .unwrap();
        assert_eq!(null.kind(), CacheBackendKind::Null);
        assert_eq!(null.name(), "null");

        let dir = tempfile::tempdir().unwrap();
        let sqlite = CacheStore::from_settings(
            &CacheSettings::new().with_sqlite_path(dir.path().join("c.db")),
            system_clock(),
        )
        .unwrap();
        assert_eq!(sqlite.kind(), CacheBackendKind::Sqlite);
    }
}
