//! Response caching.
//!
//! Completions are cached under a namespace and a deterministic key derived
//! from the request parameters, so identical requests from different processes
//! share one entry when they point at the same SQLite file.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Namespace/TTL handling, degrades backend failures to misses |
//! | [`CacheStore`] | Closed set of backends chosen at construction |
//! | [`CacheBackend`] | Operations every backend implements |
//! | [`MemoryCache`] | Process-local LRU |
//! | [`SqliteCache`] | File-backed store shared across processes |
//! | [`NullCache`] | Disables caching |
//! | [`CacheKeyBuilder`] | SHA-256 keys over canonical JSON parameters |
//!
//! ```rust
//! use llm_guard_core::cache::{CacheManager, MemoryCache};
//! use llm_guard_core::config::CacheSettings;
//!
//! let settings = CacheSettings::new().with_ttl_seconds(Some(3600));
//! let cache = CacheManager::new(MemoryCache::new(1000), &settings);
//! cache.put("project-a", "k", "cached completion");
//! assert_eq!(cache.get("project-a", "k").as_deref(), Some("cached completion"));
//! ```

mod backend;
mod key;
mod manager;
mod sqlite;
mod store;

pub use backend::{CacheBackend, CacheEntry, CacheStats, MemoryCache, NullCache};
pub use key::{build_key, CacheKeyBuilder};
pub use manager::CacheManager;
pub use sqlite::SqliteCache;
pub use store::{CacheStore, DEFAULT_NAMESPACE};
