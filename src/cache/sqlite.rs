//! SQLite-backed cache.
//!
//! One table keyed by `(namespace, key)`. Several OS processes may point at the
//! same file; cross-process coordination is left to SQLite's own locking
//! (WAL journal plus a busy timeout). The in-process mutex only serializes use
//! of the single `Connection` handle, which is not `Sync`.

use super::backend::{expiry, CacheBackend, CacheStats, HitCounters};
use crate::clock::{system_clock, SharedClock};
use crate::{Error, ErrorContext, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteCache {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    max_entries: usize,
    clock: SharedClock,
    counters: HitCounters,
}

impl SqliteCache {
    /// Open (or create) the cache file and run migrations.
    pub fn open(path: impl AsRef<Path>, max_entries: usize) -> Result<Self> {
        Self::open_with_clock(path, max_entries, system_clock())
    }

    pub fn open_with_clock(
        path: impl AsRef<Path>,
        max_entries: usize,
        clock: SharedClock,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to open cache database: {}", e),
                ErrorContext::new()
                    .with_field_path("cache.sqlite_path")
                    .with_details(path.display().to_string())
                    .with_source("sqlite_cache"),
            )
        })?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(journal_mode = %mode, "sqlite pragmas applied");
        let cache = Self::from_connection(conn, Some(path.to_path_buf()), max_entries, clock)?;
        info!(path = %path.display(), max_entries, "sqlite cache opened");
        Ok(cache)
    }

    /// Private, non-shared database (for tests and throwaway sessions).
    pub fn in_memory(max_entries: usize) -> Result<Self> {
        Self::in_memory_with_clock(max_entries, system_clock())
    }

    pub fn in_memory_with_clock(max_entries: usize, clock: SharedClock) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None, max_entries, clock)
    }

    fn from_connection(
        mut conn: Connection,
        path: Option<PathBuf>,
        max_entries: usize,
        clock: SharedClock,
    ) -> Result<Self> {
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            max_entries: max_entries.max(1),
            clock,
            counters: HitCounters::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Stored `(created_at, expires_at, last_accessed_at)` without touching recency.
    pub fn entry_times(&self, namespace: &str, key: &str) -> Result<Option<(i64, Option<i64>, i64)>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT created_at, expires_at, last_accessed_at FROM cache_entries
                 WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        Ok(row)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::backend("sqlite connection lock poisoned", "sqlite_cache"))
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    // Immediate so concurrent openers of a fresh file migrate one at a time.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let version: i32 = tx.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version >= SCHEMA_VERSION {
        debug!(version, "cache schema is up to date");
        return Ok(());
    }
    info!(from = version, to = SCHEMA_VERSION, "migrating cache schema");
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            namespace TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NULL,
            last_accessed_at INTEGER NOT NULL,
            PRIMARY KEY (namespace, key)
        );

        CREATE INDEX IF NOT EXISTS idx_cache_entries_lru
            ON cache_entries(last_accessed_at, created_at);
        CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
            ON cache_entries(expires_at);
        "#,
    )?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Next access stamp: `now`, bumped past the newest stamp in the table so
/// recency order never ties within one writer.
fn next_stamp(tx: &Transaction<'_>, now: i64) -> Result<i64> {
    let stamp = tx.query_row(
        "SELECT MAX(?1, COALESCE(MAX(last_accessed_at) + 1, ?1)) FROM cache_entries",
        params![now],
        |r| r.get(0),
    )?;
    Ok(stamp)
}

impl CacheBackend for SqliteCache {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let now = self.clock.now_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row: Option<(String, Option<i64>)> = tx
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let value = match row {
            None => None,
            Some((_, Some(expires_at))) if expires_at <= now => {
                tx.execute(
                    "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key],
                )?;
                debug!(namespace, key, "sqlite cache entry expired");
                None
            }
            Some((value, _)) => {
                let stamp = next_stamp(&tx, now)?;
                tx.execute(
                    "UPDATE cache_entries SET last_accessed_at = ?3
                     WHERE namespace = ?1 AND key = ?2",
                    params![namespace, key, stamp],
                )?;
                Some(value)
            }
        };
        tx.commit()?;

        if value.is_some() {
            self.counters.hit();
        } else {
            self.counters.miss();
        }
        Ok(value)
    }

    fn set(&self, namespace: &str, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let now = self.clock.now_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stamp = next_stamp(&tx, now)?;
        tx.execute(
            "INSERT INTO cache_entries
                 (namespace, key, value, created_at, expires_at, last_accessed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(namespace, key) DO UPDATE SET
                 value = excluded.value,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at,
                 last_accessed_at = excluded.last_accessed_at",
            params![namespace, key, value, now, expiry(now, ttl_seconds), stamp],
        )?;

        let max = self.max_entries as i64;
        let mut count: i64 = tx.query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))?;
        if count > max {
            let purged = tx.execute(
                "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?;
            count -= purged as i64;
        }
        if count > max {
            let evicted = tx.execute(
                "DELETE FROM cache_entries WHERE rowid IN (
                     SELECT rowid FROM cache_entries
                     ORDER BY last_accessed_at ASC, created_at ASC, rowid ASC
                     LIMIT ?1
                 )",
                params![count - max],
            )?;
            debug!(evicted, "evicted LRU entries from sqlite cache");
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(n > 0)
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    fn clear_namespace(&self, namespace: &str) -> Result<()> {
        self.lock()?.execute(
            "DELETE FROM cache_entries WHERE namespace = ?1",
            params![namespace],
        )?;
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let n = self.lock()?.execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        Ok(n)
    }

    fn len(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let n: i64 = self.lock()?.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at IS NULL OR expires_at > ?1",
            params![now],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    fn stats(&self) -> CacheStats {
        let size = self.len().unwrap_or(0) as u64;
        self.counters.to_stats(size)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
