//! Key-value cache with per-entry expiry
//!
//! The progress store only needs string keys, string values and a TTL, so the
//! cache is kept behind a small trait. The SQLite implementation shares the
//! connection setup of the document store so several worker threads can open
//! the same file.

use crate::storage::{StorageError, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

const CACHE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    -- Unix milliseconds; NULL means the entry never expires
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist or has expired
    Missing,
    /// The key exists without an expiry
    Persistent,
    Expires(Duration),
}

/// Minimal key-value cache interface used by the progress store
pub trait KeyValueCache: Send {
    /// Gets a live value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores a value that expires after `ttl`
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()>;

    /// Stores a value without expiry
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Deletes a key, returning whether it existed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Lists live keys starting with `prefix`, sorted
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Reports the remaining lifetime of a key
    fn ttl(&self, key: &str) -> StorageResult<KeyTtl>;
}

/// SQLite-backed key-value cache
pub struct SqliteCache {
    conn: Connection,
}

impl SqliteCache {
    /// Opens or creates the cache database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteCache)` - Successfully opened cache
    /// * `Err(StorageError)` - Failed to open the database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        conn.execute_batch(CACHE_SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Creates an in-memory cache
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CACHE_SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Physically removes expired entries
    ///
    /// Reads already ignore them; this only reclaims space.
    pub fn purge_expired(&self) -> StorageResult<usize> {
        let removed = self.conn.execute(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(removed)
    }

    fn put(&self, key: &str, value: &str, expires_at: Option<i64>) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            params![key, value, expires_at],
        )?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_millis(ttl: Duration) -> StorageResult<i64> {
    i64::try_from(ttl.as_millis())
        .map_err(|_| StorageError::Database(format!("TTL out of range: {:?}", ttl)))
}

impl KeyValueCache for SqliteCache {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()> {
        let expires_at = now_millis().saturating_add(ttl_millis(ttl)?);
        self.put(key, value, Some(expires_at))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.put(key, value, None)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT key FROM kv
             WHERE substr(key, 1, ?2) = ?1 AND (expires_at IS NULL OR expires_at > ?3)
             ORDER BY key ASC",
        )?;
        let keys = stmt
            .query_map(
                params![prefix, prefix.chars().count() as i64, now_millis()],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn ttl(&self, key: &str) -> StorageResult<KeyTtl> {
        let expires_at: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT expires_at FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        let now = now_millis();
        Ok(match expires_at {
            None => KeyTtl::Missing,
            Some(None) => KeyTtl::Persistent,
            Some(Some(at)) if at <= now => KeyTtl::Missing,
            Some(Some(at)) => KeyTtl::Expires(Duration::from_millis((at - now) as u64)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let cache = SqliteCache::new_in_memory().unwrap();
        cache.set("a", "1").unwrap();
        assert_eq!(cache.get("a").unwrap(), Some("1".to_string()));

        cache.set("a", "2").unwrap();
        assert_eq!(cache.get("a").unwrap(), Some("2".to_string()));

        assert!(cache.delete("a").unwrap());
        assert!(!cache.delete("a").unwrap());
        assert_eq!(cache.get("a").unwrap(), None);
    }

    #[test]
    fn test_expired_entries_are_invisible() {
        let cache = SqliteCache::new_in_memory().unwrap();
        cache.set_with_ttl("gone", "x", Duration::ZERO).unwrap();
        cache
            .set_with_ttl("live", "y", Duration::from_secs(60))
            .unwrap();

        assert_eq!(cache.get("gone").unwrap(), None);
        assert_eq!(cache.ttl("gone").unwrap(), KeyTtl::Missing);
        assert!(matches!(cache.ttl("live").unwrap(), KeyTtl::Expires(_)));
        assert_eq!(cache.purge_expired().unwrap(), 1);
    }

    #[test]
    fn test_keys_by_prefix() {
        let cache = SqliteCache::new_in_memory().unwrap();
        cache.set("harvest:errors:a:2", "x").unwrap();
        cache.set("harvest:errors:a:1", "x").unwrap();
        cache.set("harvest:errors:ab:1", "x").unwrap();
        cache.set("other", "x").unwrap();

        let keys = cache.keys("harvest:errors:a:").unwrap();
        assert_eq!(keys, vec!["harvest:errors:a:1", "harvest:errors:a:2"]);
        assert_eq!(cache.ttl("other").unwrap(), KeyTtl::Persistent);
        assert_eq!(cache.ttl("missing").unwrap(), KeyTtl::Missing);
    }

    #[test]
    fn test_file_backed_cache_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = SqliteCache::new(&path).unwrap();
            cache
                .set_with_ttl("k", "v", Duration::from_secs(3600))
                .unwrap();
        }
        let cache = SqliteCache::new(&path).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some("v".to_string()));
    }
}
