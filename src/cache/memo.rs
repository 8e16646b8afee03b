//! Per-unit memoizer for expensive external calls.
//!
//! SQLite table keyed purely by content hash — never by stage or path —
//! so one photo's paid vision analysis survives stage-level cache wipes
//! and full pipeline resets alike. Failed computations are never cached.
//!
//! Safe under concurrent lookups/writes: first-time requests for the same
//! key collapse to a single external call via per-key locks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::CacheError;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memo_entries (
    content_hash TEXT PRIMARY KEY,
    result       TEXT NOT NULL,
    written_at   TEXT NOT NULL
)";

pub struct MemoStore {
    conn: Mutex<Connection>,
    /// Per-key single-flight locks. Held across lookup + compute + store
    /// so concurrent first-time requests for one key pay exactly once.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MemoStore {
    /// Open or create the store. A corrupt database file is removed and
    /// recreated — losing the memo cache costs recomputation, not the run.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        match Self::try_open(path) {
            Ok(store) => Ok(store),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "Memo store unreadable — recreating empty"
                );
                let _ = std::fs::remove_file(path);
                Self::try_open(path)
            }
        }
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_conn(conn))
    }

    fn try_open(path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_conn(conn))
    }

    fn from_conn(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the memoized result for `key`, or run `compute`, persist its
    /// success, and return it. `compute` runs at most once per key across
    /// the lifetime of the cache; its failure is propagated uncached.
    pub fn memoize<T, E, F>(&self, key: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        let key_lock = self.key_lock(key);
        let _guard = key_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(value) = self.get_json(key) {
            tracing::debug!(content_hash = %short(key), "Memo hit");
            return Ok(value);
        }

        tracing::debug!(content_hash = %short(key), "Memo miss — computing");
        let value = compute()?;
        self.put_json(key, &value);
        Ok(value)
    }

    /// Read a stored entry. Corrupt or unreadable entries count as misses.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(
                    content_hash = %short(key),
                    %error,
                    "Corrupt memo entry — treating as miss"
                );
                None
            }
        }
    }

    /// Persist a computed result. Write failures are logged, not raised:
    /// the computation already succeeded and its value is what matters.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(content_hash = %short(key), %error, "Memo serialize failed");
                return;
            }
        };
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = conn.execute(
            "INSERT OR REPLACE INTO memo_entries (content_hash, result, written_at)
             VALUES (?1, ?2, ?3)",
            params![key, raw, Utc::now().to_rfc3339()],
        );
        if let Err(error) = result {
            tracing::warn!(content_hash = %short(key), %error, "Memo write failed");
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let result = conn
            .query_row(
                "SELECT result FROM memo_entries WHERE content_hash = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional();
        match result {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(content_hash = %short(key), %error, "Memo read failed — treating as miss");
                None
            }
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn count_entries(&self) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM memo_entries", [], |row| row.get(0))
            .unwrap()
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
