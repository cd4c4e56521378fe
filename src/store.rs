//! Key-Value Store
//!
//! The catalog and the order queues persist through this minimal get/put
//! interface. [`MemoryStore`] serves tests and dry runs, [`SqliteStore`] keeps
//! everything in one SQLite table shared by every process opening the file.

use crate::error::{Result, TapeLibraryError};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// How long a connection waits for another process holding the write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Insert or replace
    fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Remove and return the value; `None` if another caller removed it first
    fn take(&self, key: &str) -> Result<Option<Value>>;

    /// All entries whose key starts with `prefix`, in key order
    fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().remove(key))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Store backed by a single `entries` table in an SQLite database.
///
/// Every operation is one statement, so separate processes (an order submitter
/// and the running workers) can share the file; SQLite serialises the writers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening store {:?}", path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Private database, gone when the store is dropped
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                key   TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
            (),
        )?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", (), |row| row.get(0))?;
        debug!("Store holds {} entries", count);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn decode(key: &str, text: &str) -> Result<Value> {
        serde_json::from_str(text)
            .map_err(|e| TapeLibraryError::store(format!("Corrupted entry {}: {}", key, e)))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = self
            .conn
            .lock()
            .query_row("SELECT value FROM entries WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        text.map(|t| Self::decode(key, &t)).transpose()
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value)?;
        self.conn.lock().execute(
            "INSERT INTO entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            (key, &text),
        )?;
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<Value>> {
        let text: Option<String> = self
            .conn
            .lock()
            .query_row(
                "DELETE FROM entries WHERE key = ?1 RETURNING value",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        text.map(|t| Self::decode(key, &t)).transpose()
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM entries
             WHERE substr(key, 1, length(?1)) = ?1
             ORDER BY key",
        )?;
        let rows = stmt.query_map([prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (key, text) = row?;
            let value = Self::decode(&key, &text)?;
            entries.push((key, value));
        }
        Ok(entries)
    }
}
