//! Append-only ledger of record ids accepted by earlier runs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::errors::IdentityStoreError;
use crate::models::SeenEntry;

const SCHEMA_VERSION: i32 = 1;

/// Ledger contract shared by the SQLite store and the in-memory test double.
///
/// Every method that touches storage may fail with
/// [`IdentityStoreError::Unavailable`]; callers treat that as fatal.
pub trait IdentityStore: Send + Sync {
    fn has_seen(&self, id: &str) -> Result<bool, IdentityStoreError>;

    /// Idempotent. The first `at` recorded for an id is kept.
    fn mark_seen(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), IdentityStoreError>;

    fn len(&self) -> Result<usize, IdentityStoreError>;

    fn is_empty(&self) -> Result<bool, IdentityStoreError> {
        Ok(self.len()? == 0)
    }

    fn entry(&self, id: &str) -> Result<Option<SeenEntry>, IdentityStoreError>;

    /// Make every prior commit durable.
    fn flush(&mut self) -> Result<(), IdentityStoreError>;
}

/// SQLite-backed ledger. Ids are mirrored in memory at open so lookups do not
/// hit the database; every insert is committed immediately.
pub struct SqliteIdentityStore {
    conn: Mutex<Connection>,
    seen: HashMap<String, DateTime<Utc>>,
    location: String,
}

impl SqliteIdentityStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IdentityStoreError> {
        let path = path.as_ref();
        let location = path.display().to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| IdentityStoreError::unavailable(&location, e))?;
        }

        let conn = Connection::open(path).map_err(|e| IdentityStoreError::unavailable(&location, e))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )
        .map_err(|e| IdentityStoreError::unavailable(&location, e))?;

        Self::from_connection(conn, location)
    }

    pub fn open_memory() -> Result<Self, IdentityStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IdentityStoreError::unavailable(":memory:", e))?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self, IdentityStoreError> {
        migrate(&conn).map_err(|e| IdentityStoreError::unavailable(&location, e))?;
        let seen = load_entries(&conn).map_err(|e| IdentityStoreError::unavailable(&location, e))?;
        log::info!("Opened identity ledger at {location} ({} known ids)", seen.len());

        Ok(Self {
            conn: Mutex::new(conn),
            seen,
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Checkpoint and close the connection. Errors here mean commits may not
    /// be visible to the next process.
    pub fn close(self) -> Result<(), IdentityStoreError> {
        let location = self.location;
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| IdentityStoreError::unavailable(&location, "connection lock poisoned"))?;

        // In-memory databases have no WAL; the pragma is a no-op there.
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(|e| IdentityStoreError::unavailable(&location, e))?;
        conn.close()
            .map_err(|(_, e)| IdentityStoreError::unavailable(&location, e))?;
        log::info!("Closed identity ledger at {location}");
        Ok(())
    }

    fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, IdentityStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| IdentityStoreError::unavailable(&self.location, "connection lock poisoned"))?;
        op(&conn).map_err(|e| IdentityStoreError::unavailable(&self.location, e))
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn has_seen(&self, id: &str) -> Result<bool, IdentityStoreError> {
        Ok(self.seen.contains_key(id))
    }

    fn mark_seen(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), IdentityStoreError> {
        if self.seen.contains_key(id) {
            return Ok(());
        }

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO crawled_records (id, first_seen_at) VALUES (?1, ?2)",
                params![id, at.to_rfc3339()],
            )
        })?;
        self.seen.insert(id.to_string(), at);
        Ok(())
    }

    fn len(&self) -> Result<usize, IdentityStoreError> {
        Ok(self.seen.len())
    }

    fn entry(&self, id: &str) -> Result<Option<SeenEntry>, IdentityStoreError> {
        Ok(self.seen.get(id).map(|at| SeenEntry {
            id: id.to_string(),
            first_seen_at: *at,
        }))
    }

    fn flush(&mut self) -> Result<(), IdentityStoreError> {
        self.with_conn(|conn| conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);"))
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS crawled_records (
            id TEXT PRIMARY KEY,
            first_seen_at TEXT NOT NULL
        );
        ",
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn load_entries(conn: &Connection) -> rusqlite::Result<HashMap<String, DateTime<Utc>>> {
    let mut stmt = conn.prepare("SELECT id, first_seen_at FROM crawled_records")?;
    let rows = stmt.query_map([], |row| {
        let id: String = row.get(0)?;
        let at: String = row.get(1)?;
        Ok((id, at))
    })?;

    let mut seen = HashMap::new();
    for row in rows {
        let (id, at) = row?;
        let at = DateTime::parse_from_rfc3339(&at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| {
                log::warn!("Ledger entry {id} has unreadable timestamp '{at}'");
                DateTime::<Utc>::default()
            });
        seen.insert(id, at);
    }
    Ok(seen)
}

/// Non-durable ledger for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    seen: HashMap<String, DateTime<Utc>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn has_seen(&self, id: &str) -> Result<bool, IdentityStoreError> {
        Ok(self.seen.contains_key(id))
    }

    fn mark_seen(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), IdentityStoreError> {
        self.seen.entry(id.to_string()).or_insert(at);
        Ok(())
    }

    fn len(&self) -> Result<usize, IdentityStoreError> {
        Ok(self.seen.len())
    }

    fn entry(&self, id: &str) -> Result<Option<SeenEntry>, IdentityStoreError> {
        Ok(self.seen.get(id).map(|at| SeenEntry {
            id: id.to_string(),
            first_seen_at: *at,
        }))
    }

    fn flush(&mut self) -> Result<(), IdentityStoreError> {
        Ok(())
    }
}
