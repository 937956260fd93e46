//! SQLite-backed snapshot and outbox storage.
//!
//! Snapshots and outbox entries are stored as JSON text in a small,
//! dedicated database file. Several consumers may open the same file; SQLite
//! serializes their writes.

use crate::backend::{OutboxBackend, SnapshotBackend};
use crate::error::{StorageError, StorageResult};
use draftsync_types::{DraftKey, LocalSnapshot, OutboxAction, OutboxEntry};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// How long a writer waits on a database locked by another consumer.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Persistent draft storage backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outbox (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                action TEXT NOT NULL,
                entry TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                UNIQUE(namespace, key, action)
            );
            ",
        )?;
        Ok(())
    }
}

impl SnapshotBackend for SqliteStore {
    fn put(&self, key: &DraftKey, snapshot: &LocalSnapshot) -> StorageResult<()> {
        let json = serde_json::to_string(snapshot)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO snapshots (key, snapshot, updated_at) VALUES (?1, ?2, ?3)",
            params![key.as_str(), json, snapshot.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, key: &DraftKey) -> StorageResult<Option<LocalSnapshot>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT snapshot FROM snapshots WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &DraftKey) -> StorageResult<()> {
        self.conn()?.execute(
            "DELETE FROM snapshots WHERE key = ?1",
            params![key.as_str()],
        )?;
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<DraftKey>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM snapshots ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(DraftKey::new(row?));
        }
        Ok(keys)
    }
}

impl OutboxBackend for SqliteStore {
    fn save_entry(&self, namespace: &str, entry: &OutboxEntry) -> StorageResult<()> {
        let json = serde_json::to_string(entry)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO outbox (namespace, key, action, entry, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                namespace,
                entry.key.as_str(),
                entry.action.as_str(),
                json,
                entry.captured_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn remove_entry(
        &self,
        namespace: &str,
        key: &DraftKey,
        action: OutboxAction,
    ) -> StorageResult<()> {
        self.conn()?.execute(
            "DELETE FROM outbox WHERE namespace = ?1 AND key = ?2 AND action = ?3",
            params![namespace, key.as_str(), action.as_str()],
        )?;
        Ok(())
    }

    fn load_entries(&self, namespace: &str) -> StorageResult<Vec<OutboxEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT action, entry FROM outbox WHERE namespace = ?1 ORDER BY captured_at, rowid",
        )?;
        let rows = stmt.query_map(params![namespace], |row| {
            let action: String = row.get(0)?;
            let entry: String = row.get(1)?;
            Ok((action, entry))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (action_str, json) = row?;
            let action: OutboxAction = action_str
                .parse()
                .map_err(|e| StorageError::InvalidData(format!("{e}")))?;
            let entry: OutboxEntry = serde_json::from_str(&json)?;
            if entry.action != action {
                return Err(StorageError::InvalidData(format!(
                    "outbox row for {} says {action} but entry says {}",
                    entry.key, entry.action
                )));
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}
