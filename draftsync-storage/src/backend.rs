//! Storage backend traits and the in-memory implementation.

use crate::error::{StorageError, StorageResult};
use draftsync_types::{DraftKey, LocalSnapshot, OutboxAction, OutboxEntry};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Durable key → snapshot storage.
///
/// Implementations must persist on every call: a snapshot handed to `put`
/// is expected to survive an unexpected process exit right after it returns.
pub trait SnapshotBackend: Send + Sync {
    fn put(&self, key: &DraftKey, snapshot: &LocalSnapshot) -> StorageResult<()>;
    fn get(&self, key: &DraftKey) -> StorageResult<Option<LocalSnapshot>>;
    fn remove(&self, key: &DraftKey) -> StorageResult<()>;
    fn keys(&self) -> StorageResult<Vec<DraftKey>>;
}

/// Durable outbox rows, one per `(namespace, key, action)`.
pub trait OutboxBackend: Send + Sync {
    fn save_entry(&self, namespace: &str, entry: &OutboxEntry) -> StorageResult<()>;
    fn remove_entry(&self, namespace: &str, key: &DraftKey, action: OutboxAction)
        -> StorageResult<()>;
    fn load_entries(&self, namespace: &str) -> StorageResult<Vec<OutboxEntry>>;
}

type OutboxRowKey = (String, DraftKey, OutboxAction);

/// Process-local backend. Nothing survives a restart; useful for tests and
/// for consumers that only want the cross-consumer bus.
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<DraftKey, LocalSnapshot>>,
    outbox: Mutex<HashMap<OutboxRowKey, OutboxEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotBackend for MemoryStore {
    fn put(&self, key: &DraftKey, snapshot: &LocalSnapshot) -> StorageResult<()> {
        self.snapshots
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .insert(key.clone(), snapshot.clone());
        Ok(())
    }

    fn get(&self, key: &DraftKey) -> StorageResult<Option<LocalSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .get(key)
            .cloned())
    }

    fn remove(&self, key: &DraftKey) -> StorageResult<()> {
        self.snapshots
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<DraftKey>> {
        Ok(self
            .snapshots
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .keys()
            .cloned()
            .collect())
    }
}

impl OutboxBackend for MemoryStore {
    fn save_entry(&self, namespace: &str, entry: &OutboxEntry) -> StorageResult<()> {
        self.outbox.lock().map_err(|_| StorageError::Poisoned)?.insert(
            (namespace.to_string(), entry.key.clone(), entry.action),
            entry.clone(),
        );
        Ok(())
    }

    fn remove_entry(
        &self,
        namespace: &str,
        key: &DraftKey,
        action: OutboxAction,
    ) -> StorageResult<()> {
        self.outbox
            .lock()
            .map_err(|_| StorageError::Poisoned)?
            .remove(&(namespace.to_string(), key.clone(), action));
        Ok(())
    }

    fn load_entries(&self, namespace: &str) -> StorageResult<Vec<OutboxEntry>> {
        let outbox = self.outbox.lock().map_err(|_| StorageError::Poisoned)?;
        let mut entries: Vec<OutboxEntry> = outbox
            .iter()
            .filter(|((ns, _, _), _)| ns == namespace)
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
        Ok(entries)
    }
}
