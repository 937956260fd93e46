//! Best-effort local snapshot store.
//!
//! Writes go straight to the durable backend so a crash loses at most the
//! edits of the current debounce interval. Storage failures are logged and
//! swallowed: the caller's in-memory state stays authoritative for the
//! session.

use crate::backend::{MemoryStore, SnapshotBackend};
use crate::bus::{SnapshotBus, SnapshotChange};
use draftsync_types::{DraftKey, LocalSnapshot};
use std::sync::Arc;
use tracing::{debug, warn};

/// Local snapshot cache plus its change bus.
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
    bus: SnapshotBus,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>, bus: SnapshotBus) -> Self {
        Self { backend, bus }
    }

    /// A process-local store with a private bus.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), SnapshotBus::new())
    }

    /// Persists the snapshot. Never fails.
    pub fn write(&self, key: &DraftKey, snapshot: &LocalSnapshot) {
        match self.backend.put(key, snapshot) {
            Ok(()) => debug!(%key, "Snapshot written"),
            Err(e) => warn!(%key, "Failed to persist snapshot: {}", e),
        }
    }

    /// Reads the snapshot for `key`. Unreadable rows are reported as absent.
    pub fn read(&self, key: &DraftKey) -> Option<LocalSnapshot> {
        match self.backend.get(key) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(%key, "Failed to read snapshot: {}", e);
                None
            }
        }
    }

    /// Read-modify-write helper. `f` receives the current snapshot, if any,
    /// and returns the one to store. Returns what was stored.
    pub fn update<F>(&self, key: &DraftKey, f: F) -> LocalSnapshot
    where
        F: FnOnce(Option<LocalSnapshot>) -> LocalSnapshot,
    {
        let next = f(self.read(key));
        self.write(key, &next);
        next
    }

    /// Removes the snapshot. Never fails.
    pub fn clear(&self, key: &DraftKey) {
        if let Err(e) = self.backend.remove(key) {
            warn!(%key, "Failed to clear snapshot: {}", e);
        }
    }

    /// Keys that currently have a stored snapshot.
    pub fn keys(&self) -> Vec<DraftKey> {
        self.backend.keys().unwrap_or_else(|e| {
            warn!("Failed to list snapshot keys: {}", e);
            Vec::new()
        })
    }

    /// Notifies other consumers that the snapshot for a key changed.
    pub fn broadcast(&self, change: SnapshotChange) -> usize {
        self.bus.publish(change)
    }

    pub fn bus(&self) -> &SnapshotBus {
        &self.bus
    }
}
