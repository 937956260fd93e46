//! Durable journal of outbox entries.
//!
//! The sync engine keeps its queue in memory and mirrors every change here
//! so queued intents survive restarts. Like snapshot writes, journal writes
//! are best-effort.

use crate::backend::{MemoryStore, OutboxBackend};
use draftsync_types::{DraftKey, OutboxAction, OutboxEntry};
use std::sync::Arc;
use tracing::warn;

/// Namespace used when a consumer does not pick one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Outbox persistence scoped to one consumer namespace.
#[derive(Clone)]
pub struct OutboxJournal {
    backend: Arc<dyn OutboxBackend>,
    namespace: String,
}

impl OutboxJournal {
    pub fn new(backend: Arc<dyn OutboxBackend>, namespace: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: namespace.into(),
        }
    }

    /// A journal that only lives as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), DEFAULT_NAMESPACE)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Records the current state of an entry. Never fails.
    pub fn save(&self, entry: &OutboxEntry) {
        if let Err(e) = self.backend.save_entry(&self.namespace, entry) {
            warn!(
                key = %entry.key,
                action = %entry.action,
                "Failed to journal outbox entry: {}",
                e
            );
        }
    }

    /// Forgets an entry. Never fails.
    pub fn remove(&self, key: &DraftKey, action: OutboxAction) {
        if let Err(e) = self.backend.remove_entry(&self.namespace, key, action) {
            warn!(%key, %action, "Failed to remove journaled outbox entry: {}", e);
        }
    }

    /// Loads every journaled entry, oldest first.
    pub fn load(&self) -> Vec<OutboxEntry> {
        self.backend
            .load_entries(&self.namespace)
            .unwrap_or_else(|e| {
                warn!(namespace = %self.namespace, "Failed to load outbox journal: {}", e);
                Vec::new()
            })
    }
}
