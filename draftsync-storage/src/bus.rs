//! Named publish/subscribe channel for snapshot changes.
//!
//! Consumers editing the same draft key (several views, several tabs sharing
//! one database) learn about each other's writes through this bus instead of
//! polling storage. The bus carries notifications only; the data itself is
//! always re-read from the snapshot store.

use draftsync_types::{DraftId, DraftKey, OriginId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;

/// Per-channel buffer. A subscriber that falls further behind skips ahead.
const CHANNEL_CAPACITY: usize = 64;

/// A change to the stored snapshot of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotChange {
    /// The snapshot was written. `draft_id` is the id it now carries.
    Updated {
        key: DraftKey,
        origin: OriginId,
        draft_id: Option<DraftId>,
    },
    /// The snapshot was removed (draft deleted).
    Cleared { key: DraftKey, origin: OriginId },
}

impl SnapshotChange {
    pub fn key(&self) -> &DraftKey {
        match self {
            Self::Updated { key, .. } | Self::Cleared { key, .. } => key,
        }
    }

    pub fn origin(&self) -> OriginId {
        match self {
            Self::Updated { origin, .. } | Self::Cleared { origin, .. } => *origin,
        }
    }
}

struct BusInner {
    channels: Mutex<HashMap<DraftKey, broadcast::Sender<SnapshotChange>>>,
    all: broadcast::Sender<SnapshotChange>,
}

/// Cheaply cloneable handle to a shared bus.
#[derive(Clone)]
pub struct SnapshotBus {
    inner: Arc<BusInner>,
}

impl Default for SnapshotBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBus {
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                channels: Mutex::new(HashMap::new()),
                all,
            }),
        }
    }

    /// Subscribes to changes of a single key.
    /// Dropping the subscription unsubscribes.
    pub fn subscribe(&self, key: &DraftKey) -> SnapshotSubscription {
        let receiver = self
            .inner
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        SnapshotSubscription {
            key: Some(key.clone()),
            receiver,
            bus: self.inner.clone(),
        }
    }

    /// Subscribes to changes of every key.
    pub fn subscribe_all(&self) -> SnapshotSubscription {
        SnapshotSubscription {
            key: None,
            receiver: self.inner.all.subscribe(),
            bus: self.inner.clone(),
        }
    }

    /// Publishes a change. Returns how many subscribers will see it.
    pub fn publish(&self, change: SnapshotChange) -> usize {
        let keyed = self
            .inner
            .channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(change.key()).cloned())
            .and_then(|sender| sender.send(change.clone()).ok())
            .unwrap_or(0);
        let all = self.inner.all.send(change).unwrap_or(0);
        keyed + all
    }

    /// Number of live per-key subscribers for `key`.
    pub fn subscriber_count(&self, key: &DraftKey) -> usize {
        self.inner
            .channels
            .lock()
            .ok()
            .and_then(|channels| channels.get(key).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }
}

/// Receiving end of a bus subscription.
pub struct SnapshotSubscription {
    key: Option<DraftKey>,
    receiver: broadcast::Receiver<SnapshotChange>,
    bus: Arc<BusInner>,
}

impl SnapshotSubscription {
    /// Waits for the next change. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<SnapshotChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(key = ?self.key, skipped, "Snapshot subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns a change if one is already queued.
    pub fn try_recv(&mut self) -> Option<SnapshotChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for SnapshotSubscription {
    fn drop(&mut self) {
        let Some(key) = &self.key else { return };
        if let Ok(mut channels) = self.bus.channels.lock() {
            // Our own receiver is still alive here.
            if channels.get(key).is_some_and(|s| s.receiver_count() <= 1) {
                channels.remove(key);
            }
        }
    }
}
