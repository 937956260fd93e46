//! Sync engine implementation.
//!
//! Edits land in the local snapshot store immediately and in the outbox once
//! the debounce timer for their key expires. Processing passes drain the
//! outbox through the remote store, one pass per key at a time.

use crate::backoff::BackoffPolicy;
use crate::error::SyncError;
use crate::outbox::{FailureOutcome, Outbox, PassKind, UpsertCompletion};
use crate::remote::{DraftPatch, NewDraft, RemoteDraftStore};
use chrono::{DateTime, Utc};
use draftsync_storage::{OutboxJournal, SnapshotChange, SnapshotStore};
use draftsync_types::{
    Draft, DraftKey, LocalSnapshot, OriginId, OutboxAction, OutboxEntry, SyncStatus,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period after the last edit before it is queued (ms).
    pub debounce_ms: u64,
    /// Interval between periodic outbox passes (ms).
    pub flush_interval_ms: u64,
    /// Retries granted to a queued entry before it is marked failed.
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            flush_interval_ms: 5_000,
            max_attempts: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// An edit waiting for its debounce timer.
#[derive(Debug, Clone)]
struct PendingEdit {
    content: Value,
    metadata: Option<Value>,
    captured_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct KeyState {
    status: SyncStatus,
    last_error: Option<String>,
    owner_id: Option<String>,
    pending_edit: Option<PendingEdit>,
    /// Bumped on every edit; a timer only fires if it still matches.
    debounce_generation: u64,
}

/// Marks a key as having a processing pass in flight.
struct InFlight<'a> {
    keys: &'a std::sync::Mutex<HashSet<DraftKey>>,
    key: DraftKey,
}

impl<'a> InFlight<'a> {
    fn acquire(keys: &'a std::sync::Mutex<HashSet<DraftKey>>, key: &DraftKey) -> Option<Self> {
        let mut held = keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        held.insert(key.clone()).then(|| Self {
            keys,
            key: key.clone(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut held = self
            .keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        held.remove(&self.key);
    }
}

/// The draft sync engine.
///
/// Constructed behind an `Arc` so timers can reach it without keeping it
/// alive.
pub struct SyncEngine {
    this: Weak<SyncEngine>,
    origin: OriginId,
    config: SyncConfig,
    remote: Arc<dyn RemoteDraftStore>,
    snapshots: SnapshotStore,
    outbox: Mutex<Outbox>,
    keys: RwLock<HashMap<DraftKey, KeyState>>,
    in_flight: std::sync::Mutex<HashSet<DraftKey>>,
}

impl SyncEngine {
    /// Creates an engine and restores any outbox entries the journal holds.
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteDraftStore>,
        snapshots: SnapshotStore,
        journal: OutboxJournal,
    ) -> Arc<Self> {
        let outbox = Outbox::restore(journal);

        let mut keys = HashMap::new();
        for key in outbox.keys() {
            let entries = outbox.entries(&key);
            let failed = entries.iter().find(|e| e.failed);
            let state = KeyState {
                status: if failed.is_some() {
                    SyncStatus::Error
                } else {
                    SyncStatus::Saving
                },
                last_error: failed.and_then(|e| e.last_error.clone()),
                owner_id: entries.iter().find_map(|e| e.owner_id.clone()),
                ..KeyState::default()
            };
            keys.insert(key, state);
        }

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            origin: OriginId::new(),
            config,
            remote,
            snapshots,
            outbox: Mutex::new(outbox),
            keys: RwLock::new(keys),
            in_flight: std::sync::Mutex::new(HashSet::new()),
        })
    }

    /// An engine with process-local snapshots and outbox.
    pub fn in_memory(config: SyncConfig, remote: Arc<dyn RemoteDraftStore>) -> Arc<Self> {
        Self::new(
            config,
            remote,
            SnapshotStore::in_memory(),
            OutboxJournal::in_memory(),
        )
    }

    /// Tag carried by this engine's broadcasts.
    pub fn origin(&self) -> OriginId {
        self.origin
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<dyn RemoteDraftStore> {
        &self.remote
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    // ── Edits ────────────────────────────────────────────────────

    /// Records new content for `key`.
    ///
    /// The local snapshot is written before this returns. The outbox sees
    /// the edit once the debounce timer expires without a newer edit.
    pub async fn set_content(&self, key: &DraftKey, content: Value, metadata: Option<Value>) {
        let stored = self.snapshots.update(key, |prev| match prev {
            Some(mut snapshot) => {
                snapshot.record_edit(content.clone(), metadata.clone());
                snapshot
            }
            None => LocalSnapshot::new(content.clone(), metadata.clone()),
        });

        let generation = {
            let mut keys = self.keys.write().await;
            let state = keys.entry(key.clone()).or_default();
            state.pending_edit = Some(PendingEdit {
                content,
                metadata,
                captured_at: stored.updated_at,
            });
            state.status = SyncStatus::Saving;
            state.debounce_generation += 1;
            state.debounce_generation
        };
        self.arm_debounce(key.clone(), generation);
    }

    /// Queues the current content of `key` without waiting for the debounce
    /// timer, re-arms a failed entry, and runs a processing pass.
    pub async fn manual_save(&self, key: &DraftKey) -> SyncStatus {
        match self.take_pending_edit(key).await {
            Some(edit) => self.enqueue_edit(key, edit).await,
            None => self.enqueue_unsynced_snapshot(key).await,
        }
        if self.outbox.lock().await.rearm(key) {
            debug!(%key, "Re-armed outbox entries");
        }
        self.process_key(key).await
    }

    /// Queues a remote delete for `key` and clears its local snapshot.
    /// A queued upsert for the key is cancelled.
    pub async fn delete_draft(&self, key: &DraftKey) {
        {
            let mut keys = self.keys.write().await;
            let state = keys.entry(key.clone()).or_default();
            state.pending_edit = None;
            state.debounce_generation += 1;
            state.status = SyncStatus::Saving;
            state.last_error = None;
        }

        let draft_id = self.snapshots.read(key).and_then(|s| s.draft_id);
        let cancelled = self.outbox.lock().await.enqueue_delete(key, draft_id);
        self.snapshots.clear(key);
        self.snapshots.broadcast(SnapshotChange::Cleared {
            key: key.clone(),
            origin: self.origin,
        });
        info!(%key, cancelled_upsert = cancelled.is_some(), "Draft deleted locally");
    }

    /// Owner sent with the next create for `key`.
    pub async fn set_owner(&self, key: &DraftKey, owner_id: Option<String>) {
        self.keys.write().await.entry(key.clone()).or_default().owner_id = owner_id;
    }

    // ── Observation ──────────────────────────────────────────────

    pub async fn status(&self, key: &DraftKey) -> SyncStatus {
        self.keys
            .read()
            .await
            .get(key)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Message of the last failed call for `key`.
    pub async fn last_error(&self, key: &DraftKey) -> Option<String> {
        self.keys
            .read()
            .await
            .get(key)
            .and_then(|s| s.last_error.clone())
    }

    /// Local snapshot for `key`. Never touches the network.
    pub fn snapshot(&self, key: &DraftKey) -> Option<LocalSnapshot> {
        self.snapshots.read(key)
    }

    /// Queued entries for `key`, in processing order.
    pub async fn pending(&self, key: &DraftKey) -> Vec<OutboxEntry> {
        self.outbox.lock().await.entries(key)
    }

    /// True while a local edit for `key` waits on its timer or in the outbox.
    pub async fn has_pending_edit(&self, key: &DraftKey) -> bool {
        let waiting = self
            .keys
            .read()
            .await
            .get(key)
            .is_some_and(|s| s.pending_edit.is_some());
        waiting
            || self
                .outbox
                .lock()
                .await
                .get(key, OutboxAction::Upsert)
                .is_some()
    }

    // ── Processing ───────────────────────────────────────────────

    /// Runs a processing pass for every key with queued entries.
    pub async fn flush(&self) {
        let keys = self.outbox.lock().await.keys();
        if keys.is_empty() {
            return;
        }
        debug!(keys = keys.len(), "Flushing outbox");
        join_all(keys.iter().map(|key| self.process_key(key))).await;
    }

    /// Periodic pass. Like [`flush`](Self::flush), but entries that failed
    /// on a transient error get one more attempt.
    pub async fn tick(&self) {
        let keys = self.outbox.lock().await.keys();
        if keys.is_empty() {
            return;
        }
        trace!(keys = keys.len(), "Periodic outbox pass");
        join_all(keys.iter().map(|key| self.run_pass(key, PassKind::Periodic))).await;
    }

    /// Queues every edit still waiting on a debounce timer.
    pub async fn flush_pending_edits(&self) -> usize {
        let edits: Vec<(DraftKey, PendingEdit)> = {
            let mut keys = self.keys.write().await;
            keys.iter_mut()
                .filter_map(|(key, state)| {
                    state.pending_edit.take().map(|edit| (key.clone(), edit))
                })
                .collect()
        };
        let count = edits.len();
        for (key, edit) in edits {
            self.enqueue_edit(&key, edit).await;
        }
        count
    }

    /// Clears failure state on every queued entry so the next pass retries
    /// them.
    pub async fn rearm_all(&self) {
        let keys = self.outbox.lock().await.rearm_all();
        if !keys.is_empty() {
            info!(keys = keys.len(), "Re-armed failed outbox entries");
        }
    }

    /// Drains the due entries of `key`, oldest intent first.
    ///
    /// Returns immediately when a pass for the key is already running.
    pub async fn process_key(&self, key: &DraftKey) -> SyncStatus {
        self.run_pass(key, PassKind::Scheduled).await
    }

    async fn run_pass(&self, key: &DraftKey, pass: PassKind) -> SyncStatus {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight, key) else {
            debug!(%key, "Processing pass already in flight");
            return self.status(key).await;
        };

        loop {
            let next = self.outbox.lock().await.next_due(key, Instant::now(), pass);
            let Some(entry) = next else {
                break;
            };

            // a failed entry keeps its error status until a retry succeeds
            if !entry.failed {
                self.update_state(key, |s| s.status = SyncStatus::Saving).await;
            }
            let result = match entry.action {
                OutboxAction::Delete => self.push_delete(key, &entry).await,
                OutboxAction::Upsert => self.push_upsert(key, entry.clone()).await,
            };
            if let Err(error) = result
                && !self.handle_failure(key, &entry, &error).await
            {
                break;
            }
        }

        self.status(key).await
    }

    async fn push_delete(&self, key: &DraftKey, entry: &OutboxEntry) -> Result<(), SyncError> {
        match &entry.draft_id {
            Some(id) => self.remote.delete(id).await?,
            None => debug!(%key, "Delete of a draft never created remotely"),
        }

        let upsert_queued = {
            let mut outbox = self.outbox.lock().await;
            outbox.complete_delete(key);
            outbox.get(key, OutboxAction::Upsert).is_some()
        };
        self.update_state(key, |s| {
            s.last_error = None;
            s.status = if upsert_queued || s.pending_edit.is_some() {
                SyncStatus::Saving
            } else {
                SyncStatus::Idle
            };
        })
        .await;
        Ok(())
    }

    async fn push_upsert(&self, key: &DraftKey, mut entry: OutboxEntry) -> Result<(), SyncError> {
        if entry.draft_id.is_none()
            && let Some(id) = self.snapshots.read(key).and_then(|s| s.draft_id)
        {
            self.outbox.lock().await.assign_draft_id(key, &id);
            entry.draft_id = Some(id);
        }

        let draft = match &entry.draft_id {
            None => {
                let request = NewDraft::new(key.clone(), entry.content.clone())
                    .with_metadata(entry.metadata.clone())
                    .with_owner(entry.owner_id.clone());
                self.remote.create(request).await?
            }
            Some(id) => {
                let patch = DraftPatch {
                    content: entry.content.clone(),
                    metadata: entry.metadata.clone(),
                };
                self.remote.update(id, patch).await?
            }
        };

        let completion = self
            .outbox
            .lock()
            .await
            .complete_upsert(key, entry.revision, &draft.id);

        match completion {
            UpsertCompletion::Removed | UpsertCompletion::Superseded => {
                self.snapshots.update(key, |prev| {
                    let mut snapshot = prev.unwrap_or_else(|| {
                        LocalSnapshot::new(entry.content.clone(), entry.metadata.clone())
                    });
                    snapshot.mark_synced(draft.id.clone(), entry.captured_at);
                    snapshot
                });
                self.snapshots.broadcast(SnapshotChange::Updated {
                    key: key.clone(),
                    origin: self.origin,
                    draft_id: Some(draft.id.clone()),
                });

                let superseded = completion == UpsertCompletion::Superseded;
                self.update_state(key, |s| {
                    s.last_error = None;
                    s.status = if superseded || s.pending_edit.is_some() {
                        SyncStatus::Saving
                    } else {
                        SyncStatus::Saved
                    };
                })
                .await;
                debug!(%key, id = %draft.id, revision = entry.revision, superseded, "Draft saved");
            }
            UpsertCompletion::Redirected => {
                info!(
                    %key,
                    id = %draft.id,
                    "Upsert finished after local delete, handing id to queued delete"
                );
            }
            UpsertCompletion::Dropped => {
                debug!(%key, id = %draft.id, "Discarding result for a key with nothing queued");
            }
        }
        Ok(())
    }

    /// Records a failed call. Returns whether the pass should continue.
    async fn handle_failure(&self, key: &DraftKey, entry: &OutboxEntry, error: &SyncError) -> bool {
        let delay = error
            .retry_after()
            .unwrap_or_else(|| self.config.backoff.delay(entry.attempts));
        let outcome = self.outbox.lock().await.record_failure(
            key,
            entry.action,
            entry.revision,
            error,
            delay,
            self.config.max_attempts,
        );

        match outcome {
            FailureOutcome::Retrying { attempts, delay } => {
                warn!(
                    %key,
                    action = %entry.action,
                    attempts,
                    ?delay,
                    "Outbox call failed, retrying: {}",
                    error
                );
                self.update_state(key, |s| s.last_error = Some(error.to_string()))
                    .await;
                self.spawn_pass(key.clone(), delay);
                false
            }
            FailureOutcome::Failed { attempts } => {
                warn!(
                    %key,
                    action = %entry.action,
                    attempts,
                    "Outbox entry failed: {}",
                    error
                );
                self.update_state(key, |s| {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(error.to_string());
                })
                .await;
                false
            }
            FailureOutcome::Stale => true,
        }
    }

    // ── Adoption ─────────────────────────────────────────────────

    /// Replaces local state for `key` with a remote draft.
    pub async fn adopt_remote(&self, key: &DraftKey, draft: &Draft) {
        {
            let mut keys = self.keys.write().await;
            let state = keys.entry(key.clone()).or_default();
            state.pending_edit = None;
            state.debounce_generation += 1;
            state.status = SyncStatus::Saved;
            state.last_error = None;
        }
        self.outbox.lock().await.cancel_upsert(key);
        self.snapshots.write(key, &LocalSnapshot::from_draft(draft));
        self.snapshots.broadcast(SnapshotChange::Updated {
            key: key.clone(),
            origin: self.origin,
            draft_id: Some(draft.id.clone()),
        });
        info!(%key, id = %draft.id, "Adopted remote draft");
    }

    /// Applies a snapshot change published by another consumer.
    pub async fn apply_remote_change(&self, change: &SnapshotChange) {
        if change.origin() == self.origin {
            return;
        }
        match change {
            SnapshotChange::Updated {
                key,
                draft_id: Some(id),
                ..
            } => {
                if self.outbox.lock().await.assign_draft_id(key, id) {
                    info!(%key, %id, "Adopted draft id from another consumer");
                }
            }
            SnapshotChange::Updated { draft_id: None, .. } => {}
            SnapshotChange::Cleared { key, .. } => {
                debug!(%key, "Snapshot cleared by another consumer");
            }
        }
    }

    pub(crate) async fn set_status(&self, key: &DraftKey, status: SyncStatus) {
        self.update_state(key, |s| s.status = status).await;
    }

    // ── Internals ────────────────────────────────────────────────

    async fn update_state<R>(&self, key: &DraftKey, f: impl FnOnce(&mut KeyState) -> R) -> R {
        let mut keys = self.keys.write().await;
        f(keys.entry(key.clone()).or_default())
    }

    async fn take_pending_edit(&self, key: &DraftKey) -> Option<PendingEdit> {
        self.keys
            .write()
            .await
            .get_mut(key)
            .and_then(|s| s.pending_edit.take())
    }

    async fn enqueue_edit(&self, key: &DraftKey, edit: PendingEdit) {
        let owner_id = self
            .keys
            .read()
            .await
            .get(key)
            .and_then(|s| s.owner_id.clone());
        let draft_id = self.snapshots.read(key).and_then(|s| s.draft_id);
        self.outbox.lock().await.enqueue_upsert(
            key,
            draft_id,
            edit.content,
            edit.metadata,
            owner_id,
            edit.captured_at,
        );
    }

    /// Queues the stored snapshot when it holds edits the remote store never
    /// confirmed and nothing is queued for it yet. Covers edits made before
    /// a restart whose debounce never fired.
    async fn enqueue_unsynced_snapshot(&self, key: &DraftKey) {
        if self
            .outbox
            .lock()
            .await
            .get(key, OutboxAction::Upsert)
            .is_some()
        {
            return;
        }
        if let Some(snapshot) = self
            .snapshots
            .read(key)
            .filter(LocalSnapshot::has_unsynced_changes)
        {
            let edit = PendingEdit {
                content: snapshot.content,
                metadata: snapshot.metadata,
                captured_at: snapshot.updated_at,
            };
            self.enqueue_edit(key, edit).await;
        }
    }

    async fn fire_debounce(&self, key: &DraftKey, generation: u64) {
        let edit = {
            let mut keys = self.keys.write().await;
            match keys.get_mut(key) {
                Some(state) if state.debounce_generation == generation => state.pending_edit.take(),
                _ => None,
            }
        };
        if let Some(edit) = edit {
            self.enqueue_edit(key, edit).await;
        }
    }

    fn arm_debounce(&self, key: DraftKey, generation: u64) {
        let engine = self.this.clone();
        let delay = self.config.debounce();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                engine.fire_debounce(&key, generation).await;
            }
        });
    }

    /// Runs a pass for `key` once `delay` has elapsed.
    ///
    /// The delay never drops below the backoff base, so the pass starts after
    /// the current one has released the key.
    fn spawn_pass(&self, key: DraftKey, delay: Duration) {
        let delay = delay.max(self.config.backoff.base_delay(0));
        let engine = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = engine.upgrade() {
                engine.process_key(&key).await;
            }
        });
    }
}
