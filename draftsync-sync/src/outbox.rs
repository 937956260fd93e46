//! Per-key outbox queue.
//!
//! The queue is a map from draft key to at most one delete and at most one
//! upsert. A new edit coalesces into the queued upsert instead of appending,
//! so a draft that has not been created yet can only ever be created once.
//! When both are queued the delete is processed first.
//!
//! Every mutation is mirrored to the durable [`OutboxJournal`].

use crate::error::SyncError;
use chrono::{DateTime, Utc};
use draftsync_storage::OutboxJournal;
use draftsync_types::{DraftId, DraftKey, OutboxAction, OutboxEntry};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Queued {
    entry: OutboxEntry,
    /// Backoff gate. `None` means due now.
    due_at: Option<Instant>,
}

impl Queued {
    fn new(entry: OutboxEntry) -> Self {
        Self { entry, due_at: None }
    }

    fn is_ready(&self, now: Instant, pass: PassKind) -> bool {
        if self.entry.failed {
            return pass == PassKind::Periodic && self.entry.transient;
        }
        self.due_at.is_none_or(|due| due <= now)
    }
}

/// Who is asking for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Explicit triggers and backoff timers. Failed entries are skipped.
    Scheduled,
    /// The periodic tick. An entry that failed on a transient error gets one
    /// more attempt per tick.
    Periodic,
}

#[derive(Debug, Default)]
struct KeyQueue {
    delete: Option<Queued>,
    upsert: Option<Queued>,
}

impl KeyQueue {
    fn slot(&mut self, action: OutboxAction) -> &mut Option<Queued> {
        match action {
            OutboxAction::Delete => &mut self.delete,
            OutboxAction::Upsert => &mut self.upsert,
        }
    }

    /// The entry that must be processed next, whatever its state.
    fn head(&self) -> Option<&Queued> {
        self.delete.as_ref().or(self.upsert.as_ref())
    }

    fn is_empty(&self) -> bool {
        self.delete.is_none() && self.upsert.is_none()
    }
}

/// Whether an edit created a new upsert or replaced a queued payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created,
    Coalesced,
}

/// What happened to the queue after a create or update succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertCompletion {
    /// The confirmed payload was the latest; the entry is gone.
    Removed,
    /// A newer edit arrived while the call was in flight. The entry stays,
    /// now carrying the draft id, and the next pass sends an update.
    Superseded,
    /// The key was deleted while the call was in flight. The id was handed
    /// to the queued delete; an upsert queued behind it is left alone.
    Redirected,
    /// Nothing queued for the key can use the result.
    Dropped,
}

/// What happened to an entry after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Due again after `delay`.
    Retrying { attempts: u32, delay: Duration },
    /// Kept, but skipped until re-armed.
    Failed { attempts: u32 },
    /// The entry was replaced or removed while the call was in flight.
    Stale,
}

/// In-memory outbox backed by a journal.
pub struct Outbox {
    queues: BTreeMap<DraftKey, KeyQueue>,
    journal: OutboxJournal,
    /// Revisions are unique across the whole outbox, so a result for a
    /// cancelled entry never matches its replacement.
    last_revision: u64,
}

impl Outbox {
    /// An empty outbox. The journal is not read.
    pub fn new(journal: OutboxJournal) -> Self {
        Self {
            queues: BTreeMap::new(),
            journal,
            last_revision: 0,
        }
    }

    /// Rebuilds the queue from everything the journal holds.
    pub fn restore(journal: OutboxJournal) -> Self {
        let mut outbox = Self::new(journal);
        let entries = outbox.journal.load();
        let count = entries.len();
        for entry in entries {
            outbox.last_revision = outbox.last_revision.max(entry.revision);
            let action = entry.action;
            let queue = outbox.queues.entry(entry.key.clone()).or_default();
            *queue.slot(action) = Some(Queued::new(entry));
        }
        if count > 0 {
            debug!(namespace = %outbox.journal.namespace(), count, "Restored outbox entries");
        }
        outbox
    }

    pub fn journal(&self) -> &OutboxJournal {
        &self.journal
    }

    /// Queues an edit, coalescing into the pending upsert for the key.
    pub fn enqueue_upsert(
        &mut self,
        key: &DraftKey,
        draft_id: Option<DraftId>,
        content: Value,
        metadata: Option<Value>,
        owner_id: Option<String>,
        captured_at: DateTime<Utc>,
    ) -> Enqueued {
        self.last_revision += 1;
        let revision = self.last_revision;
        let queue = self.queues.entry(key.clone()).or_default();
        let outcome = match queue.upsert.as_mut() {
            Some(queued) => {
                queued.entry.coalesce(content, metadata, captured_at);
                if queued.entry.draft_id.is_none() {
                    queued.entry.draft_id = draft_id;
                }
                if owner_id.is_some() {
                    queued.entry.owner_id = owner_id;
                }
                queued.due_at = None;
                Enqueued::Coalesced
            }
            None => {
                let mut entry =
                    OutboxEntry::upsert(key.clone(), draft_id, content, metadata, owner_id);
                entry.captured_at = captured_at;
                queue.upsert = Some(Queued::new(entry));
                Enqueued::Created
            }
        };
        if let Some(queued) = queue.upsert.as_mut() {
            queued.entry.revision = revision;
            self.journal.save(&queued.entry);
        }
        debug!(%key, revision, ?outcome, "Queued upsert");
        outcome
    }

    /// Queues a delete. Any queued upsert for the key is cancelled and
    /// returned.
    pub fn enqueue_delete(
        &mut self,
        key: &DraftKey,
        draft_id: Option<DraftId>,
    ) -> Option<OutboxEntry> {
        let queue = self.queues.entry(key.clone()).or_default();
        let cancelled = queue.upsert.take().map(|q| q.entry);
        let draft_id = draft_id.or_else(|| cancelled.as_ref().and_then(|e| e.draft_id.clone()));

        let entry = match queue.delete.as_mut() {
            Some(queued) => {
                if queued.entry.draft_id.is_none() {
                    queued.entry.draft_id = draft_id;
                }
                queued.entry.rearm();
                queued.due_at = None;
                queued.entry.clone()
            }
            None => {
                let entry = OutboxEntry::delete(key.clone(), draft_id);
                queue.delete = Some(Queued::new(entry.clone()));
                entry
            }
        };

        if cancelled.is_some() {
            self.journal.remove(key, OutboxAction::Upsert);
        }
        self.journal.save(&entry);
        debug!(%key, draft_id = ?entry.draft_id, cancelled = cancelled.is_some(), "Queued delete");
        cancelled
    }

    /// The next entry for `key` if it is due. Entries are strictly ordered:
    /// a waiting or failed delete holds back the upsert behind it.
    pub fn next_due(&self, key: &DraftKey, now: Instant, pass: PassKind) -> Option<OutboxEntry> {
        self.queues
            .get(key)
            .and_then(KeyQueue::head)
            .filter(|queued| queued.is_ready(now, pass))
            .map(|queued| queued.entry.clone())
    }

    /// When the head entry of `key` becomes due, if it is waiting on backoff.
    pub fn due_at(&self, key: &DraftKey) -> Option<Instant> {
        self.queues
            .get(key)
            .and_then(KeyQueue::head)
            .filter(|queued| !queued.entry.failed)
            .and_then(|queued| queued.due_at)
    }

    pub fn get(&self, key: &DraftKey, action: OutboxAction) -> Option<&OutboxEntry> {
        let queue = self.queues.get(key)?;
        match action {
            OutboxAction::Delete => queue.delete.as_ref(),
            OutboxAction::Upsert => queue.upsert.as_ref(),
        }
        .map(|queued| &queued.entry)
    }

    /// Queued entries for `key` in processing order.
    pub fn entries(&self, key: &DraftKey) -> Vec<OutboxEntry> {
        self.queues
            .get(key)
            .map(|queue| {
                [queue.delete.as_ref(), queue.upsert.as_ref()]
                    .into_iter()
                    .flatten()
                    .map(|queued| queued.entry.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keys with at least one queued entry.
    pub fn keys(&self) -> Vec<DraftKey> {
        self.queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queues
            .values()
            .map(|q| usize::from(q.delete.is_some()) + usize::from(q.upsert.is_some()))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills the draft id of a queued upsert that has none.
    pub fn assign_draft_id(&mut self, key: &DraftKey, draft_id: &DraftId) -> bool {
        let Some(queued) = self.queues.get_mut(key).and_then(|q| q.upsert.as_mut()) else {
            return false;
        };
        if queued.entry.draft_id.is_some() {
            return false;
        }
        queued.entry.draft_id = Some(draft_id.clone());
        self.journal.save(&queued.entry);
        debug!(%key, %draft_id, "Adopted draft id into queued upsert");
        true
    }

    /// Applies a confirmed create or update of `revision`.
    pub fn complete_upsert(
        &mut self,
        key: &DraftKey,
        revision: u64,
        draft_id: &DraftId,
    ) -> UpsertCompletion {
        let Some(queue) = self.queues.get_mut(key) else {
            return UpsertCompletion::Dropped;
        };

        let queued_revision = queue.upsert.as_ref().map(|q| q.entry.revision);
        let completion = if queued_revision == Some(revision) {
            queue.upsert = None;
            self.journal.remove(key, OutboxAction::Upsert);
            UpsertCompletion::Removed
        } else if let Some(delete) = queue.delete.as_mut() {
            // An upsert behind a delete belongs to a new draft.
            if delete.entry.draft_id.is_none() {
                delete.entry.draft_id = Some(draft_id.clone());
                self.journal.save(&delete.entry);
                UpsertCompletion::Redirected
            } else {
                UpsertCompletion::Dropped
            }
        } else if let Some(queued) = queue.upsert.as_mut() {
            queued.entry.draft_id = Some(draft_id.clone());
            self.journal.save(&queued.entry);
            UpsertCompletion::Superseded
        } else {
            UpsertCompletion::Dropped
        };

        if queue.is_empty() {
            self.queues.remove(key);
        }
        completion
    }

    /// Removes the queued delete after the remote store confirmed it.
    pub fn complete_delete(&mut self, key: &DraftKey) {
        if let Some(queue) = self.queues.get_mut(key) {
            if queue.delete.take().is_some() {
                self.journal.remove(key, OutboxAction::Delete);
            }
            if queue.is_empty() {
                self.queues.remove(key);
            }
        }
    }

    /// Records a failed call for the entry of `action` at `revision`.
    ///
    /// Retryable errors are retried until `max_attempts` retries have been
    /// spent; everything else marks the entry failed.
    pub fn record_failure(
        &mut self,
        key: &DraftKey,
        action: OutboxAction,
        revision: u64,
        error: &SyncError,
        delay: Duration,
        max_attempts: u32,
    ) -> FailureOutcome {
        let Some(queued) = self
            .queues
            .get_mut(key)
            .and_then(|q| q.slot(action).as_mut())
            .filter(|queued| queued.entry.revision == revision)
        else {
            return FailureOutcome::Stale;
        };

        let retry = error.is_retryable() && queued.entry.attempts < max_attempts;
        queued.entry.attempts += 1;
        queued.entry.last_error = Some(error.to_string());
        queued.entry.transient = error.is_retryable();

        let outcome = if retry {
            queued.due_at = Some(Instant::now() + delay);
            FailureOutcome::Retrying {
                attempts: queued.entry.attempts,
                delay,
            }
        } else {
            queued.entry.failed = true;
            queued.due_at = None;
            FailureOutcome::Failed {
                attempts: queued.entry.attempts,
            }
        };
        self.journal.save(&queued.entry);
        outcome
    }

    /// Clears failure state and backoff for every entry of `key`.
    pub fn rearm(&mut self, key: &DraftKey) -> bool {
        let Some(queue) = self.queues.get_mut(key) else {
            return false;
        };
        let mut rearmed = false;
        for queued in [queue.delete.as_mut(), queue.upsert.as_mut()].into_iter().flatten() {
            if queued.entry.failed || queued.entry.attempts > 0 || queued.due_at.is_some() {
                queued.entry.rearm();
                queued.due_at = None;
                self.journal.save(&queued.entry);
                rearmed = true;
            }
        }
        rearmed
    }

    /// Re-arms every key. Returns the keys that changed.
    pub fn rearm_all(&mut self) -> Vec<DraftKey> {
        self.keys()
            .into_iter()
            .filter(|key| self.rearm(key))
            .collect()
    }

    /// Drops the queued upsert for `key`, if any.
    pub fn cancel_upsert(&mut self, key: &DraftKey) -> Option<OutboxEntry> {
        let queue = self.queues.get_mut(key)?;
        let cancelled = queue.upsert.take().map(|q| q.entry);
        if cancelled.is_some() {
            self.journal.remove(key, OutboxAction::Upsert);
        }
        if queue.is_empty() {
            self.queues.remove(key);
        }
        cancelled
    }
}
