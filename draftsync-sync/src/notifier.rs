//! Load-time divergence detection and the restore / discard actions the
//! draft picker needs.

use crate::engine::SyncEngine;
use crate::error::SyncResult;
use draftsync_types::{Draft, DraftId, DraftKey, LocalSnapshot, SyncStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// A remote draft whose content differs from the local snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub key: DraftKey,
    /// Most recently updated remote draft for the key.
    pub remote: Draft,
    /// Local snapshot at the time of the check, if any.
    pub local: Option<LocalSnapshot>,
}

/// Compares local and remote state and applies the caller's decision.
pub struct RestoreNotifier {
    engine: Arc<SyncEngine>,
}

impl RestoreNotifier {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Looks for a remote draft that differs from local state.
    ///
    /// Nothing is reported while a local edit is pending: that edit will
    /// overwrite the remote copy anyway. Local state is never modified,
    /// except that a matching remote draft lends its id to a snapshot that
    /// has none.
    pub async fn check(&self, key: &DraftKey) -> SyncResult<Option<Divergence>> {
        let drafts = self.engine.remote().list(key).await?;
        let Some(remote) = drafts.into_iter().max_by_key(|d| d.updated_at) else {
            debug!(%key, "No remote drafts");
            return Ok(None);
        };

        let local = self.engine.snapshot(key);
        if let Some(snapshot) = &local
            && snapshot.content == remote.content
        {
            if snapshot.draft_id.is_none() {
                self.engine.snapshots().update(key, |prev| {
                    let mut snapshot = prev.unwrap_or_else(|| LocalSnapshot::from_draft(&remote));
                    snapshot.draft_id = Some(remote.id.clone());
                    snapshot
                });
            }
            return Ok(None);
        }

        let unsynced = local.as_ref().is_some_and(LocalSnapshot::has_unsynced_changes);
        if unsynced || self.engine.has_pending_edit(key).await {
            debug!(%key, "Remote differs but a local edit is pending");
            return Ok(None);
        }

        info!(%key, id = %remote.id, "Remote draft differs from local state");
        if self.engine.status(key).await == SyncStatus::Idle {
            self.engine.set_status(key, SyncStatus::Conflict).await;
        }
        Ok(Some(Divergence {
            key: key.clone(),
            remote,
            local,
        }))
    }

    /// Overwrites local state with the remote draft.
    pub async fn restore(&self, key: &DraftKey, draft: &Draft) {
        self.engine.adopt_remote(key, draft).await;
    }

    /// Deletes the remote draft and leaves local state alone.
    pub async fn discard(&self, key: &DraftKey, id: &DraftId) -> SyncResult<()> {
        self.engine.remote().delete(id).await?;
        if self.engine.status(key).await == SyncStatus::Conflict {
            self.engine.set_status(key, SyncStatus::Idle).await;
        }
        info!(%key, %id, "Discarded remote draft");
        Ok(())
    }

    /// Every remote draft stored under `key`, newest first.
    pub async fn list(&self, key: &DraftKey) -> SyncResult<Vec<Draft>> {
        let mut drafts = self.engine.remote().list(key).await?;
        drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(drafts)
    }

    pub async fn delete(&self, id: &DraftId) -> SyncResult<()> {
        self.engine.remote().delete(id).await
    }
}
