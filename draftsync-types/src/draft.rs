//! Remote drafts and their local echo.

use crate::{DraftId, DraftKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A draft as held by the remote store.
///
/// Every `Draft` carries an id: a draft that was never acknowledged by the
/// remote store only exists locally, as a `LocalSnapshot` and possibly a
/// queued `OutboxEntry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Id assigned by the remote store.
    pub id: DraftId,
    /// Logical slot this draft belongs to.
    pub key: DraftKey,
    /// Opaque structured document.
    pub content: Value,
    /// Opaque annotations (editor step, source, ...).
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Principal that owns the draft, if any.
    #[serde(default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable local copy of the current content for one key.
///
/// Always reflects the most recent local edit, synced or not, so the UI can
/// restore instantly on start-up without a network round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    /// Remote id, once the remote store has acknowledged a create.
    #[serde(default)]
    pub draft_id: Option<DraftId>,
    pub content: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Local-mutation instant of the content last confirmed by the remote store.
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Instant of the last local mutation.
    pub updated_at: DateTime<Utc>,
}

impl LocalSnapshot {
    /// Creates a snapshot for freshly edited, never synced content.
    #[must_use]
    pub fn new(content: Value, metadata: Option<Value>) -> Self {
        Self {
            draft_id: None,
            content,
            metadata,
            last_synced_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Builds a snapshot that mirrors a remote draft exactly.
    #[must_use]
    pub fn from_draft(draft: &Draft) -> Self {
        let now = Utc::now();
        Self {
            draft_id: Some(draft.id.clone()),
            content: draft.content.clone(),
            metadata: draft.metadata.clone(),
            last_synced_at: Some(now),
            updated_at: now,
        }
    }

    /// Replaces the content, stamping a new mutation instant.
    /// The draft id and sync marker are kept.
    pub fn record_edit(&mut self, content: Value, metadata: Option<Value>) {
        self.content = content;
        if metadata.is_some() {
            self.metadata = metadata;
        }
        self.updated_at = Utc::now().max(self.updated_at);
    }

    /// Marks the content captured at `content_updated_at` as confirmed remotely.
    pub fn mark_synced(&mut self, draft_id: DraftId, content_updated_at: DateTime<Utc>) {
        self.draft_id = Some(draft_id);
        self.last_synced_at = Some(match self.last_synced_at {
            Some(prev) if prev > content_updated_at => prev,
            _ => content_updated_at,
        });
    }

    /// True when a local edit has not been confirmed by the remote store.
    #[must_use]
    pub fn has_unsynced_changes(&self) -> bool {
        match self.last_synced_at {
            Some(synced) => self.updated_at > synced,
            None => true,
        }
    }
}
