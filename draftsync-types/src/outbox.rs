//! Durable queued intents.
//!
//! An outbox entry is created when a debounce timer expires or a manual
//! save / delete is requested. It lives until the remote store confirms it.
//! Entries that exhaust their attempt budget are marked `failed` and kept,
//! never silently dropped.

use crate::{DraftId, DraftKey, Error};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What the entry asks the remote store to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxAction {
    /// Create the draft if it has no id yet, otherwise update it.
    Upsert,
    /// Delete the remote draft.
    Delete,
}

impl OutboxAction {
    /// Stable lowercase name, used as a storage column value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OutboxAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upsert" => Ok(Self::Upsert),
            "delete" => Ok(Self::Delete),
            other => Err(Error::UnknownVariant {
                kind: "outbox action",
                value: other.to_string(),
            }),
        }
    }
}

/// A queued write waiting for remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub action: OutboxAction,
    pub key: DraftKey,
    /// Absent for a draft that has not been created remotely yet.
    #[serde(default)]
    pub draft_id: Option<DraftId>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Failed processing passes so far.
    #[serde(default)]
    pub attempts: u32,
    /// Bumped every time a newer payload is coalesced into this entry.
    #[serde(default)]
    pub revision: u64,
    /// Local-mutation instant of the payload currently carried.
    pub captured_at: DateTime<Utc>,
    /// Attempt budget exhausted or the error was not retryable.
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    /// The last failure was transient. Failed entries with this set are
    /// retried by the periodic pass.
    #[serde(default)]
    pub transient: bool,
}

impl OutboxEntry {
    /// Creates an upsert intent carrying the given payload.
    #[must_use]
    pub fn upsert(
        key: DraftKey,
        draft_id: Option<DraftId>,
        content: Value,
        metadata: Option<Value>,
        owner_id: Option<String>,
    ) -> Self {
        Self {
            action: OutboxAction::Upsert,
            key,
            draft_id,
            content,
            metadata,
            owner_id,
            attempts: 0,
            revision: 0,
            captured_at: Utc::now(),
            failed: false,
            last_error: None,
            transient: false,
        }
    }

    /// Creates a delete intent for the given key.
    #[must_use]
    pub fn delete(key: DraftKey, draft_id: Option<DraftId>) -> Self {
        Self {
            action: OutboxAction::Delete,
            key,
            draft_id,
            content: Value::Null,
            metadata: None,
            owner_id: None,
            attempts: 0,
            revision: 0,
            captured_at: Utc::now(),
            failed: false,
            last_error: None,
            transient: false,
        }
    }

    /// Replaces the payload with a newer edit.
    ///
    /// The attempt counter and failure flag are reset: a fresh edit is an
    /// explicit trigger and deserves a full retry budget.
    pub fn coalesce(
        &mut self,
        content: Value,
        metadata: Option<Value>,
        captured_at: DateTime<Utc>,
    ) {
        self.content = content;
        if metadata.is_some() {
            self.metadata = metadata;
        }
        self.captured_at = captured_at;
        self.revision = self.revision.wrapping_add(1);
        self.rearm();
    }

    /// Clears the failure state so the next pass tries again.
    pub fn rearm(&mut self) {
        self.attempts = 0;
        self.failed = false;
        self.transient = false;
    }
}
