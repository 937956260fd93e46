//! Remote draft store abstraction.
//!
//! The sync engine talks to the server-held copy of each draft only through
//! [`RemoteDraftStore`]. [`HttpDraftStore`] speaks the REST contract;
//! [`mock::MockDraftStore`] keeps drafts in memory for tests.

mod http;
pub mod mock;

pub use http::{HttpDraftStore, HttpStoreConfig, ReadRetryPolicy};

use crate::error::SyncResult;
use async_trait::async_trait;
use draftsync_types::{Draft, DraftId, DraftKey};
use serde::Serialize;
use serde_json::Value;

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDraft {
    pub key: DraftKey,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl NewDraft {
    pub fn new(key: DraftKey, content: Value) -> Self {
        Self {
            key,
            content,
            metadata: None,
            owner_id: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<Value>) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }
}

/// Body of an update request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftPatch {
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Server-held drafts.
///
/// Implementations classify every failure into a [`crate::SyncError`] and
/// never retry writes themselves.
#[async_trait]
pub trait RemoteDraftStore: Send + Sync {
    /// Creates a draft and returns it with its assigned id.
    async fn create(&self, draft: NewDraft) -> SyncResult<Draft>;

    /// Replaces the content (and metadata, when given) of a draft.
    async fn update(&self, id: &DraftId, patch: DraftPatch) -> SyncResult<Draft>;

    /// Fetches one draft.
    async fn get(&self, id: &DraftId) -> SyncResult<Draft>;

    /// Lists every draft stored under a key.
    async fn list(&self, key: &DraftKey) -> SyncResult<Vec<Draft>>;

    /// Deletes a draft. Deleting a draft that no longer exists succeeds.
    async fn delete(&self, id: &DraftId) -> SyncResult<()>;
}
