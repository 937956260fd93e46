//! In-memory remote draft store for tests and demos.

use super::{DraftPatch, NewDraft, RemoteDraftStore};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::Utc;
use draftsync_types::{Draft, DraftId, DraftKey};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Operation selector for scripted failures and call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Create,
    Update,
    Get,
    List,
    Delete,
}

#[derive(Default)]
struct MockState {
    drafts: BTreeMap<DraftId, Draft>,
    failures: HashMap<MockOp, VecDeque<SyncError>>,
    calls: HashMap<MockOp, usize>,
    offline: bool,
    latency: Duration,
}

/// A remote store that keeps drafts in memory.
///
/// Failures can be scripted per operation and are consumed in order. While
/// offline every call fails with a network error.
#[derive(Default)]
pub struct MockDraftStore {
    state: Mutex<MockState>,
}

impl MockDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next call to `op` fail with `error`.
    pub fn fail_next(&self, op: MockOp, error: SyncError) {
        self.fail_times(op, 1, error);
    }

    /// Makes the next `times` calls to `op` fail with `error`.
    pub fn fail_times(&self, op: MockOp, times: usize, error: SyncError) {
        let mut state = self.state();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Delay applied to every call before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Calls made to `op`, failed ones included.
    pub fn calls(&self, op: MockOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Seeds a draft as if another client had created it.
    pub fn insert(&self, draft: Draft) {
        self.state().drafts.insert(draft.id.clone(), draft);
    }

    /// Every stored draft, ordered by id.
    pub fn drafts(&self) -> Vec<Draft> {
        self.state().drafts.values().cloned().collect()
    }

    pub fn draft(&self, id: &DraftId) -> Option<Draft> {
        self.state().drafts.get(id).cloned()
    }

    async fn enter(&self, op: MockOp) -> SyncResult<()> {
        let latency = {
            let mut state = self.state();
            *state.calls.entry(op).or_default() += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        if state.offline {
            return Err(SyncError::Network("offline".to_string()));
        }
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn not_found(id: &DraftId) -> SyncError {
    SyncError::Client {
        status: 404,
        message: format!("draft {id} not found"),
    }
}

#[async_trait]
impl RemoteDraftStore for MockDraftStore {
    async fn create(&self, draft: NewDraft) -> SyncResult<Draft> {
        self.enter(MockOp::Create).await?;
        let now = Utc::now();
        let created = Draft {
            id: DraftId::new(Uuid::now_v7().to_string()),
            key: draft.key,
            content: draft.content,
            metadata: draft.metadata,
            owner_id: draft.owner_id,
            created_at: now,
            updated_at: now,
        };
        self.state()
            .drafts
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn update(&self, id: &DraftId, patch: DraftPatch) -> SyncResult<Draft> {
        self.enter(MockOp::Update).await?;
        let mut state = self.state();
        let draft = state.drafts.get_mut(id).ok_or_else(|| not_found(id))?;
        draft.content = patch.content;
        if patch.metadata.is_some() {
            draft.metadata = patch.metadata;
        }
        draft.updated_at = Utc::now();
        Ok(draft.clone())
    }

    async fn get(&self, id: &DraftId) -> SyncResult<Draft> {
        self.enter(MockOp::Get).await?;
        self.draft(id).ok_or_else(|| not_found(id))
    }

    async fn list(&self, key: &DraftKey) -> SyncResult<Vec<Draft>> {
        self.enter(MockOp::List).await?;
        Ok(self
            .state()
            .drafts
            .values()
            .filter(|d| &d.key == key)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &DraftId) -> SyncResult<()> {
        self.enter(MockOp::Delete).await?;
        self.state().drafts.remove(id);
        Ok(())
    }
}
