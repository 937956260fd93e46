//! Debounced, offline-tolerant draft synchronization.
//!
//! Keeps in-progress edits durably persisted across reloads, network loss
//! and concurrent consumers of the same draft, while sending the remote
//! store at most one create per draft and never reordering writes for a key.
//!
//! # Architecture
//!
//! - **Engine**: records edits into the local snapshot store, debounces
//!   them, and drains the outbox through the remote store
//! - **Outbox**: per-key queue holding at most one upsert and one delete,
//!   mirrored to a durable journal
//! - **Remote**: the server-held drafts, over HTTP or in memory
//! - **Deduplicator / rate limiter**: guard every HTTP request
//! - **Notifier**: detects a divergent remote draft at load time
//!
//! ## Flow
//!
//! 1. `set_content` writes the local snapshot and arms a debounce timer
//! 2. On expiry the edit is coalesced into the key's queued upsert
//! 3. A processing pass (interval, network restored, manual save) sends it
//! 4. Success fills the draft id, marks the snapshot synced and broadcasts
//!    the change to other consumers; failure backs off and retries
//!
//! # Example
//!
//! ```
//! use draftsync_sync::{mock::MockDraftStore, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let engine = SyncEngine::in_memory(SyncConfig::default(), Arc::new(MockDraftStore::new()));
//! let key = "post-composer".into();
//! engine
//!     .set_content(&key, serde_json::json!({"text": "hello"}), None)
//!     .await;
//! engine.manual_save(&key).await;
//! # }
//! ```

pub mod backoff;
pub mod dedup;
mod engine;
mod error;
mod notifier;
pub mod outbox;
pub mod rate_limit;
pub mod remote;
mod runner;

pub use backoff::BackoffPolicy;
pub use dedup::{request_key, DedupConfig, Deduplicator, RequestBody};
pub use engine::{SyncConfig, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use notifier::{Divergence, RestoreNotifier};
pub use outbox::{Enqueued, FailureOutcome, Outbox, PassKind, UpsertCompletion};
pub use rate_limit::{
    endpoint_scope, RateLimitConfig, RateLimitGate, RateLimitGateConfig, RateLimiter, GLOBAL_SCOPE,
};
pub use remote::{
    mock, DraftPatch, HttpDraftStore, HttpStoreConfig, NewDraft, ReadRetryPolicy, RemoteDraftStore,
};
pub use runner::{SyncCommand, SyncHandle};
