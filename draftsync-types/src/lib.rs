//! Core type definitions for draftsync.
//!
//! This crate defines the plain data shared by the storage and sync layers:
//! - Draft keys, remote draft ids and consumer origins
//! - The remote `Draft` record and its local echo, `LocalSnapshot`
//! - Durable outbox intents (`OutboxEntry`)
//! - The observable per-key `SyncStatus`
//!
//! Draft content and metadata are opaque JSON documents. Their shape belongs
//! to whatever feature is doing the editing, not to this crate.

mod draft;
mod ids;
mod outbox;
mod status;

pub use draft::{Draft, LocalSnapshot};
pub use ids::{DraftId, DraftKey, OriginId};
pub use outbox::{OutboxAction, OutboxEntry};
pub use status::SyncStatus;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
