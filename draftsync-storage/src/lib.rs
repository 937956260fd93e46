//! Local persistence for draftsync.
//!
//! Provides the durable local side of draft synchronization:
//! - `SnapshotStore`: the latest local content per draft key, readable on
//!   start-up without touching the network
//! - `OutboxJournal`: a durable mirror of queued remote writes
//! - `SnapshotBus`: in-process notifications between consumers of one key
//!
//! # Backends
//!
//! - `SqliteStore` keeps snapshots and outbox rows in one SQLite file
//! - `MemoryStore` keeps them in process memory
//!
//! Both the snapshot store and the journal swallow storage errors after
//! logging them. Losing local durability degrades crash recovery but must
//! never interrupt editing.

mod backend;
mod bus;
mod error;
mod outbox;
mod snapshot;
mod sqlite;

pub use backend::{MemoryStore, OutboxBackend, SnapshotBackend};
pub use bus::{SnapshotBus, SnapshotChange, SnapshotSubscription};
pub use error::{StorageError, StorageResult};
pub use outbox::{OutboxJournal, DEFAULT_NAMESPACE};
pub use snapshot::SnapshotStore;
pub use sqlite::SqliteStore;
