//! Long-lived processing task.
//!
//! The runner drains the outbox on a fixed interval, reacts to runtime
//! signals, and applies snapshot changes published by other consumers.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Signals delivered to a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Queue pending edits, re-arm failed entries, and process everything.
    Flush,
    /// Connectivity came back: re-arm failed entries and process now.
    NetworkRestored,
    /// The host is going away: queue pending edits and start a final pass
    /// without waiting for it.
    Teardown,
    Shutdown,
}

/// Handle to a running engine. Dropping it stops the runner.
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub async fn send(&self, command: SyncCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    pub async fn flush(&self) -> SyncResult<()> {
        self.send(SyncCommand::Flush).await
    }

    pub async fn network_restored(&self) -> SyncResult<()> {
        self.send(SyncCommand::NetworkRestored).await
    }

    pub async fn teardown(&self) -> SyncResult<()> {
        self.send(SyncCommand::Teardown).await
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the runner and waits for it to exit.
    pub async fn shutdown(self) -> SyncResult<()> {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        self.task.await.map_err(|_| SyncError::ChannelClosed)
    }
}

impl SyncEngine {
    /// Spawns the runner for this engine.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let (commands, rx) = mpsc::channel(32);
        let task = tokio::spawn(run(Arc::clone(self), rx));
        SyncHandle { commands, task }
    }
}

async fn run(engine: Arc<SyncEngine>, mut commands: mpsc::Receiver<SyncCommand>) {
    let mut changes = engine.snapshots().bus().subscribe_all();
    let mut ticker = tokio::time::interval(engine.config().flush_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut bus_open = true;

    info!(origin = %engine.origin(), "Sync runner started");

    loop {
        tokio::select! {
            _ = ticker.tick() => engine.tick().await,
            command = commands.recv() => match command {
                Some(SyncCommand::Flush) => {
                    engine.flush_pending_edits().await;
                    engine.rearm_all().await;
                    engine.flush().await;
                }
                Some(SyncCommand::NetworkRestored) => {
                    info!("Network restored, flushing outbox");
                    engine.rearm_all().await;
                    engine.flush().await;
                }
                Some(SyncCommand::Teardown) => {
                    let queued = engine.flush_pending_edits().await;
                    debug!(queued, "Teardown, starting final flush");
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move { engine.flush().await });
                }
                Some(SyncCommand::Shutdown) | None => break,
            },
            change = changes.recv(), if bus_open => match change {
                Some(change) => engine.apply_remote_change(&change).await,
                None => bus_open = false,
            },
        }
    }

    info!(origin = %engine.origin(), "Sync runner stopped");
}
