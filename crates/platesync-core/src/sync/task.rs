//! Background sync task
//!
//! Drains the queue when the device comes online, when an action is
//! enqueued while online, and whenever a flush is requested explicitly.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::engine::SyncEngine;
use super::status::FlushOutcome;
use crate::connectivity::ConnectivityMonitor;

const COMMAND_BUFFER: usize = 16;

/// Commands accepted by the sync task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Flush,
    Shutdown,
}

/// Cheap handle used by the queue to ask for a drain
#[derive(Clone)]
pub struct FlushTrigger {
    tx: mpsc::Sender<SyncCommand>,
    connectivity: ConnectivityMonitor,
}

impl FlushTrigger {
    pub fn new(tx: mpsc::Sender<SyncCommand>, connectivity: ConnectivityMonitor) -> Self {
        Self { tx, connectivity }
    }

    /// Request a flush unless offline
    ///
    /// Never waits. A full command buffer already holds a pending flush, so
    /// the request is dropped.
    pub fn request_if_online(&self) -> bool {
        if !self.connectivity.is_online() {
            return false;
        }
        self.tx.try_send(SyncCommand::Flush).is_ok()
    }
}

/// Owner handle for the spawned sync task
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    trigger: FlushTrigger,
    join: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask the task to drain now; returns `false` if it has stopped
    pub fn request_flush(&self) -> bool {
        match self.command_tx.try_send(SyncCommand::Flush) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn trigger(&self) -> FlushTrigger {
        self.trigger.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stop the task, letting an in-flight drain finish first
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.join.await {
            error!("Sync task ended abnormally: {}", e);
        }
    }
}

/// Spawn the background loop driving `engine`
///
/// Installs a [`FlushTrigger`] on the engine's queue so enqueues while
/// online schedule a drain. The trigger is removed when the task stops.
pub fn spawn_sync_task(engine: Arc<SyncEngine>) -> SyncHandle {
    let (command_tx, mut command_rx) = mpsc::channel(COMMAND_BUFFER);
    let trigger = FlushTrigger::new(command_tx.clone(), engine.connectivity().clone());
    engine.queue().set_trigger(trigger.clone());

    let mut online_rx = engine.connectivity().watch();

    let join = tokio::spawn(async move {
        let _ = online_rx.borrow_and_update();
        if engine.connectivity().is_online() {
            run_flush(&engine).await;
        }

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(SyncCommand::Flush) => run_flush(&engine).await,
                    Some(SyncCommand::Shutdown) | None => break,
                },
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *online_rx.borrow_and_update() {
                        debug!("Back online, draining queue");
                        run_flush(&engine).await;
                    }
                }
            }
        }

        engine.queue().clear_trigger();
        info!("Sync task stopped");
    });

    SyncHandle {
        command_tx,
        trigger,
        join,
    }
}

/// Run one drain in its own task so a panic cannot take the loop down
async fn run_flush(engine: &Arc<SyncEngine>) {
    let task_engine = Arc::clone(engine);
    match tokio::spawn(async move { task_engine.flush().await }).await {
        Ok(Ok(FlushOutcome::Skipped { reason })) => debug!("Flush skipped: {:?}", reason),
        Ok(Ok(FlushOutcome::Completed(_))) => {}
        Ok(Err(e)) => error!("Flush failed: {}", e),
        Err(e) => error!("Flush task panicked: {}", e),
    }
}
