//! Queue drain engine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::status::{FlushOutcome, FlushReport, SkipReason, SyncPhase, SyncStatus};
use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::queue::{ActionQueue, FailureOutcome, PendingAction};
use crate::storage::StorageError;
use crate::transport::{FailureDisposition, Response, Transport, TransportError};

/// Errors returned by an explicit, user-requested sync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Cannot sync while offline")]
    Offline,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Drains the [`ActionQueue`] through a [`Transport`]
///
/// Actions run one at a time in FIFO order. At most one drain runs at a
/// time; a concurrent request returns [`SkipReason::AlreadySyncing`]
/// without touching the transport.
pub struct SyncEngine {
    queue: Arc<ActionQueue>,
    transport: Arc<dyn Transport>,
    connectivity: ConnectivityMonitor,
    clock: Arc<dyn Clock>,
    action_timeout: Duration,
    syncing: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    phase_tx: watch::Sender<SyncPhase>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<ActionQueue>,
        transport: Arc<dyn Transport>,
        connectivity: ConnectivityMonitor,
        clock: Arc<dyn Clock>,
        action_timeout: Duration,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SyncPhase::Idle);
        Self {
            queue,
            transport,
            connectivity,
            clock,
            action_timeout,
            syncing: AtomicBool::new(false),
            last_sync_time: Mutex::new(None),
            phase_tx,
        }
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.last_sync_time.lock().ok().and_then(|guard| *guard)
    }

    /// Watch IDLE/SYNCING transitions
    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.connectivity.is_online(),
            is_syncing: self.is_syncing(),
            last_sync_time: self.last_sync_time(),
            pending_count: self.queue.len().await,
            failed_count: self.queue.failed_count().await,
        }
    }

    /// Drain the queue if online, idle and non-empty
    ///
    /// Per-action failures are logged and folded into the report; only
    /// storage failures are returned as errors.
    pub async fn flush(&self) -> Result<FlushOutcome, StorageError> {
        if !self.connectivity.is_online() {
            debug!("Skipping flush: offline");
            return Ok(skipped(SkipReason::Offline));
        }

        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Skipping flush: already syncing");
            return Ok(skipped(SkipReason::AlreadySyncing));
        }
        let _guard = SyncingGuard::enter(self);

        let snapshot = self.queue.dequeue_all().await;
        if snapshot.is_empty() {
            return Ok(skipped(SkipReason::Empty));
        }

        info!("Flushing {} queued action(s)", snapshot.len());
        let report = self.drain(&snapshot).await?;

        if report.succeeded > 0 {
            if let Ok(mut last) = self.last_sync_time.lock() {
                *last = Some(self.clock.now());
            }
        }

        info!(
            "Flush finished: {} succeeded, {} retrying, {} dropped, {} deferred",
            report.succeeded, report.retried, report.dropped, report.deferred
        );
        Ok(FlushOutcome::Completed(report))
    }

    /// Like [`flush`](Self::flush), but refuses to run while offline
    pub async fn force_sync(&self) -> Result<FlushOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        Ok(self.flush().await?)
    }

    async fn drain(&self, snapshot: &[PendingAction]) -> Result<FlushReport, StorageError> {
        let mut report = FlushReport::default();

        for (index, action) in snapshot.iter().enumerate() {
            if !self.connectivity.is_online() {
                report.deferred = snapshot.len() - index;
                info!("Went offline mid-flush; deferring {} action(s)", report.deferred);
                break;
            }

            report.attempted += 1;
            let error = match self.execute(action).await {
                Ok(_) => {
                    self.queue.remove(action.id).await?;
                    report.succeeded += 1;
                    debug!("Delivered {} {} ({})", action.method, action.endpoint, action.id);
                    continue;
                }
                Err(error) => error,
            };

            match error.disposition() {
                FailureDisposition::Defer => {
                    report.deferred = snapshot.len() - index;
                    warn!(
                        "Network unavailable while delivering {}; deferring {} action(s): {}",
                        action.id, report.deferred, error
                    );
                    self.connectivity.set_online(false);
                    break;
                }
                FailureDisposition::Retry => {
                    match self.queue.record_failure(action.id, &error.to_string()).await? {
                        FailureOutcome::Retrying { retry_count } => {
                            report.retried += 1;
                            warn!(
                                "Delivery of {} failed (attempt {}/{}): {}",
                                action.id, retry_count, action.max_retries, error
                            );
                        }
                        FailureOutcome::Exhausted(_) => report.dropped += 1,
                        FailureOutcome::Missing => {}
                    }
                }
                FailureDisposition::Drop => {
                    if self.queue.reject(action.id, &error.to_string()).await?.is_some() {
                        report.dropped += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn execute(&self, action: &PendingAction) -> Result<Response, TransportError> {
        let request = action.to_request();
        match tokio::time::timeout(self.action_timeout, self.transport.execute(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.action_timeout)),
        }
    }
}

fn skipped(reason: SkipReason) -> FlushOutcome {
    FlushOutcome::Skipped { reason }
}

/// Clears the single-flight flag even if the drain errors out or is cancelled
struct SyncingGuard<'a> {
    engine: &'a SyncEngine,
}

impl<'a> SyncingGuard<'a> {
    fn enter(engine: &'a SyncEngine) -> Self {
        engine.phase_tx.send_replace(SyncPhase::Syncing);
        Self { engine }
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.engine.syncing.store(false, Ordering::SeqCst);
        self.engine.phase_tx.send_replace(SyncPhase::Idle);
    }
}
