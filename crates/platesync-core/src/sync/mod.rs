//! Queue synchronization
//!
//! [`SyncEngine`] performs a single drain of the [`ActionQueue`](crate::queue::ActionQueue);
//! [`spawn_sync_task`] runs it in the background in response to
//! connectivity changes and enqueues.

mod engine;
mod status;
mod task;

pub use engine::{SyncEngine, SyncError};
pub use status::{FlushOutcome, FlushReport, SkipReason, SyncPhase, SyncStatus};
pub use task::{spawn_sync_task, FlushTrigger, SyncCommand, SyncHandle};
