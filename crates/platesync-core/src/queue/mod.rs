//! Durable action queue
//!
//! Mutations that cannot (or should not) run immediately are appended here
//! and drained by the [`SyncEngine`](crate::sync::SyncEngine).
//!
//! ## Durability
//!
//! Every state change is written to the [`DurableStore`] before it is
//! applied in memory, so a crash between enqueue and delivery never loses
//! an action. A crash between a successful delivery and its `remove` causes
//! one redundant replay on the next drain; endpoints must tolerate that.
//!
//! ## Layout
//!
//! - `queue:pending` - JSON array of [`PendingAction`] in FIFO order
//! - `queue:dead_letters` - JSON array of [`DeadLetter`]

mod action;

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::storage::{get_json, set_json, DurableStore, StorageResult};
use crate::sync::FlushTrigger;

pub use action::{ActionKind, DeadLetter, NewAction, PendingAction};

const PENDING_KEY: &str = "queue:pending";
const DEAD_LETTER_KEY: &str = "queue:dead_letters";

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<PendingAction>,
    dead_letters: Vec<DeadLetter>,
}

/// Outcome of recording a failed delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// The action stays queued with the new retry count
    Retrying { retry_count: u32 },
    /// The retry budget is spent; the action moved to the dead-letter list
    Exhausted(DeadLetter),
    /// No action with that id is queued
    Missing,
}

/// FIFO queue of pending mutations, persisted on every change
pub struct ActionQueue {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    default_max_retries: u32,
    state: Mutex<QueueState>,
    trigger: StdMutex<Option<FlushTrigger>>,
}

impl ActionQueue {
    /// Load the queue from `store`
    pub async fn open(
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        default_max_retries: u32,
    ) -> StorageResult<Self> {
        let pending: Vec<PendingAction> = get_json(store.as_ref(), PENDING_KEY)
            .await?
            .unwrap_or_default();
        let dead_letters: Vec<DeadLetter> = get_json(store.as_ref(), DEAD_LETTER_KEY)
            .await?
            .unwrap_or_default();

        if !pending.is_empty() {
            info!("Restored {} pending action(s) from storage", pending.len());
        }

        Ok(Self {
            store,
            clock,
            default_max_retries: default_max_retries.max(1),
            state: Mutex::new(QueueState {
                pending,
                dead_letters,
            }),
            trigger: StdMutex::new(None),
        })
    }

    /// Install the hook used to request a drain after each enqueue
    pub fn set_trigger(&self, trigger: FlushTrigger) {
        if let Ok(mut guard) = self.trigger.lock() {
            *guard = Some(trigger);
        }
    }

    pub fn clear_trigger(&self) {
        if let Ok(mut guard) = self.trigger.lock() {
            *guard = None;
        }
    }

    /// Append an action and persist it
    ///
    /// The action is durable once this returns. If a trigger is installed and
    /// the device is online, a drain is requested without waiting for it.
    pub async fn enqueue(&self, action: NewAction) -> StorageResult<Uuid> {
        let pending = action.into_pending(self.clock.now(), self.default_max_retries);
        let id = pending.id;

        {
            let mut state = self.state.lock().await;
            let mut next = state.pending.clone();
            next.push(pending.clone());
            set_json(self.store.as_ref(), PENDING_KEY, &next).await?;
            state.pending = next;
        }

        info!(
            "Queued {} {} {} ({})",
            pending.kind, pending.method, pending.endpoint, id
        );

        let trigger = self.trigger.lock().ok().and_then(|guard| guard.clone());
        if let Some(trigger) = trigger {
            trigger.request_if_online();
        }

        Ok(id)
    }

    /// Snapshot of the queue in FIFO order; nothing is removed
    pub async fn dequeue_all(&self) -> Vec<PendingAction> {
        self.state.lock().await.pending.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<PendingAction> {
        self.state
            .lock()
            .await
            .pending
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    /// Remove an action; returns `false` if it was not queued
    pub async fn remove(&self, id: Uuid) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        if !state.pending.iter().any(|a| a.id == id) {
            return Ok(false);
        }

        let next: Vec<PendingAction> = state
            .pending
            .iter()
            .filter(|a| a.id != id)
            .cloned()
            .collect();
        set_json(self.store.as_ref(), PENDING_KEY, &next).await?;
        state.pending = next;
        debug!("Removed action {}", id);
        Ok(true)
    }

    /// Count a failed attempt against the action's retry budget
    ///
    /// Once `retry_count` reaches `max_retries` the action is moved to the
    /// dead-letter list with `reason`.
    pub async fn record_failure(&self, id: Uuid, reason: &str) -> StorageResult<FailureOutcome> {
        let mut state = self.state.lock().await;
        let Some(position) = state.pending.iter().position(|a| a.id == id) else {
            return Ok(FailureOutcome::Missing);
        };

        let mut action = state.pending[position].clone();
        action.retry_count = (action.retry_count + 1).min(action.max_retries);

        if action.retry_count >= action.max_retries {
            let letter = DeadLetter {
                action,
                reason: format!("retries exhausted: {}", reason),
                failed_at: self.clock.now(),
            };
            self.move_to_dead_letters(&mut state, letter.clone()).await?;
            warn!(
                "Dropped action {} ({} {}) after {} attempt(s): {}",
                id,
                letter.action.method,
                letter.action.endpoint,
                letter.action.retry_count,
                reason
            );
            return Ok(FailureOutcome::Exhausted(letter));
        }

        let retry_count = action.retry_count;
        let mut next = state.pending.clone();
        next[position] = action;
        set_json(self.store.as_ref(), PENDING_KEY, &next).await?;
        state.pending = next;
        debug!("Action {} failed (attempt {}): {}", id, retry_count, reason);
        Ok(FailureOutcome::Retrying { retry_count })
    }

    /// Drop an action immediately, keeping a dead-letter record
    pub async fn reject(&self, id: Uuid, reason: &str) -> StorageResult<Option<DeadLetter>> {
        let mut state = self.state.lock().await;
        let Some(action) = state.pending.iter().find(|a| a.id == id).cloned() else {
            return Ok(None);
        };

        let letter = DeadLetter {
            action,
            reason: reason.to_string(),
            failed_at: self.clock.now(),
        };
        self.move_to_dead_letters(&mut state, letter.clone()).await?;
        warn!(
            "Rejected action {} ({} {}): {}",
            id, letter.action.method, letter.action.endpoint, reason
        );
        Ok(Some(letter))
    }

    /// Persist the dead letter first, then drop the pending entry
    ///
    /// A crash between the two writes leaves the action in both lists; the
    /// dead-letter append is keyed by id so a later drop does not duplicate it.
    async fn move_to_dead_letters(
        &self,
        state: &mut QueueState,
        letter: DeadLetter,
    ) -> StorageResult<()> {
        let id = letter.action.id;

        let mut dead = state.dead_letters.clone();
        dead.retain(|d| d.action.id != id);
        dead.push(letter);
        set_json(self.store.as_ref(), DEAD_LETTER_KEY, &dead).await?;
        state.dead_letters = dead;

        let pending: Vec<PendingAction> = state
            .pending
            .iter()
            .filter(|a| a.id != id)
            .cloned()
            .collect();
        set_json(self.store.as_ref(), PENDING_KEY, &pending).await?;
        state.pending = pending;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Number of actions dropped permanently
    pub async fn failed_count(&self) -> usize {
        self.state.lock().await.dead_letters.len()
    }

    /// Forget every dead letter; returns how many were cleared
    pub async fn clear_dead_letters(&self) -> StorageResult<usize> {
        let mut state = self.state.lock().await;
        let count = state.dead_letters.len();
        if count == 0 {
            return Ok(0);
        }
        self.store.remove(DEAD_LETTER_KEY).await?;
        state.dead_letters.clear();
        info!("Cleared {} dead letter(s)", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryStore, SqliteStore, StorageError};
    use serde_json::json;
    use tempfile::TempDir;

    async fn open_queue(store: &MemoryStore, clock: &ManualClock) -> ActionQueue {
        ActionQueue::open(Arc::new(store.clone()), Arc::new(clock.clone()), 3)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_preserves_fifo_order() {
        let store = MemoryStore::new();
        let clock = ManualClock::at_millis(1_000);
        let queue = open_queue(&store, &clock).await;

        let a = queue.enqueue(NewAction::create("/meals", json!({"n": "a"}))).await.unwrap();
        let b = queue.enqueue(NewAction::update("/meals/1", json!({"n": "b"}))).await.unwrap();
        let c = queue.enqueue(NewAction::delete("/meals/2")).await.unwrap();

        let ids: Vec<Uuid> = queue.dequeue_all().await.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert_eq!(queue.len().await, 3);
        // Snapshot does not remove anything
        assert_eq!(queue.len().await, 3);
    }

    #[tokio::test]
    async fn test_enqueue_is_persisted_before_returning() {
        let store = MemoryStore::new();
        let clock = ManualClock::at_millis(42);
        let queue = open_queue(&store, &clock).await;

        let id = queue.enqueue(NewAction::create("/meals", json!({}))).await.unwrap();

        let raw = store.get(PENDING_KEY).await.unwrap().unwrap();
        assert!(raw.contains(&id.to_string()));
        assert!(raw.contains("\"enqueued_at_ms\":42"));
    }

    #[tokio::test]
    async fn test_reload_after_crash_keeps_retry_count() {
        let store = MemoryStore::new();
        let clock = ManualClock::at_millis(0);

        let id = {
            let queue = open_queue(&store, &clock).await;
            let id = queue.enqueue(NewAction::create("/meals", json!({"kcal": 420}))).await.unwrap();
            let outcome = queue.record_failure(id, "HTTP 503").await.unwrap();
            assert_eq!(outcome, FailureOutcome::Retrying { retry_count: 1 });
            id
        };

        let reloaded = open_queue(&store, &clock).await;
        let actions = reloaded.dequeue_all().await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].id, id);
        assert_eq!(actions[0].retry_count, 1);
        assert_eq!(actions[0].payload, json!({"kcal": 420}));
    }

    #[tokio::test]
    async fn test_reload_from_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("platesync.db");
        let clock = ManualClock::at_millis(0);

        let id = {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let queue = ActionQueue::open(store, Arc::new(clock.clone()), 3).await.unwrap();
            queue.enqueue(NewAction::delete("/meals/7")).await.unwrap()
        };

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let queue = ActionQueue::open(store, Arc::new(clock), 3).await.unwrap();
        assert_eq!(queue.get(id).await.unwrap().endpoint, "/meals/7");
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = MemoryStore::new();
        let queue = open_queue(&store, &ManualClock::default()).await;
        let id = queue.enqueue(NewAction::delete("/meals/1")).await.unwrap();

        assert!(queue.remove(id).await.unwrap());
        assert!(!queue.remove(id).await.unwrap());
        assert!(!queue.remove(Uuid::new_v4()).await.unwrap());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_moves_to_dead_letters() {
        let store = MemoryStore::new();
        let clock = ManualClock::at_millis(0);
        let queue = open_queue(&store, &clock).await;
        let id = queue
            .enqueue(NewAction::create("/meals", json!({})).with_max_retries(2))
            .await
            .unwrap();

        assert_eq!(
            queue.record_failure(id, "HTTP 500").await.unwrap(),
            FailureOutcome::Retrying { retry_count: 1 }
        );
        let outcome = queue.record_failure(id, "HTTP 500").await.unwrap();
        let FailureOutcome::Exhausted(letter) = outcome else {
            panic!("expected exhaustion, got {:?}", outcome);
        };
        assert_eq!(letter.action.retry_count, 2);
        assert!(letter.reason.contains("HTTP 500"));

        assert!(queue.is_empty().await);
        assert_eq!(queue.failed_count().await, 1);
        assert_eq!(
            queue.record_failure(id, "again").await.unwrap(),
            FailureOutcome::Missing
        );

        // Dead letters survive a reload
        let reloaded = open_queue(&store, &clock).await;
        assert_eq!(reloaded.failed_count().await, 1);
    }

    #[tokio::test]
    async fn test_reject_and_clear_dead_letters() {
        let store = MemoryStore::new();
        let queue = open_queue(&store, &ManualClock::default()).await;
        let id = queue.enqueue(NewAction::update("/meals/3", json!({}))).await.unwrap();

        let letter = queue.reject(id, "HTTP 422").await.unwrap().unwrap();
        assert_eq!(letter.reason, "HTTP 422");
        assert!(queue.reject(id, "HTTP 422").await.unwrap().is_none());
        assert_eq!(queue.dead_letters().await.len(), 1);

        assert_eq!(queue.clear_dead_letters().await.unwrap(), 1);
        assert_eq!(queue.failed_count().await, 0);
        assert!(store.get(DEAD_LETTER_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let store = MemoryStore::new();
        let queue = open_queue(&store, &ManualClock::default()).await;
        queue.enqueue(NewAction::delete("/meals/1")).await.unwrap();

        store.close().await.unwrap();
        let err = queue.enqueue(NewAction::delete("/meals/2")).await.unwrap_err();
        assert!(matches!(err, StorageError::Closed));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_corrupt_queue_is_reported() {
        let store = MemoryStore::new();
        store.set(PENDING_KEY, "not json".to_string()).await.unwrap();

        let result = ActionQueue::open(Arc::new(store), Arc::new(ManualClock::default()), 3).await;
        assert!(matches!(result, Err(StorageError::CorruptRecord { .. })));
    }
}
