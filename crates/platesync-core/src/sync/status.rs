//! Derived sync status

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Engine phase, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Idle,
    Syncing,
}

/// Point-in-time view of the sync machinery
///
/// Recomputed from the queue and the connectivity monitor on every call;
/// nothing here is persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_count: usize,
    pub failed_count: usize,
}

/// Per-drain counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Actions handed to the transport
    pub attempted: usize,
    /// Delivered and removed from the queue
    pub succeeded: usize,
    /// Failed, still queued with a higher retry count
    pub retried: usize,
    /// Dropped permanently (client error or retries exhausted)
    pub dropped: usize,
    /// Left untouched because the network went away
    pub deferred: usize,
}

/// Why a drain did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    AlreadySyncing,
    Empty,
}

/// Result of a drain request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlushOutcome {
    Skipped { reason: SkipReason },
    Completed(FlushReport),
}

impl FlushOutcome {
    pub fn report(&self) -> Option<&FlushReport> {
        match self {
            FlushOutcome::Completed(report) => Some(report),
            FlushOutcome::Skipped { .. } => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            FlushOutcome::Skipped { reason } => Some(*reason),
            FlushOutcome::Completed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let skipped = FlushOutcome::Skipped {
            reason: SkipReason::Empty,
        };
        assert_eq!(skipped.skip_reason(), Some(SkipReason::Empty));
        assert!(skipped.report().is_none());

        let completed = FlushOutcome::Completed(FlushReport {
            attempted: 2,
            succeeded: 2,
            ..Default::default()
        });
        assert_eq!(completed.report().unwrap().succeeded, 2);
    }

    #[test]
    fn test_outcome_json_shape() {
        let json = serde_json::to_value(FlushOutcome::Skipped {
            reason: SkipReason::AlreadySyncing,
        })
        .unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "already_syncing");
    }
}
