//! Queued action models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::transport::{Method, Request};

/// What a queued mutation does to its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    /// Method used when the caller does not pick one
    pub fn default_method(&self) -> Method {
        match self {
            ActionKind::Create => Method::Post,
            ActionKind::Update => Method::Put,
            ActionKind::Delete => Method::Delete,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Create => "CREATE",
            ActionKind::Update => "UPDATE",
            ActionKind::Delete => "DELETE",
        };
        f.pad(s)
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(ActionKind::Create),
            "update" => Ok(ActionKind::Update),
            "delete" => Ok(ActionKind::Delete),
            other => Err(format!(
                "unknown action kind '{}' (expected create, update or delete)",
                other
            )),
        }
    }
}

/// A mutation waiting to be delivered
///
/// The payload is opaque to the queue. Replays may happen more than once,
/// so the endpoint must treat the request as an upsert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAction {
    pub id: Uuid,
    pub kind: ActionKind,
    pub endpoint: String,
    pub method: Method,
    pub payload: Value,
    #[serde(rename = "enqueued_at_ms", with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PendingAction {
    /// Build the transport request for this action
    pub fn to_request(&self) -> Request {
        let request = Request::new(self.method, self.endpoint.clone());
        if self.payload.is_null() {
            request
        } else {
            request.with_body(self.payload.clone())
        }
    }
}

/// Caller-side description of a mutation to enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub kind: ActionKind,
    pub endpoint: String,
    pub method: Option<Method>,
    pub payload: Value,
    pub max_retries: Option<u32>,
}

impl NewAction {
    pub fn new(kind: ActionKind, endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            endpoint: endpoint.into(),
            method: None,
            payload,
            max_retries: None,
        }
    }

    pub fn create(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(ActionKind::Create, endpoint, payload)
    }

    pub fn update(endpoint: impl Into<String>, payload: Value) -> Self {
        Self::new(ActionKind::Update, endpoint, payload)
    }

    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(ActionKind::Delete, endpoint, Value::Null)
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Materialize the action; `max_retries` is clamped to at least one attempt
    pub(crate) fn into_pending(
        self,
        enqueued_at: DateTime<Utc>,
        default_max_retries: u32,
    ) -> PendingAction {
        PendingAction {
            id: Uuid::new_v4(),
            method: self.method.unwrap_or_else(|| self.kind.default_method()),
            kind: self.kind,
            endpoint: self.endpoint,
            payload: self.payload,
            enqueued_at,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries).max(1),
        }
    }
}

/// Record of an action that will never be delivered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub action: PendingAction,
    pub reason: String,
    #[serde(rename = "failed_at_ms", with = "chrono::serde::ts_milliseconds")]
    pub failed_at: DateTime<Utc>,
}
