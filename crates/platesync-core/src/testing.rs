//! Test doubles shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};

use crate::transport::{Request, Response, Transport, TransportError};

/// Transport that replays scripted results and records every call
pub(crate) struct ScriptedTransport {
    calls: Mutex<Vec<Request>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<Value, TransportError>>>>,
    fallback: Result<Value, TransportError>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    pub entered: Arc<Notify>,
}

impl ScriptedTransport {
    /// Every call succeeds with `{"ok": true}` unless scripted otherwise
    pub fn ok() -> Self {
        Self::with_fallback(Ok(serde_json::json!({"ok": true})))
    }

    /// Every call fails with `error` unless scripted otherwise
    pub fn failing(error: TransportError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: Result<Value, TransportError>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            fallback,
            delay: None,
            gate: None,
            entered: Arc::new(Notify::new()),
        }
    }

    /// Queue results for calls to `endpoint`, consumed in order
    pub fn script(self, endpoint: &str, results: Vec<Result<Value, TransportError>>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), results.into_iter().collect());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Block each call until a permit is added to `gate`
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.endpoint).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        self.entered.notify_one();

        if let Some(ref gate) = self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&request.endpoint)
            .and_then(|results| results.pop_front());

        scripted
            .unwrap_or_else(|| self.fallback.clone())
            .map(|body| Response { status: 200, body })
    }
}

/// Poll `condition` until it holds or two seconds pass
pub(crate) async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
