//! Connectivity tracking
//!
//! [`ConnectivityMonitor`] holds the current online/offline snapshot and
//! notifies subscribers only when the state actually flips. Reports can come
//! from the host platform (`set_online`) or from a [`ReachabilityProbe`]
//! polled by [`spawn_probe`]; repeated identical reports are swallowed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A connectivity transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

type Listener = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;

struct Inner {
    state_tx: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

/// Online/offline snapshot with edge-triggered notifications
///
/// Cheap to clone; clones observe the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state_tx, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state_tx,
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.inner.state_tx.borrow()
    }

    /// Record the latest reachability report
    ///
    /// Returns `true` when the report changed the state. Listeners run on
    /// the caller's thread and must not block.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.inner.state_tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if !changed {
            return false;
        }

        let event = if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        };
        info!("Connectivity changed: {:?}", event);

        let listeners: Vec<Listener> = match self.inner.listeners.lock() {
            Ok(guard) => guard.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => Vec::new(),
        };
        for listener in listeners {
            listener(event);
        }
        true
    }

    /// Register a transition listener
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe(
        &self,
        listener: impl Fn(ConnectivityEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.inner.listeners.lock() {
            guard.push((id, Arc::new(listener)));
        }
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Watch channel carrying the online flag; changes arrive only on edges
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.state_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .map(|guard| guard.len())
            .unwrap_or(0)
    }

    /// Drop every registered listener
    pub fn clear_listeners(&self) {
        if let Ok(mut guard) = self.inner.listeners.lock() {
            guard.clear();
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Handle for a registered listener
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            if let Ok(mut guard) = inner.listeners.lock() {
                guard.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

/// Something that can tell whether the backend is reachable
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probe that attempts a TCP connection
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// `addr` is a `host:port` pair
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {}", self.addr, e);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", self.addr);
                false
            }
        }
    }
}

/// Run a single probe and feed the result into the monitor
pub async fn probe_once(monitor: &ConnectivityMonitor, probe: &dyn ReachabilityProbe) -> bool {
    let online = probe.is_reachable().await;
    monitor.set_online(online);
    online
}

/// Poll `probe` every `interval`, reporting into `monitor`
///
/// The task runs until aborted.
pub fn spawn_probe(
    monitor: ConnectivityMonitor,
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            probe_once(&monitor, probe.as_ref()).await;
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::net::TcpListener;

    #[test]
    fn test_set_online_is_edge_triggered() {
        let monitor = ConnectivityMonitor::new(false);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let _sub = monitor.subscribe(move |event| seen.lock().unwrap().push(event));

        assert!(monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.set_online(false));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![ConnectivityEvent::Online, ConnectivityEvent::Offline]
        );
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let monitor = ConnectivityMonitor::new(false);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sub = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(monitor.listener_count(), 1);

        monitor.set_online(true);
        sub.unsubscribe();
        assert_eq!(monitor.listener_count(), 0);
        monitor.set_online(false);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watch_sees_only_edges() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.watch();

        monitor.set_online(false);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn test_tcp_probe_reaches_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(2));
        assert!(probe.is_reachable().await);

        drop(listener);
        assert!(!probe.is_reachable().await);
    }

    struct FlagProbe(Arc<AtomicBool>);

    #[async_trait]
    impl ReachabilityProbe for FlagProbe {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_spawned_probe_reports_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let flag = Arc::new(AtomicBool::new(false));
        let mut rx = monitor.watch();

        let handle = spawn_probe(
            monitor.clone(),
            Arc::new(FlagProbe(Arc::clone(&flag))),
            Duration::from_millis(10),
        );

        flag.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(monitor.is_online());

        handle.abort();
    }
}
