//! Shared state for commands that touch the local database

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::debug;

use platesync_core::connectivity::{probe_once, ReachabilityProbe};
use platesync_core::storage::DurableStore;
use platesync_core::{
    ActionQueue, Config, ConnectivityMonitor, HttpTransport, ResponseCache, SqliteStore,
    SyncEngine, SystemClock, TcpProbe,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Queue and cache opened on the configured database
pub struct Context {
    pub config: Config,
    store: Arc<SqliteStore>,
    pub queue: Arc<ActionQueue>,
    pub cache: ResponseCache,
}

impl Context {
    pub async fn open(config: Config) -> Result<Self> {
        let path = config.database_path();
        let store = Arc::new(
            SqliteStore::open(&path)
                .with_context(|| format!("Failed to open database: {:?}", path))?,
        );
        let clock = Arc::new(SystemClock);

        let queue = ActionQueue::open(store.clone(), clock.clone(), config.max_retries)
            .await
            .context("Failed to load action queue")?;
        let cache = ResponseCache::new(store.clone(), clock, config.cache_ttl());

        Ok(Self {
            config,
            store,
            queue: Arc::new(queue),
            cache,
        })
    }

    /// Probe the server once; `true` when reachable
    pub async fn probe(&self) -> bool {
        let Some(target) = self.config.probe_target() else {
            debug!("No probe target configured, assuming online");
            return true;
        };
        TcpProbe::new(target, PROBE_TIMEOUT).is_reachable().await
    }

    /// Build a sync engine, with connectivity taken from a fresh probe
    pub async fn engine(&self) -> Result<SyncEngine> {
        let transport = HttpTransport::new(&self.config.api_base_url, self.config.action_timeout())?;
        let monitor = ConnectivityMonitor::new(false);
        if let Some(target) = self.config.probe_target() {
            probe_once(&monitor, &TcpProbe::new(target, PROBE_TIMEOUT)).await;
        } else {
            monitor.set_online(true);
        }

        Ok(SyncEngine::new(
            Arc::clone(&self.queue),
            Arc::new(transport),
            monitor,
            Arc::new(SystemClock),
            self.config.action_timeout(),
        ))
    }

    pub async fn close(self) -> Result<()> {
        self.store.close().await.context("Failed to close database")
    }
}
