//! Offline-capable client
//!
//! [`OfflineClient`] wires the components together: reads go through the
//! response cache, mutations go through the action queue, and a background
//! task drains the queue whenever connectivity allows.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::cache::{key, Cached, CachedAnalyzer, ImageAnalyzer, ResponseCache};
use crate::clock::Clock;
use crate::config::Config;
use crate::connectivity::{spawn_probe, ConnectivityMonitor, ReachabilityProbe, TcpProbe};
use crate::queue::{ActionQueue, NewAction};
use crate::storage::{DurableStore, StorageResult};
use crate::sync::{spawn_sync_task, FlushOutcome, SyncEngine, SyncError, SyncHandle, SyncStatus};
use crate::transport::{Request, Transport, TransportError};

/// Startup settings for [`OfflineClient`]
#[derive(Clone)]
pub struct ClientOptions {
    pub max_retries: u32,
    pub action_timeout: Duration,
    pub cache_ttl: Duration,
    pub analysis_ttl: Duration,
    pub initially_online: bool,
    pub probe: Option<(Arc<dyn ReachabilityProbe>, Duration)>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            action_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            analysis_ttl: Duration::from_secs(86_400),
            initially_online: false,
            probe: None,
        }
    }
}

impl ClientOptions {
    /// Options from configuration, with a TCP probe when `probe_addr` is set
    pub fn from_config(config: &Config) -> Self {
        let probe = config.probe_addr.as_ref().map(|addr| {
            let probe: Arc<dyn ReachabilityProbe> =
                Arc::new(TcpProbe::new(addr.clone(), Duration::from_secs(5)));
            (probe, config.probe_interval())
        });
        Self {
            max_retries: config.max_retries,
            action_timeout: config.action_timeout(),
            cache_ttl: config.cache_ttl(),
            analysis_ttl: config.analysis_ttl(),
            initially_online: false,
            probe,
        }
    }
}

/// Facade owning the queue, cache, engine and background tasks
pub struct OfflineClient {
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    monitor: ConnectivityMonitor,
    queue: Arc<ActionQueue>,
    cache: Arc<ResponseCache>,
    analysis_ttl: Duration,
    engine: Arc<SyncEngine>,
    sync: SyncHandle,
    probe: Option<JoinHandle<()>>,
}

impl OfflineClient {
    /// Restore persisted state and start the background tasks
    pub async fn start(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        options: ClientOptions,
    ) -> StorageResult<Self> {
        let monitor = ConnectivityMonitor::new(options.initially_online);
        let queue = Arc::new(
            ActionQueue::open(Arc::clone(&store), Arc::clone(&clock), options.max_retries).await?,
        );
        let cache = Arc::new(ResponseCache::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            options.cache_ttl,
        ));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&transport),
            monitor.clone(),
            clock,
            options.action_timeout,
        ));

        let sync = spawn_sync_task(Arc::clone(&engine));
        let probe = options
            .probe
            .map(|(probe, interval)| spawn_probe(monitor.clone(), probe, interval));

        info!(
            "Offline client started ({} pending action(s))",
            queue.len().await
        );

        Ok(Self {
            store,
            transport,
            monitor,
            queue,
            cache,
            analysis_ttl: options.analysis_ttl,
            engine,
            sync,
            probe,
        })
    }

    /// Cached GET of `endpoint`
    ///
    /// Served from the cache while fresh. Otherwise fetched through the
    /// transport; when offline an expired entry is returned as stale rather
    /// than failing.
    pub async fn read(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Cached<Value>> {
        let cache_key = key::request_key(endpoint, params);
        let request = Request::get(endpoint).with_query(
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );

        self.cache
            .fetch(&cache_key, self.cache.default_ttl(), || async {
                if !self.monitor.is_online() {
                    return Err(anyhow::Error::from(TransportError::NetworkUnavailable(
                        "offline".to_string(),
                    )));
                }
                let response = self.transport.execute(&request).await?;
                Ok::<_, anyhow::Error>(response.body)
            })
            .await
    }

    /// Put `analyzer` behind the shared cache
    ///
    /// Results are keyed by image content under `operation` and kept for
    /// the configured analysis TTL rather than the read TTL.
    pub fn analyzer<A: ImageAnalyzer>(
        &self,
        analyzer: A,
        operation: impl Into<String>,
    ) -> CachedAnalyzer<A> {
        CachedAnalyzer::new(analyzer, Arc::clone(&self.cache), operation, self.analysis_ttl)
    }

    /// Queue a mutation; it is delivered now if online, otherwise later
    pub async fn mutate(&self, action: NewAction) -> StorageResult<Uuid> {
        self.queue.enqueue(action).await
    }

    pub async fn status(&self) -> SyncStatus {
        self.engine.status().await
    }

    /// Drain the queue now, failing if offline
    pub async fn force_sync(&self) -> Result<FlushOutcome, SyncError> {
        self.engine.force_sync().await
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Stop background work, drop listeners and close storage
    pub async fn shutdown(self) -> StorageResult<()> {
        if let Some(probe) = self.probe {
            probe.abort();
        }
        self.sync.shutdown().await;
        self.monitor.clear_listeners();
        self.store.close().await?;
        info!("Offline client stopped");
        Ok(())
    }
}
