//! PlateSync Core Library
//!
//! Client-side resilience layer for an app that must keep working on an
//! intermittent connection and should not pay twice for the same AI image
//! analysis.
//!
//! # Architecture
//!
//! - **Action queue**: mutations are persisted before they are acknowledged
//!   and replayed in FIFO order once the device is online
//! - **Sync engine**: single-flight drain with bounded, per-action retries
//! - **Response cache**: TTL entries with optional content-hash validation,
//!   keyed by endpoint and query or by a hash of the image bytes
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(SqliteStore::open(&config.database_path())?);
//! let transport = Arc::new(HttpTransport::new(&config.api_base_url, config.action_timeout())?);
//! let client = OfflineClient::start(store, transport, Arc::new(SystemClock), options).await?;
//!
//! client.mutate(NewAction::create("/meals", json!({"name": "oats"}))).await?;
//! let goals = client.read("/goals", &[("user", "1")]).await?;
//! ```
//!
//! # Modules
//!
//! - `client`: facade wiring everything together (main entry point)
//! - `queue`: durable FIFO of pending mutations
//! - `sync`: queue drain and the background sync task
//! - `cache`: response cache, key derivation, cached image analysis
//! - `connectivity`: online/offline tracking and reachability probes
//! - `transport`: HTTP-style transport abstraction and reqwest client
//! - `storage`: durable key-value stores
//! - `config`: application configuration

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod queue;
pub mod storage;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testing;

pub use cache::{CacheSource, Cached, CachedAnalyzer, ImageAnalyzer, ResponseCache};
pub use client::{ClientOptions, OfflineClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, TcpProbe};
pub use queue::{ActionKind, ActionQueue, DeadLetter, NewAction, PendingAction};
pub use storage::{DurableStore, FileStore, MemoryStore, SqliteStore, StorageError};
pub use sync::{FlushOutcome, FlushReport, SyncEngine, SyncError, SyncStatus};
pub use transport::{HttpTransport, Method, Transport, TransportError};
