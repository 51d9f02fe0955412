//! Fleet routing and failover
//!
//! Tracks the health of a static set of worker backends, decides which
//! backend owns each bot session, and moves sessions off backends that die.
//!
//! `Fleet::new` only wires the components together. Background work (one
//! heartbeat task per backend, the probe loop and the failover worker) starts
//! with `Fleet::start`.

pub mod backend_client;
pub mod config;
pub mod failover;
pub mod health;
mod heartbeat;
pub mod metrics_defs;
mod postgrest;
pub mod registry;
pub mod router;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

use backend_client::BackendClient;
use config::{Config, SessionStoreConfig, ValidationError};
use failover::FailoverCoordinator;
use health::HealthAggregator;
use parking_lot::Mutex;
use postgrest::PostgrestSessionStore;
use registry::Registry;
use router::SessionRouter;
use std::sync::Arc;
use store::{MemorySessionStore, SessionStore, StoreError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use types::BackendId;

#[derive(thiserror::Error, Debug)]
pub enum FleetError {
    #[error("invalid fleet config: {0}")]
    Validation(#[from] ValidationError),
    #[error("session store setup failed: {0}")]
    Store(#[from] StoreError),
}

struct FleetInner {
    registry: Registry,
    client: BackendClient,
    store: Arc<dyn SessionStore>,
    health: Arc<HealthAggregator>,
    router: SessionRouter,
    failover: FailoverCoordinator,
    down_rx: Mutex<Option<mpsc::UnboundedReceiver<BackendId>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for FleetInner {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[derive(Clone)]
pub struct Fleet {
    inner: Arc<FleetInner>,
}

impl Fleet {
    pub fn new(config: Config) -> Result<Self, FleetError> {
        let store: Arc<dyn SessionStore> = match &config.session_store {
            SessionStoreConfig::Postgrest {
                url,
                api_key,
                table,
            } => Arc::new(PostgrestSessionStore::new(url, table, api_key.clone())?),
            SessionStoreConfig::Memory => {
                tracing::warn!("using the in-memory session store, assignments are not durable");
                Arc::new(MemorySessionStore::new())
            }
        };
        Self::with_store(config, store)
    }

    /// Same as `new` with an explicit session store.
    pub fn with_store(config: Config, store: Arc<dyn SessionStore>) -> Result<Self, FleetError> {
        config.validate()?;

        let registry = Registry::from_config(config.backends);
        let client = BackendClient::new(config.backend_client, &config.health);
        let (down_tx, down_rx) = mpsc::unbounded_channel();
        let health = Arc::new(HealthAggregator::new(
            registry.clone(),
            client.clone(),
            config.health,
            down_tx,
        ));
        let router = SessionRouter::new(health.clone(), store.clone());
        let failover = FailoverCoordinator::new(router.clone(), store.clone(), client.clone());

        Ok(Fleet {
            inner: Arc::new(FleetInner {
                registry,
                client,
                store,
                health,
                router,
                failover,
                down_rx: Mutex::new(Some(down_rx)),
                handles: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Spawns the heartbeat tasks, the probe loop and the failover worker.
    /// Calling it more than once has no effect.
    pub fn start(&self) {
        let Some(down_rx) = self.inner.down_rx.lock().take() else {
            return;
        };

        let mut handles = self.inner.health.start();
        handles.push(tokio::spawn(self.inner.failover.clone().run(down_rx)));
        tracing::info!(backends = self.inner.registry.len(), "fleet started");
        self.inner.handles.lock().extend(handles);
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn client(&self) -> &BackendClient {
        &self.inner.client
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.inner.health
    }

    pub fn router(&self) -> &SessionRouter {
        &self.inner.router
    }

    pub fn failover(&self) -> &FailoverCoordinator {
        &self.inner.failover
    }

    /// True once at least one backend passes both health signals.
    pub fn is_ready(&self) -> bool {
        !self.inner.health.healthy().is_empty()
    }
}
