use crate::backend_client::BackendClient;
use crate::config::{BackendClientConfig, BackendConfig, HealthConfig};
use crate::health::{HealthAggregator, HealthUpdate};
use crate::registry::Registry;
use crate::store::{SessionStore, StoreError};
use crate::types::{Backend, BackendId, SessionAssignment, SessionKey};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

pub fn backend_at(id: &str, url: &str, max_capacity: u32) -> Backend {
    Backend {
        id: id.to_string(),
        url: Url::parse(url).unwrap(),
        name: id.to_uppercase(),
        max_capacity,
    }
}

pub fn registry(backends: &[(&str, &str, u32)]) -> Registry {
    Registry::from_config(
        backends
            .iter()
            .map(|(id, url, max_capacity)| BackendConfig {
                id: id.to_string(),
                url: Url::parse(url).unwrap(),
                name: None,
                max_capacity: *max_capacity,
            })
            .collect(),
    )
}

pub fn client() -> BackendClient {
    BackendClient::new(BackendClientConfig::default(), &HealthConfig::default())
}

/// Aggregator over `(id, url, max_capacity)` backends with nothing observed yet.
pub fn aggregator(
    backends: &[(&str, &str, u32)],
) -> (Arc<HealthAggregator>, mpsc::UnboundedReceiver<BackendId>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let health = HealthAggregator::new(registry(backends), client(), HealthConfig::default(), tx);
    (Arc::new(health), rx)
}

pub fn mark_api_healthy(health: &HealthAggregator, id: &str) {
    health.apply(
        id,
        HealthUpdate::Probe {
            api_healthy: true,
            occupant_count: Some(0),
        },
    );
}

/// Both signals up with the given occupant count.
pub fn mark_healthy(health: &HealthAggregator, id: &str, occupant_count: u64) {
    health.apply(id, HealthUpdate::HeartbeatConnected);
    health.apply(
        id,
        HealthUpdate::Probe {
            api_healthy: true,
            occupant_count: Some(occupant_count),
        },
    );
}

/// Store whose every call fails, for degraded-path tests.
pub struct FailingSessionStore;

fn unavailable() -> StoreError {
    StoreError::UnexpectedStatus {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        message: "store unavailable".to_string(),
    }
}

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn find(&self, _key: &SessionKey) -> Result<Option<SessionAssignment>, StoreError> {
        Err(unavailable())
    }

    async fn list_by_owner(&self, _owner: &str) -> Result<Vec<SessionAssignment>, StoreError> {
        Err(unavailable())
    }

    async fn upsert(&self, _assignment: &SessionAssignment) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn update_owner(&self, _key: &SessionKey, _owner: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn delete_identity(&self, _identity: &str) -> Result<(), StoreError> {
        Err(unavailable())
    }
}
