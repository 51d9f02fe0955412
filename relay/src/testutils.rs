use crate::config::{ArtifactCacheConfig, Config, Listener};
use crate::hub::RelayHub;
use fleet::Fleet;
use fleet::config::{BackendClientConfig, BackendConfig, HealthConfig, SessionStoreConfig};
use fleet::health::HealthUpdate;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use std::error::Error as StdError;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

/// Fleet config with an in-memory store over `(id, url)` backends of capacity 10.
pub fn fleet_config(backends: &[(&str, &str)]) -> fleet::config::Config {
    fleet::config::Config {
        backends: backends
            .iter()
            .map(|(id, url)| BackendConfig {
                id: id.to_string(),
                url: Url::parse(url).unwrap(),
                name: Some(id.to_uppercase()),
                max_capacity: 10,
            })
            .collect(),
        health: HealthConfig::default(),
        backend_client: BackendClientConfig::default(),
        session_store: SessionStoreConfig::Memory,
    }
}

pub fn relay_config() -> Config {
    Config {
        listener: Listener {
            host: "127.0.0.1".into(),
            port: 4000,
        },
        admin_listener: Listener {
            host: "127.0.0.1".into(),
            port: 4001,
        },
        backend_path: "/socket".into(),
        reconnect_delay_ms: 50,
        artifact_cache: ArtifactCacheConfig::default(),
    }
}

/// Hub over a fleet that was never started; health is driven by the test.
pub fn hub(backends: &[(&str, &str)]) -> Arc<RelayHub> {
    let fleet = Fleet::new(fleet_config(backends)).unwrap();
    Arc::new(RelayHub::new(fleet, &relay_config()))
}

pub fn mark_healthy(hub: &RelayHub, id: &str, occupant_count: u64) {
    let health = hub.fleet().health();
    health.apply(id, HealthUpdate::HeartbeatConnected);
    health.apply(
        id,
        HealthUpdate::Probe {
            api_healthy: true,
            occupant_count: Some(occupant_count),
        },
    );
}

pub async fn serve_on_ephemeral_port<S, B>(service: S) -> u16
where
    S: Service<Request<Incoming>, Response = Response<B>> + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<Box<dyn StdError + Send + Sync>>,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = shared::http::serve::<_, _, std::io::Error>(listener, service).await;
    });
    port
}
