use crate::config::{BackendClientConfig, HealthConfig};
use crate::types::{Backend, SessionKey};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("backend responded with {status}: {message}")]
    UnexpectedStatus { status: StatusCode, message: String },
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

#[derive(Deserialize)]
struct LoadResponse {
    #[serde(rename = "occupantCount", alias = "userCount")]
    occupant_count: u64,
}

#[derive(Deserialize)]
struct BotsResponse {
    #[serde(default)]
    bots: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

/// Request/response calls from the gateway to individual backends.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    config: BackendClientConfig,
    health_path: String,
    load_path: String,
    probe_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: BackendClientConfig, health: &HealthConfig) -> Self {
        BackendClient {
            client: reqwest::Client::new(),
            config,
            health_path: health.health_path.clone(),
            load_path: health.load_path.clone(),
            probe_timeout: health.probe_timeout(),
        }
    }

    /// Health endpoint probe. Any 2xx counts as healthy.
    pub async fn probe_health(&self, backend: &Backend) -> Result<(), BackendError> {
        let response = self
            .client
            .get(backend.endpoint(&self.health_path))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        ensure_success(response).await.map(|_| ())
    }

    /// Number of sessions the backend reports as currently running.
    pub async fn fetch_occupancy(&self, backend: &Backend) -> Result<u64, BackendError> {
        let response = self
            .client
            .get(backend.endpoint(&self.load_path))
            .timeout(self.probe_timeout)
            .send()
            .await?;

        let load = ensure_success(response).await?.json::<LoadResponse>().await?;
        Ok(load.occupant_count)
    }

    /// Asks a backend to take over a session. No timeout beyond the transport default.
    pub async fn load_session(&self, backend: &Backend, key: &SessionKey) -> Result<(), BackendError> {
        let response = self
            .client
            .post(backend.endpoint(&self.config.load_session_path))
            .json(key)
            .send()
            .await?;

        ensure_success(response).await.map(|_| ())
    }

    pub async fn list_bots(&self, backend: &Backend) -> Result<Vec<serde_json::Value>, BackendError> {
        let response = self
            .client
            .get(backend.endpoint(&self.config.bots_path))
            .timeout(self.fanout_timeout())
            .send()
            .await?;

        let bots = ensure_success(response).await?.json::<BotsResponse>().await?;
        Ok(bots.bots)
    }

    /// Backend-wide user summary, returned as the backend sent it.
    pub async fn users_info(&self, backend: &Backend) -> Result<serde_json::Value, BackendError> {
        let response = self
            .client
            .get(backend.endpoint(&self.config.users_info_path))
            .timeout(self.fanout_timeout())
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }

    /// Deletes every session of `identity` on the backend and returns its message.
    pub async fn delete_user(&self, backend: &Backend, identity: &str) -> Result<String, BackendError> {
        let mut url = Url::parse(&backend.endpoint(&self.config.delete_user_path))
            .map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(backend.url.to_string()))?
            .pop_if_empty()
            .push(identity);

        let response = self
            .client
            .delete(url)
            .timeout(self.fanout_timeout())
            .send()
            .await?;

        let body = ensure_success(response).await?.json::<MessageResponse>().await;
        Ok(body.ok().and_then(|b| b.message).unwrap_or_default())
    }

    fn fanout_timeout(&self) -> Duration {
        Duration::from_secs(self.config.fanout_timeout_secs)
    }
}

/// Maps non-2xx responses to an error carrying the backend's `message` if it sent one.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<MessageResponse>(&text)
        .ok()
        .and_then(|m| m.message)
        .unwrap_or(text);

    Err(BackendError::UnexpectedStatus { status, message })
}
