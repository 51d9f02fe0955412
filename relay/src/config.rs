use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Backend path must start with '/'")]
    InvalidBackendPath,

    #[error("Reconnect delay cannot be 0")]
    ZeroReconnectDelay,

    #[error("Artifact cache capacity cannot be 0")]
    ZeroCacheCapacity,

    #[error("Artifact cache TTL cannot be 0")]
    ZeroCacheTtl,
}

/// Relay configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Client-facing listener: the websocket endpoint and backend event ingestion
    pub listener: Listener,
    /// Admin listener for health, readiness and fleet administration
    pub admin_listener: Listener,
    /// Path of the session socket on every backend
    #[serde(default = "default_backend_path")]
    pub backend_path: String,
    /// Delay between attempts to re-open a dropped backend link
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub artifact_cache: ArtifactCacheConfig,
}

fn default_backend_path() -> String {
    "/socket".into()
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

impl Config {
    /// Validates the relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.backend_path.starts_with('/') {
            return Err(ValidationError::InvalidBackendPath);
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ValidationError::ZeroReconnectDelay);
        }

        self.artifact_cache.validate()
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Bounds for the per-room QR/pairing code cache.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactCacheConfig {
    pub max_rooms: u64,
    pub ttl_secs: u64,
}

impl Default for ArtifactCacheConfig {
    fn default() -> Self {
        ArtifactCacheConfig {
            max_rooms: 10_000,
            ttl_secs: 600,
        }
    }
}

impl ArtifactCacheConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_rooms == 0 {
            return Err(ValidationError::ZeroCacheCapacity);
        }
        if self.ttl_secs == 0 {
            return Err(ValidationError::ZeroCacheTtl);
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
