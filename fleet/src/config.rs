use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("empty backend id")]
    EmptyBackendId,

    #[error("duplicate backend id: {0}")]
    DuplicateBackend(String),

    #[error("probe interval cannot be 0")]
    ZeroProbeInterval,

    #[error("probe timeout cannot be 0")]
    ZeroProbeTimeout,

    #[error("heartbeat reconnect delay cannot be 0")]
    ZeroReconnectDelay,

    #[error("probe timeout ({timeout_secs}s) exceeds the probe interval ({interval_secs}s)")]
    ProbeTimeoutTooLong { timeout_secs: u64, interval_secs: u64 },
}

/// Fleet configuration: the backend directory plus how the gateway watches
/// and talks to it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Ordered backend directory. Order is the tie-break order for routing.
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub backend_client: BackendClientConfig,
    pub session_store: SessionStoreConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.backends.is_empty() {
            return Err(ValidationError::NoBackends);
        }

        let mut ids = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(ValidationError::EmptyBackendId);
            }
            if !ids.insert(&backend.id) {
                return Err(ValidationError::DuplicateBackend(backend.id.clone()));
            }
        }

        self.health.validate()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub id: String,
    pub url: Url,
    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,
    /// Declared number of sessions the backend is sized for. 0 disables load reporting.
    #[serde(alias = "maxCapacity")]
    pub max_capacity: u32,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub probe_interval_secs: u64,
    /// Upper bound for each probe request. Must not exceed the interval.
    pub probe_timeout_secs: u64,
    pub health_path: String,
    pub load_path: String,
    pub heartbeat_path: String,
    /// Fixed delay between heartbeat reconnection attempts
    pub heartbeat_reconnect_delay_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            probe_interval_secs: 10,
            probe_timeout_secs: 3,
            health_path: "/api/health".into(),
            load_path: "/api/admin/load".into(),
            heartbeat_path: "/heartbeat".into(),
            heartbeat_reconnect_delay_ms: 2000,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.probe_interval_secs == 0 {
            return Err(ValidationError::ZeroProbeInterval);
        }
        if self.probe_timeout_secs == 0 {
            return Err(ValidationError::ZeroProbeTimeout);
        }
        if self.probe_timeout_secs > self.probe_interval_secs {
            return Err(ValidationError::ProbeTimeoutTooLong {
                timeout_secs: self.probe_timeout_secs,
                interval_secs: self.probe_interval_secs,
            });
        }
        if self.heartbeat_reconnect_delay_ms == 0 {
            return Err(ValidationError::ZeroReconnectDelay);
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn heartbeat_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.heartbeat_reconnect_delay_ms)
    }
}

/// Paths and limits for gateway -> backend calls that are not health probes.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendClientConfig {
    pub load_session_path: String,
    pub bots_path: String,
    pub delete_user_path: String,
    pub users_info_path: String,
    /// Timeout for admin fan-out calls. Directives use the transport default.
    pub fanout_timeout_secs: u64,
}

impl Default for BackendClientConfig {
    fn default() -> Self {
        BackendClientConfig {
            load_session_path: "/api/admin/load-session".into(),
            bots_path: "/api/admin/bots".into(),
            delete_user_path: "/api/admin/user".into(),
            users_info_path: "/api/admin/users-info".into(),
            fanout_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum SessionStoreConfig {
    /// PostgREST-compatible table (e.g. Supabase).
    Postgrest {
        url: Url,
        #[serde(default)]
        api_key: Option<String>,
        #[serde(default = "default_sessions_table")]
        table: String,
    },
    /// Process-local store, for development and tests only.
    Memory,
}

fn default_sessions_table() -> String {
    "sessions".into()
}
