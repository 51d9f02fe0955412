//! Health aggregation
//!
//! Each backend gets one `HealthRecord`, fed by two independent signals:
//!
//! - the heartbeat channel (a websocket held open to the backend), which marks
//!   the backend down the moment the connection drops, and
//! - the active probe, which polls the health and load endpoints on a fixed
//!   interval.
//!
//! A backend is only routable when both signals agree it is alive. Records are
//! created on first observation and never removed. The aggregator is the only
//! writer; everyone else reads owned snapshots.
//!
//! When an update flips a backend from healthy to unhealthy the backend id is
//! sent on the down channel, once per transition.

use crate::backend_client::BackendClient;
use crate::config::HealthConfig;
use crate::metrics_defs::{HEALTH_TRANSITIONS, HEALTHY_BACKENDS, PROBE_DURATION};
use crate::registry::Registry;
use crate::types::{Backend, BackendId};
use parking_lot::RwLock;
use shared::{counter, gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HealthRecord {
    pub api_healthy: bool,
    pub heartbeat_healthy: bool,
    pub load_units: f64,
    pub occupant_count: u64,
    /// Last update at which the backend was healthy
    pub last_seen: Option<SystemTime>,
}

impl HealthRecord {
    pub fn combined_healthy(&self) -> bool {
        self.api_healthy && self.heartbeat_healthy
    }
}

/// One input to a health record.
#[derive(Clone, Debug, PartialEq)]
pub enum HealthUpdate {
    HeartbeatConnected,
    HeartbeatDisconnected,
    /// Unsolicited status push received on the heartbeat channel
    Status {
        load_units: Option<f64>,
        occupant_count: Option<u64>,
    },
    /// Result of one active probe round. `occupant_count` is `None` when the
    /// load call failed.
    Probe {
        api_healthy: bool,
        occupant_count: Option<u64>,
    },
}

/// Snapshot entry: a backend with its merged health at the time of the call.
#[derive(Clone, Debug)]
pub struct BackendStatus {
    pub backend: Backend,
    pub api_healthy: bool,
    pub heartbeat_healthy: bool,
    pub combined_healthy: bool,
    pub load_units: f64,
    pub occupant_count: u64,
    pub last_seen: Option<SystemTime>,
}

impl BackendStatus {
    fn new(backend: &Backend, record: Option<&HealthRecord>) -> Self {
        let record = record.cloned().unwrap_or_default();
        BackendStatus {
            backend: backend.clone(),
            api_healthy: record.api_healthy,
            heartbeat_healthy: record.heartbeat_healthy,
            combined_healthy: record.combined_healthy(),
            load_units: record.load_units,
            occupant_count: record.occupant_count,
            last_seen: record.last_seen,
        }
    }
}

pub struct HealthAggregator {
    registry: Registry,
    client: BackendClient,
    config: HealthConfig,
    records: RwLock<HashMap<BackendId, HealthRecord>>,
    down_tx: mpsc::UnboundedSender<BackendId>,
}

impl HealthAggregator {
    pub fn new(
        registry: Registry,
        client: BackendClient,
        config: HealthConfig,
        down_tx: mpsc::UnboundedSender<BackendId>,
    ) -> Self {
        HealthAggregator {
            registry,
            client,
            config,
            records: RwLock::new(HashMap::new()),
            down_tx,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Merged view of every registered backend, in directory order.
    /// Backends that were never observed are reported unhealthy.
    pub fn snapshot(&self) -> Vec<BackendStatus> {
        let records = self.records.read();
        self.registry
            .iter()
            .map(|backend| BackendStatus::new(backend, records.get(&backend.id)))
            .collect()
    }

    /// Routable backends, in directory order.
    pub fn healthy(&self) -> Vec<BackendStatus> {
        self.snapshot()
            .into_iter()
            .filter(|status| status.combined_healthy)
            .collect()
    }

    /// Applies one signal to a backend's record.
    pub fn apply(&self, backend_id: &str, update: HealthUpdate) {
        let Some(backend) = self.registry.get(backend_id) else {
            tracing::warn!(backend_id, ?update, "health update for unknown backend");
            return;
        };

        let (was_healthy, is_healthy, healthy_count) = {
            let mut records = self.records.write();
            let record = records.entry(backend_id.to_string()).or_default();
            let was_healthy = record.combined_healthy();

            match update {
                HealthUpdate::HeartbeatConnected => record.heartbeat_healthy = true,
                HealthUpdate::HeartbeatDisconnected => record.heartbeat_healthy = false,
                HealthUpdate::Status {
                    load_units,
                    occupant_count,
                } => {
                    if let Some(count) = occupant_count {
                        record.occupant_count = count;
                        record.load_units = load_ratio(count, backend.max_capacity);
                    }
                    if let Some(load) = load_units {
                        record.load_units = load;
                    }
                }
                HealthUpdate::Probe {
                    api_healthy,
                    occupant_count,
                } => {
                    record.api_healthy = api_healthy;
                    record.occupant_count = occupant_count.unwrap_or(0);
                    record.load_units = occupant_count
                        .map(|count| load_ratio(count, backend.max_capacity))
                        .unwrap_or(0.0);
                }
            }

            let is_healthy = record.combined_healthy();
            if is_healthy {
                record.last_seen = Some(SystemTime::now());
            }

            let healthy_count = records.values().filter(|r| r.combined_healthy()).count();
            (was_healthy, is_healthy, healthy_count)
        };

        gauge!(HEALTHY_BACKENDS).set(healthy_count as f64);

        match (was_healthy, is_healthy) {
            (false, true) => {
                tracing::info!(backend_id, "backend is healthy");
                counter!(HEALTH_TRANSITIONS, "direction" => "up").increment(1);
            }
            (true, false) => {
                tracing::warn!(backend_id, "backend became unhealthy, triggering failover");
                counter!(HEALTH_TRANSITIONS, "direction" => "down").increment(1);
                if self.down_tx.send(backend_id.to_string()).is_err() {
                    tracing::error!(backend_id, "failover worker is not running");
                }
            }
            _ => {}
        }
    }

    /// Probes every backend in parallel and applies the results as they arrive.
    /// Each call is bounded by the probe timeout, so one stalled backend cannot
    /// hold up the round beyond it.
    pub async fn probe_all(&self) {
        let started = Instant::now();
        let mut join_set = JoinSet::new();

        for backend in self.registry.iter() {
            let client = self.client.clone();
            let backend = backend.clone();
            join_set.spawn(async move {
                let (health, load) = tokio::join!(
                    client.probe_health(&backend),
                    client.fetch_occupancy(&backend)
                );
                if let Err(e) = &health {
                    tracing::debug!(backend_id = %backend.id, error = %e, "health probe failed");
                }
                if let Err(e) = &load {
                    tracing::debug!(backend_id = %backend.id, error = %e, "load probe failed");
                }
                (backend.id, health.is_ok(), load.ok())
            });
        }

        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((backend_id, api_healthy, occupant_count)) => self.apply(
                    &backend_id,
                    HealthUpdate::Probe {
                        api_healthy,
                        occupant_count,
                    },
                ),
                Err(e) => tracing::error!("Probe task panicked: {}", e),
            }
        }

        histogram!(PROBE_DURATION).record(started.elapsed().as_secs_f64());
    }

    /// Spawns one heartbeat task per backend and the probe loop.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self
            .registry
            .iter()
            .map(|backend| {
                tokio::spawn(crate::heartbeat::run(
                    self.clone(),
                    backend.clone(),
                    self.config.heartbeat_path.clone(),
                    self.config.heartbeat_reconnect_delay(),
                ))
            })
            .collect();

        let aggregator = self.clone();
        let interval = self.config.probe_interval();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                aggregator.probe_all().await;
            }
        }));

        handles
    }
}

fn load_ratio(occupant_count: u64, max_capacity: u32) -> f64 {
    if max_capacity == 0 {
        return 0.0;
    }
    occupant_count as f64 / max_capacity as f64
}
