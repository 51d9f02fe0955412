//! Metrics definitions for the relay.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CONNECTED_CLIENTS: MetricDef = MetricDef {
    name: "relay.clients.connected",
    metric_type: MetricType::Gauge,
    description: "Number of clients connected to the relay socket",
};

pub const BACKEND_LINKS: MetricDef = MetricDef {
    name: "relay.backend_links.connected",
    metric_type: MetricType::Gauge,
    description: "Number of open client-dedicated backend links",
};

pub const RELAYED_EVENTS: MetricDef = MetricDef {
    name: "relay.events",
    metric_type: MetricType::Counter,
    description: "Relayed events, tagged by direction (to_backend/to_client/dropped)",
};

pub const BACKEND_EVENTS: MetricDef = MetricDef {
    name: "relay.backend_events",
    metric_type: MetricType::Counter,
    description: "Events ingested through backend-event, tagged by event name",
};

pub const ARTIFACTS_RECORDED: MetricDef = MetricDef {
    name: "relay.artifacts.recorded",
    metric_type: MetricType::Counter,
    description: "QR and pairing code updates written to the artifact cache",
};

pub const ARTIFACT_REPLAYS: MetricDef = MetricDef {
    name: "relay.artifacts.replayed",
    metric_type: MetricType::Counter,
    description: "Cached artifacts replayed to joining clients",
};

pub const ADMIN_FANOUT_FAILURES: MetricDef = MetricDef {
    name: "relay.admin.fanout_failures",
    metric_type: MetricType::Counter,
    description: "Admin fan-out calls that failed, tagged by operation",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CONNECTED_CLIENTS,
    BACKEND_LINKS,
    RELAYED_EVENTS,
    BACKEND_EVENTS,
    ARTIFACTS_RECORDED,
    ARTIFACT_REPLAYS,
    ADMIN_FANOUT_FAILURES,
];
