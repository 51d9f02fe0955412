//! Metrics definitions for the fleet.

use shared::metrics_defs::{MetricDef, MetricType};

pub const HEALTH_TRANSITIONS: MetricDef = MetricDef {
    name: "fleet.health.transitions",
    metric_type: MetricType::Counter,
    description: "Backend health transitions, tagged by direction (up/down)",
};

pub const HEALTHY_BACKENDS: MetricDef = MetricDef {
    name: "fleet.health.healthy_backends",
    metric_type: MetricType::Gauge,
    description: "Number of backends currently passing both health signals",
};

pub const PROBE_DURATION: MetricDef = MetricDef {
    name: "fleet.health.probe.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete one active probe round in seconds",
};

pub const ASSIGNMENTS: MetricDef = MetricDef {
    name: "fleet.router.assignments",
    metric_type: MetricType::Counter,
    description: "Routing decisions, tagged by outcome (sticky/new/none)",
};

pub const STORE_ERRORS: MetricDef = MetricDef {
    name: "fleet.store.errors",
    metric_type: MetricType::Counter,
    description: "Failed session store calls, tagged by operation",
};

pub const FAILOVER_PASSES: MetricDef = MetricDef {
    name: "fleet.failover.passes",
    metric_type: MetricType::Counter,
    description: "Number of failover passes that found sessions to migrate",
};

pub const FAILOVER_SESSIONS: MetricDef = MetricDef {
    name: "fleet.failover.sessions",
    metric_type: MetricType::Counter,
    description: "Sessions handled by failover, tagged by outcome (moved/failed/unplaced)",
};

pub const ALL_METRICS: &[MetricDef] = &[
    HEALTH_TRANSITIONS,
    HEALTHY_BACKENDS,
    PROBE_DURATION,
    ASSIGNMENTS,
    STORE_ERRORS,
    FAILOVER_PASSES,
    FAILOVER_SESSIONS,
];
