//! Prometheus metrics for the uptime server.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::time::Duration;
use uptime::{CheckStatus, TargetId};

/// Labels for per-target check metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    /// Target ID
    pub target_id: String,
    /// Outcome status (UP, DOWN)
    pub status: String,
}

/// Labels for per-target metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TargetLabels {
    /// Target ID
    pub target_id: String,
}

/// Labels for incident transition metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct IncidentLabels {
    /// Transition (opened, closed)
    pub event: String,
}

/// Labels for storage error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// Failing storage call
    pub operation: String,
}

/// Metrics registry with all uptime server metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    // Per-target metrics
    /// Total checks performed
    checks_total: Family<CheckLabels, Counter>,
    /// Latency of UP probes
    probe_latency_seconds: Family<TargetLabels, Histogram>,

    // System-wide metrics
    /// Incident transitions
    incidents_total: Family<IncidentLabels, Counter>,
    /// Storage errors by operation
    storage_errors_total: Family<OperationLabels, Counter>,
    /// Active targets seen by the last tick
    targets_active: Gauge,
    /// Probes dispatched but not yet fully recorded
    probes_in_flight: Gauge,
    /// Targets with incident processing suspended
    targets_quarantined: Gauge,
    /// Scheduler tick duration
    tick_duration_seconds: Histogram,
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let checks_total = Family::<CheckLabels, Counter>::default();
        registry.register(
            "uptime_checks",
            "Total probes recorded",
            checks_total.clone(),
        );

        let probe_latency_seconds = Family::<TargetLabels, Histogram>::new_with_constructor(|| {
            // Exponential buckets from 1ms to ~16s
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        registry.register(
            "uptime_probe_latency_seconds",
            "Latency of successful probes in seconds",
            probe_latency_seconds.clone(),
        );

        let incidents_total = Family::<IncidentLabels, Counter>::default();
        registry.register(
            "uptime_incidents",
            "Incident transitions",
            incidents_total.clone(),
        );

        let storage_errors_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "uptime_storage_errors",
            "Storage errors by operation",
            storage_errors_total.clone(),
        );

        let targets_active = Gauge::default();
        registry.register(
            "uptime_targets_active",
            "Active targets seen by the last tick",
            targets_active.clone(),
        );

        let probes_in_flight = Gauge::default();
        registry.register(
            "uptime_probes_in_flight",
            "Probes dispatched and not yet recorded",
            probes_in_flight.clone(),
        );

        let targets_quarantined = Gauge::default();
        registry.register(
            "uptime_targets_quarantined",
            "Targets whose incident processing is suspended",
            targets_quarantined.clone(),
        );

        let tick_duration_seconds = Histogram::new(exponential_buckets(0.0001, 2.0, 14));
        registry.register(
            "uptime_tick_duration_seconds",
            "Time spent selecting and dispatching due targets",
            tick_duration_seconds.clone(),
        );

        Self {
            registry,
            checks_total,
            probe_latency_seconds,
            incidents_total,
            storage_errors_total,
            targets_active,
            probes_in_flight,
            targets_quarantined,
            tick_duration_seconds,
        }
    }

    /// Record a stored probe outcome
    pub fn record_check(&self, target_id: TargetId, status: CheckStatus, latency_ms: Option<f64>) {
        self.checks_total
            .get_or_create(&CheckLabels {
                target_id: target_id.to_string(),
                status: status.to_string(),
            })
            .inc();

        if let Some(ms) = latency_ms {
            self.probe_latency_seconds
                .get_or_create(&TargetLabels {
                    target_id: target_id.to_string(),
                })
                .observe(ms / 1000.0);
        }
    }

    /// Record an incident opening or closing
    pub fn record_incident(&self, event: &str) {
        self.incidents_total
            .get_or_create(&IncidentLabels {
                event: event.to_string(),
            })
            .inc();
    }

    /// Record a failed storage call
    pub fn record_storage_error(&self, operation: &str) {
        self.storage_errors_total
            .get_or_create(&OperationLabels {
                operation: operation.to_string(),
            })
            .inc();
    }

    pub fn set_active_targets(&self, count: usize) {
        self.targets_active.set(count as i64);
    }

    pub fn probe_started(&self) {
        self.probes_in_flight.inc();
    }

    pub fn probe_finished(&self) {
        self.probes_in_flight.dec();
    }

    pub fn set_quarantined(&self, count: usize) {
        self.targets_quarantined.set(count as i64);
    }

    /// Record how long a tick took to dispatch
    pub fn record_tick_duration(&self, duration: Duration) {
        self.tick_duration_seconds.observe(duration.as_secs_f64());
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
