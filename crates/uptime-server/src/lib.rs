//! Uptime Server
//!
//! Background process that probes registered HTTP endpoints on their own
//! intervals, stores every outcome and keeps incident records in step with
//! the outcome stream.
//!
//! # Components
//!
//! - **Scheduler**: selects due targets each tick and runs their checks
//!   concurrently under a fixed bound
//! - **Metrics**: Prometheus registry served over HTTP
//! - **Telemetry**: log output and optional OTLP span export
//!
//! Probing, incident tracking and storage live in the `uptime` crate.

pub mod config;
pub mod http_server;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod telemetry;
pub mod types;

pub use config::{Config, ConfigError};
pub use http_server::MetricsServer;
pub use metrics::MetricsRegistry;
pub use scheduler::{
    CheckCompletion, ReconcileError, Scheduler, SchedulerConfig, TickReport, WriteStage,
};
pub use server::UptimeServer;
pub use telemetry::{TelemetryGuard, init_telemetry, setup_tracing_with_otel};
pub use types::{LogFormat, ServerConfig};
