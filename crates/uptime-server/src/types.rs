//! Types for the uptime server.

use crate::scheduler::SchedulerConfig;
use uptime::Target;

/// Storage URL used when none is configured
pub const DEFAULT_STORAGE_URL: &str = "sqlite://uptime.db";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `sqlite://path`, `sqlite::memory:` or `memory`
    pub storage_url: String,

    /// Scheduler tuning
    pub scheduler: SchedulerConfig,

    /// Re-derive incidents from history before the first tick
    pub reconcile_on_start: bool,

    /// Serve Prometheus metrics
    pub metrics_enabled: bool,

    /// Metrics HTTP listen address
    pub metrics_listen_addr: String,

    /// Targets upserted into storage at boot
    pub seed_targets: Vec<Target>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage_url: DEFAULT_STORAGE_URL.to_string(),
            scheduler: SchedulerConfig::default(),
            reconcile_on_start: true,
            metrics_enabled: true,
            metrics_listen_addr: "127.0.0.1:9090".to_string(),
            seed_targets: Vec::new(),
        }
    }
}
