//! Configuration loading and validation for the uptime server

use crate::scheduler::SchedulerConfig;
use crate::types::{DEFAULT_STORAGE_URL, LogFormat, ServerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uptime::Target;
use uptime::types::DEFAULT_CHECK_INTERVAL_SECS;
use validator::{Validate, ValidationError, ValidationErrors};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "UPTIME_SERVER_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub targets: Vec<TargetSettings>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), ValidationErrors> {
        self.storage.validate()?;
        self.scheduler.validate()?;
        self.metrics.validate()?;
        self.logging.validate()?;
        for target in &self.targets {
            target.validate()?;
        }

        let mut seen = HashSet::new();
        if self.targets.iter().any(|t| !seen.insert(t.id)) {
            let mut errors = ValidationErrors::new();
            errors.add("targets", ValidationError::new("duplicate_target_id"));
            return Err(errors);
        }
        Ok(())
    }
}

/// Storage backend settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageSettings {
    #[validate(custom = "validate_storage_url")]
    pub url: String,
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SchedulerSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_tick_interval")]
    pub tick_interval: Duration,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub probe_timeout: Duration,

    #[validate(range(min = 1, max = 10000))]
    pub max_concurrent_probes: usize,

    pub reconcile_on_start: bool,
}

/// Metrics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// OpenTelemetry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct LoggingSettings {
    pub level: Option<String>,

    #[validate(custom = "validate_log_format")]
    pub format: Option<String>,
}

impl LoggingSettings {
    pub fn log_format(&self) -> LogFormat {
        match self.format.as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// A target seeded into storage at boot
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TargetSettings {
    pub id: i64,

    #[validate(url)]
    pub url: String,

    /// Seconds between checks, at most one year
    #[serde(default = "default_check_interval")]
    #[validate(range(min = 1, max = 31536000))]
    pub check_interval: i64,

    #[serde(default = "default_active")]
    pub active: bool,
}

impl TargetSettings {
    pub fn to_target(&self) -> Target {
        let mut target = Target::new(self.id, self.url.clone(), self.check_interval);
        target.is_active = self.active;
        target
    }
}

fn default_check_interval() -> i64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_active() -> bool {
    true
}

// Default implementations

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STORAGE_URL.to_string(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        let defaults = SchedulerConfig::default();
        Self {
            tick_interval: defaults.tick_interval,
            probe_timeout: defaults.probe_timeout,
            max_concurrent_probes: defaults.max_concurrent_probes,
            reconcile_on_start: true,
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "uptime-server".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

// Custom validators

fn validate_storage_url(url: &str) -> Result<(), ValidationError> {
    let url = url.trim();
    if url == "memory" || url.starts_with("sqlite:") {
        Ok(())
    } else {
        Err(ValidationError::new("storage_url_unsupported"))
    }
}

fn validate_tick_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(100..=60_000).contains(&millis) {
        return Err(ValidationError::new("tick_interval_out_of_range"));
    }
    Ok(())
}

fn validate_probe_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    let millis = timeout.as_millis();
    if !(100..=120_000).contains(&millis) {
        return Err(ValidationError::new("probe_timeout_out_of_range"));
    }
    Ok(())
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

fn validate_log_format(format: &str) -> Result<(), ValidationError> {
    match format {
        "text" | "json" => Ok(()),
        _ => Err(ValidationError::new("log_format_unsupported")),
    }
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(ConfigError::FileNotFound(path));
            }
            return Self::load_from_file(&path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/uptime/uptime-server.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./uptime-server.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/uptime/uptime-server.yaml"))
    }

    /// Log level, defaulting to `info`
    pub fn log_level(&self) -> &str {
        self.logging.level.as_deref().unwrap_or("info")
    }

    /// Convert to the server's runtime configuration
    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            storage_url: self.storage.url.trim().to_string(),
            scheduler: SchedulerConfig {
                tick_interval: self.scheduler.tick_interval,
                probe_timeout: self.scheduler.probe_timeout,
                max_concurrent_probes: self.scheduler.max_concurrent_probes,
            },
            reconcile_on_start: self.scheduler.reconcile_on_start,
            metrics_enabled: self.metrics.enabled,
            metrics_listen_addr: self.metrics.listen_addr.clone(),
            seed_targets: self.targets.iter().map(TargetSettings::to_target).collect(),
        }
    }
}
