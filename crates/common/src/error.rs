//! Process-level error types for the uptime monitor.

use std::fmt;

/// A specialized Result type for uptime monitor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort startup or surface from the server's top level.
///
/// Per-target failures (probe errors, storage hiccups) never reach this type;
/// they are logged and absorbed by the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new storage error.
    pub fn storage(msg: impl fmt::Display) -> Self {
        Error::Storage(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new telemetry error.
    pub fn telemetry(msg: impl fmt::Display) -> Self {
        Error::Telemetry(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
