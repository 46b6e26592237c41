//! Monitoring types: targets, check outcomes and incidents.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target ID
pub type TargetId = i64;

/// Smallest check interval honoured by the scheduler, in seconds.
pub const MIN_CHECK_INTERVAL_SECS: i64 = 1;

/// Largest check interval honoured by the scheduler (one year), in seconds.
pub const MAX_CHECK_INTERVAL_SECS: i64 = 365 * 24 * 60 * 60;

/// Check interval used when none is configured, in seconds.
pub const DEFAULT_CHECK_INTERVAL_SECS: i64 = 60;

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Target identifier
    pub id: TargetId,

    /// URL probed with an HTTP GET
    pub url: String,

    /// Configured check interval in seconds
    pub check_interval: i64,

    /// Inactive targets are never scheduled
    pub is_active: bool,

    /// Timestamp of the last completed check
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Target {
    /// Create an active target that has never been checked
    pub fn new(id: TargetId, url: impl Into<String>, check_interval: i64) -> Self {
        Self {
            id,
            url: url.into(),
            check_interval,
            is_active: true,
            last_checked_at: None,
        }
    }

    /// Check interval clamped to
    /// [`MIN_CHECK_INTERVAL_SECS`]..=[`MAX_CHECK_INTERVAL_SECS`].
    pub fn effective_interval(&self) -> Duration {
        Duration::seconds(
            self.check_interval
                .clamp(MIN_CHECK_INTERVAL_SECS, MAX_CHECK_INTERVAL_SECS),
        )
    }

    /// Whether the target should be probed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_checked_at {
            None => true,
            Some(last) => now - last >= self.effective_interval(),
        }
    }
}

/// Outcome status of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    /// The endpoint answered with an HTTP response
    Up,
    /// The request failed at the transport level
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "UP",
            CheckStatus::Down => "DOWN",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown check status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for CheckStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(CheckStatus::Up),
            "DOWN" => Ok(CheckStatus::Down),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// What a probe observed.
///
/// Latency exists only for `Up`, an error description only for `Down`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum ProbeResult {
    Up { latency_ms: f64 },
    Down { error: String },
}

impl ProbeResult {
    pub fn status(&self) -> CheckStatus {
        match self {
            ProbeResult::Up { .. } => CheckStatus::Up,
            ProbeResult::Down { .. } => CheckStatus::Down,
        }
    }

    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            ProbeResult::Up { latency_ms } => Some(*latency_ms),
            ProbeResult::Down { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeResult::Up { .. } => None,
            ProbeResult::Down { error } => Some(error),
        }
    }
}

/// Probe result stamped with its completion time, not yet tied to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub checked_at: DateTime<Utc>,
    pub result: ProbeResult,
}

impl ProbeOutcome {
    /// Attach the outcome to a target
    pub fn for_target(self, target_id: TargetId) -> CheckOutcome {
        CheckOutcome {
            target_id,
            checked_at: self.checked_at,
            result: self.result,
        }
    }
}

/// Immutable record of one probe against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub target_id: TargetId,
    pub checked_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: ProbeResult,
}

impl CheckOutcome {
    /// Create an `UP` outcome
    pub fn up(target_id: TargetId, checked_at: DateTime<Utc>, latency_ms: f64) -> Self {
        Self {
            target_id,
            checked_at,
            result: ProbeResult::Up { latency_ms },
        }
    }

    /// Create a `DOWN` outcome
    pub fn down(target_id: TargetId, checked_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            target_id,
            checked_at,
            result: ProbeResult::Down {
                error: error.into(),
            },
        }
    }

    pub fn status(&self) -> CheckStatus {
        self.result.status()
    }

    pub fn is_up(&self) -> bool {
        self.status() == CheckStatus::Up
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.result.latency_ms()
    }

    pub fn error(&self) -> Option<&str> {
        self.result.error()
    }
}

/// A maximal interval during which a target was considered down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub target_id: TargetId,
    pub start: DateTime<Utc>,
    /// `None` while the incident is ongoing
    pub end: Option<DateTime<Utc>>,
}

impl Incident {
    /// Create an ongoing incident
    pub fn open(target_id: TargetId, start: DateTime<Utc>) -> Self {
        Self {
            target_id,
            start,
            end: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Length of a closed incident
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }
}

/// Outcome totals for one or more targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: u64,
    pub down: u64,
}

impl OutcomeCounts {
    /// Share of `UP` outcomes as a percentage rounded to two decimals.
    ///
    /// A target with no history reports 100%.
    pub fn uptime_percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let up = self.total.saturating_sub(self.down) as f64;
        let pct = up / self.total as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}
