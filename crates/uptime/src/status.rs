//! Display status and availability summaries.
//!
//! The display status needs the last few outcomes to agree before it says
//! `UP` or `DOWN`, so a single odd probe shows as `UNKNOWN`. It is computed
//! independently of incident state.

use crate::store::{IncidentStore, ResultStore, StoreError};
use crate::types::{CheckOutcome, CheckStatus, Incident, OutcomeCounts, TargetId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Number of trailing outcomes that must agree
pub const STATUS_WINDOW: usize = 3;

/// Damped status shown for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisplayStatus {
    Up,
    Down,
    Unknown,
}

impl fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayStatus::Up => write!(f, "UP"),
            DisplayStatus::Down => write!(f, "DOWN"),
            DisplayStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify the newest-first statuses; only the first [`STATUS_WINDOW`] count.
pub fn classify<I>(newest_first: I) -> DisplayStatus
where
    I: IntoIterator<Item = CheckStatus>,
{
    let mut window = newest_first.into_iter().take(STATUS_WINDOW);
    let Some(first) = window.next() else {
        return DisplayStatus::Unknown;
    };

    if window.all(|status| status == first) {
        match first {
            CheckStatus::Up => DisplayStatus::Up,
            CheckStatus::Down => DisplayStatus::Down,
        }
    } else {
        DisplayStatus::Unknown
    }
}

/// Display status from outcomes ordered newest first
pub fn display_status(recent: &[CheckOutcome]) -> DisplayStatus {
    classify(recent.iter().map(CheckOutcome::status))
}

/// Availability overview of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeSummary {
    pub target_id: TargetId,
    /// Status of the latest outcome
    pub current_status: Option<CheckStatus>,
    pub display_status: DisplayStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub total_checks: u64,
    pub failed_checks: u64,
    pub uptime_percentage: f64,
    pub ongoing_incident: Option<Incident>,
}

/// Read-only queries deriving availability from stored outcomes
pub struct StatusAggregator {
    results: Arc<dyn ResultStore>,
    incidents: Arc<dyn IncidentStore>,
}

impl StatusAggregator {
    pub fn new(results: Arc<dyn ResultStore>, incidents: Arc<dyn IncidentStore>) -> Self {
        Self { results, incidents }
    }

    pub async fn display_status(&self, target_id: TargetId) -> Result<DisplayStatus, StoreError> {
        let recent = self.results.recent_outcomes(target_id, STATUS_WINDOW).await?;
        Ok(display_status(&recent))
    }

    pub async fn summary(&self, target_id: TargetId) -> Result<UptimeSummary, StoreError> {
        let recent = self.results.recent_outcomes(target_id, STATUS_WINDOW).await?;
        let counts = self.results.outcome_counts(&[target_id]).await?;
        let ongoing_incident = self.incidents.get_open_incident(target_id).await?;
        let latest = recent.first();

        Ok(UptimeSummary {
            target_id,
            current_status: latest.map(CheckOutcome::status),
            display_status: display_status(&recent),
            last_checked_at: latest.map(|o| o.checked_at),
            total_checks: counts.total,
            failed_checks: counts.down,
            uptime_percentage: counts.uptime_percentage(),
            ongoing_incident,
        })
    }

    /// Uptime percentage across several targets
    pub async fn overall_uptime(&self, target_ids: &[TargetId]) -> Result<f64, StoreError> {
        let counts: OutcomeCounts = self.results.outcome_counts(target_ids).await?;
        Ok(counts.uptime_percentage())
    }

    /// Outcomes from the last `hours` hours, oldest first
    pub async fn response_times(
        &self,
        target_id: TargetId,
        now: DateTime<Utc>,
        hours: i64,
    ) -> Result<Vec<CheckOutcome>, StoreError> {
        match window_start(now, Duration::try_hours(hours)) {
            Some(from) => self.results.outcomes_between(target_id, from, now).await,
            None => Ok(Vec::new()),
        }
    }

    /// Mean `UP` latency over the last `hours` hours
    pub async fn average_latency(
        &self,
        target_id: TargetId,
        now: DateTime<Utc>,
        hours: i64,
    ) -> Result<Option<f64>, StoreError> {
        match window_start(now, Duration::try_hours(hours)) {
            Some(from) => self.results.average_latency(target_id, from, now).await,
            None => Ok(None),
        }
    }

    /// Incidents that started in the last `days` days, newest first
    pub async fn incident_history(
        &self,
        target_id: TargetId,
        now: DateTime<Utc>,
        days: i64,
    ) -> Result<Vec<Incident>, StoreError> {
        match window_start(now, Duration::try_days(days)) {
            Some(from) => self.incidents.incidents_between(target_id, from, now).await,
            None => Ok(Vec::new()),
        }
    }
}

/// Start of a look-back window, `None` when it falls outside chrono's range
fn window_start(now: DateTime<Utc>, span: Option<Duration>) -> Option<DateTime<Utc>> {
    now.checked_sub_signed(span?)
}
