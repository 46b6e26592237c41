//! Incident tracking.
//!
//! An incident opens when a target's outcomes go from `UP` to `DOWN` and
//! closes on the next `DOWN` to `UP` change. Repeated outcomes of the same
//! status change nothing, and the first outcome ever seen for a target never
//! opens or closes anything.

use crate::store::{IncidentStore, StoreError};
use crate::types::{CheckOutcome, CheckStatus, Incident, TargetId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Effect of one outcome on a target's incident state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// No incident opened or closed
    Steady,
    /// `UP -> DOWN`: an incident starts at the outcome's timestamp
    Open { start: DateTime<Utc> },
    /// `DOWN -> UP`: the open incident ends at the outcome's timestamp
    Close { end: DateTime<Utc> },
}

/// Incident transition for `outcome` given the status of the outcome
/// immediately before it.
pub fn transition(previous: Option<CheckStatus>, outcome: &CheckOutcome) -> Transition {
    match (previous, outcome.status()) {
        (Some(CheckStatus::Up), CheckStatus::Down) => Transition::Open {
            start: outcome.checked_at,
        },
        (Some(CheckStatus::Down), CheckStatus::Up) => Transition::Close {
            end: outcome.checked_at,
        },
        _ => Transition::Steady,
    }
}

/// Derive the incident set of one target from its full outcome history.
///
/// `outcomes` must belong to a single target and be ordered oldest first.
pub fn replay(outcomes: &[CheckOutcome]) -> Vec<Incident> {
    let mut incidents: Vec<Incident> = Vec::new();
    let mut previous = None;

    for outcome in outcomes {
        match transition(previous, outcome) {
            Transition::Open { start } => {
                incidents.push(Incident::open(outcome.target_id, start));
            }
            Transition::Close { end } => {
                if let Some(open) = incidents.last_mut().filter(|i| i.is_open()) {
                    open.end = Some(end);
                }
            }
            Transition::Steady => {}
        }
        previous = Some(outcome.status());
    }

    incidents
}

/// Incident tracker error types
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("incident storage failed: {0}")]
    Store(#[from] StoreError),

    #[error("incident invariant violated for target {target_id}: {reason}")]
    Invariant { target_id: TargetId, reason: String },
}

impl TrackerError {
    fn invariant(target_id: TargetId, reason: impl Into<String>) -> Self {
        TrackerError::Invariant {
            target_id,
            reason: reason.into(),
        }
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, TrackerError::Invariant { .. })
    }
}

/// Writes performed by [`IncidentTracker::rederive`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RederiveReport {
    pub opened: usize,
    pub closed: usize,
}

impl RederiveReport {
    /// Stored incidents already matched the history
    pub fn is_noop(&self) -> bool {
        self.opened == 0 && self.closed == 0
    }
}

/// Repair needed to bring one stored incident in line with the history
enum Repair {
    Insert(Incident),
    Close(DateTime<Utc>),
}

/// Applies incident transitions to the incident store
pub struct IncidentTracker {
    incidents: Arc<dyn IncidentStore>,
}

impl IncidentTracker {
    /// Create a new incident tracker
    pub fn new(incidents: Arc<dyn IncidentStore>) -> Self {
        Self { incidents }
    }

    /// Apply the transition caused by `outcome`.
    ///
    /// `previous` is the status of the target's preceding outcome, `None` if
    /// this is the first outcome ever recorded. The outcome itself must
    /// already be stored.
    pub async fn observe(
        &self,
        previous: Option<CheckStatus>,
        outcome: &CheckOutcome,
    ) -> Result<Transition, TrackerError> {
        let target_id = outcome.target_id;
        let change = transition(previous, outcome);

        match change {
            Transition::Open { start } => match self.incidents.open_incident(target_id, start).await {
                Ok(_) => info!(target_id, %start, "Incident opened"),
                Err(StoreError::IncidentAlreadyOpen { .. }) => {
                    return Err(TrackerError::invariant(
                        target_id,
                        "UP to DOWN transition while an incident is already open",
                    ));
                }
                Err(e) => return Err(e.into()),
            },
            Transition::Close { end } => match self.incidents.close_open_incident(target_id, end).await? {
                Some(incident) => {
                    let duration_secs = incident.duration().map(|d| d.num_seconds()).unwrap_or(0);
                    info!(target_id, %end, duration_secs, "Incident closed");
                }
                // A target whose history starts DOWN never had an incident opened.
                None => debug!(target_id, "DOWN to UP with no open incident"),
            },
            Transition::Steady => {}
        }

        Ok(change)
    }

    /// Bring stored incidents in line with a target's full outcome history.
    ///
    /// Missing incidents are inserted and incidents left open are closed.
    /// Nothing is ever deleted: a stored incident that the history does not
    /// explain is reported as an invariant violation and no writes happen.
    pub async fn rederive(
        &self,
        target_id: TargetId,
        history: &[CheckOutcome],
    ) -> Result<RederiveReport, TrackerError> {
        let expected = replay(history);
        let stored = self.incidents.incidents_for(target_id).await?;

        if let Some(orphan) = stored
            .iter()
            .find(|s| !expected.iter().any(|e| e.start == s.start))
        {
            return Err(TrackerError::invariant(
                target_id,
                format!("stored incident starting at {} has no UP to DOWN transition", orphan.start),
            ));
        }

        let mut repairs = Vec::new();
        for incident in &expected {
            match stored.iter().find(|s| s.start == incident.start) {
                None => repairs.push(Repair::Insert(incident.clone())),
                Some(existing) if existing.end == incident.end => {}
                Some(existing) => match (existing.end, incident.end) {
                    (None, Some(end)) => repairs.push(Repair::Close(end)),
                    _ => {
                        return Err(TrackerError::invariant(
                            target_id,
                            format!(
                                "stored incident starting at {} disagrees with outcome history",
                                existing.start
                            ),
                        ));
                    }
                },
            }
        }

        let mut report = RederiveReport::default();
        for repair in repairs {
            match repair {
                Repair::Insert(incident) => {
                    match self.incidents.open_incident(target_id, incident.start).await {
                        Ok(_) => report.opened += 1,
                        Err(StoreError::IncidentAlreadyOpen { .. }) => {
                            return Err(TrackerError::invariant(
                                target_id,
                                "cannot insert missing incident while another is open",
                            ));
                        }
                        Err(e) => return Err(e.into()),
                    }
                    if let Some(end) = incident.end {
                        self.incidents.close_open_incident(target_id, end).await?;
                        report.closed += 1;
                    }
                }
                Repair::Close(end) => {
                    self.incidents.close_open_incident(target_id, end).await?;
                    report.closed += 1;
                }
            }
        }

        if !report.is_noop() {
            warn!(
                target_id,
                opened = report.opened,
                closed = report.closed,
                "Repaired incidents from outcome history"
            );
        }
        Ok(report)
    }
}
