//! Storage collaborator interfaces.
//!
//! The monitoring core reads target configuration and writes outcomes and
//! incidents exclusively through these traits. Implementations must accept
//! concurrent calls from many in-flight probe completions.

pub mod memory;
pub mod sqlite;

use crate::types::{CheckOutcome, Incident, OutcomeCounts, Target, TargetId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("target {target_id} already has an open incident")]
    IncidentAlreadyOpen { target_id: TargetId },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Read side of the configuration store, plus the last-checked bookkeeping.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// All targets whose active flag is set
    async fn list_active_targets(&self) -> Result<Vec<Target>, StoreError>;

    /// Record when a target was last checked.
    ///
    /// Unknown targets (removed since dispatch) are ignored.
    async fn mark_checked(
        &self,
        target_id: TargetId,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Append-only outcome log and its queries.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Durably append an outcome
    async fn append_outcome(&self, outcome: &CheckOutcome) -> Result<(), StoreError>;

    /// Most recent `limit` outcomes, newest first
    async fn recent_outcomes(
        &self,
        target_id: TargetId,
        limit: usize,
    ) -> Result<Vec<CheckOutcome>, StoreError>;

    /// Every outcome for a target, oldest first
    async fn outcome_history(&self, target_id: TargetId) -> Result<Vec<CheckOutcome>, StoreError>;

    /// Outcomes checked within `[from, to]`, oldest first
    async fn outcomes_between(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckOutcome>, StoreError>;

    /// Total and `DOWN` counts summed over `target_ids`
    async fn outcome_counts(&self, target_ids: &[TargetId]) -> Result<OutcomeCounts, StoreError>;

    /// Mean latency of `UP` outcomes within `[from, to]`
    async fn average_latency(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError>;
}

/// Incident records.
///
/// Implementations reject a second open incident for the same target with
/// [`StoreError::IncidentAlreadyOpen`].
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn open_incident(
        &self,
        target_id: TargetId,
        start: DateTime<Utc>,
    ) -> Result<Incident, StoreError>;

    /// Close the open incident, returning it, or `None` if nothing was open
    async fn close_open_incident(
        &self,
        target_id: TargetId,
        end: DateTime<Utc>,
    ) -> Result<Option<Incident>, StoreError>;

    async fn get_open_incident(&self, target_id: TargetId) -> Result<Option<Incident>, StoreError>;

    /// Every incident for a target, ordered by start
    async fn incidents_for(&self, target_id: TargetId) -> Result<Vec<Incident>, StoreError>;

    /// Incidents starting within `[from, to]`, newest first
    async fn incidents_between(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StoreError>;
}

/// A backend implementing every collaborator interface.
pub trait Storage: TargetStore + ResultStore + IncidentStore {}

impl<T: TargetStore + ResultStore + IncidentStore> Storage for T {}

/// Collaborator handles injected into the monitoring core.
#[derive(Clone)]
pub struct Collaborators {
    pub targets: Arc<dyn TargetStore>,
    pub results: Arc<dyn ResultStore>,
    pub incidents: Arc<dyn IncidentStore>,
}

impl Collaborators {
    /// Use one backend for every role
    pub fn from_store<S: Storage + 'static>(store: Arc<S>) -> Self {
        Self {
            targets: store.clone(),
            results: store.clone(),
            incidents: store,
        }
    }
}

/// Behaviour every backend must share.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::types::CheckStatus;
    use chrono::TimeZone;

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub async fn outcome_queries<S: Storage>(store: &S) {
        store.append_outcome(&CheckOutcome::up(1, at(0), 10.0)).await.unwrap();
        store.append_outcome(&CheckOutcome::down(1, at(60), "Connection error")).await.unwrap();
        store.append_outcome(&CheckOutcome::up(1, at(120), 30.0)).await.unwrap();
        store.append_outcome(&CheckOutcome::down(2, at(30), "Request timeout")).await.unwrap();

        let recent = store.recent_outcomes(1, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].checked_at, at(120));
        assert_eq!(recent[1].checked_at, at(60));
        assert_eq!(recent[1].error(), Some("Connection error"));

        let history = store.outcome_history(1).await.unwrap();
        let times: Vec<_> = history.iter().map(|o| o.checked_at).collect();
        assert_eq!(times, vec![at(0), at(60), at(120)]);

        let window = store.outcomes_between(1, at(30), at(120)).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].status(), CheckStatus::Down);

        let counts = store.outcome_counts(&[1]).await.unwrap();
        assert_eq!(counts, OutcomeCounts { total: 3, down: 1 });
        let counts = store.outcome_counts(&[1, 2]).await.unwrap();
        assert_eq!(counts, OutcomeCounts { total: 4, down: 2 });
        assert_eq!(store.outcome_counts(&[]).await.unwrap(), OutcomeCounts::default());

        let avg = store.average_latency(1, at(0), at(120)).await.unwrap();
        assert_eq!(avg, Some(20.0));
        assert_eq!(store.average_latency(2, at(0), at(120)).await.unwrap(), None);

        assert!(store.recent_outcomes(99, 3).await.unwrap().is_empty());
    }

    pub async fn incident_lifecycle<S: Storage>(store: &S) {
        assert!(store.get_open_incident(1).await.unwrap().is_none());

        let opened = store.open_incident(1, at(60)).await.unwrap();
        assert_eq!(opened, Incident::open(1, at(60)));

        let err = store.open_incident(1, at(90)).await.unwrap_err();
        assert!(matches!(err, StoreError::IncidentAlreadyOpen { target_id: 1 }));

        // Other targets are unaffected by target 1's open incident.
        store.open_incident(2, at(70)).await.unwrap();

        let closed = store.close_open_incident(1, at(120)).await.unwrap().unwrap();
        assert_eq!(closed.start, at(60));
        assert_eq!(closed.end, Some(at(120)));
        assert!(store.get_open_incident(1).await.unwrap().is_none());
        assert!(store.close_open_incident(1, at(130)).await.unwrap().is_none());

        store.open_incident(1, at(200)).await.unwrap();
        let all = store.incidents_for(1).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].end, Some(at(120)));
        assert!(all[1].is_open());

        let recent = store.incidents_between(1, at(100), at(300)).await.unwrap();
        assert_eq!(recent, vec![Incident::open(1, at(200))]);
        let newest_first = store.incidents_between(1, at(0), at(300)).await.unwrap();
        assert_eq!(newest_first[0].start, at(200));
        assert_eq!(newest_first[1].start, at(60));
    }

    pub async fn target_bookkeeping<S: Storage>(store: &S) {
        let active = store.list_active_targets().await.unwrap();
        let ids: Vec<_> = active.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(active.iter().all(|t| t.last_checked_at.is_none()));

        store.mark_checked(1, at(5)).await.unwrap();
        // Removed or unknown targets are ignored.
        store.mark_checked(42, at(5)).await.unwrap();

        let active = store.list_active_targets().await.unwrap();
        assert_eq!(active[0].last_checked_at, Some(at(5)));
    }

    /// Targets seeded by callers of [`target_bookkeeping`]
    pub fn seed_targets() -> Vec<Target> {
        let mut inactive = Target::new(2, "http://inactive.test", 60);
        inactive.is_active = false;
        vec![
            Target::new(1, "http://one.test", 60),
            inactive,
            Target::new(3, "http://three.test", 30),
        ]
    }
}
