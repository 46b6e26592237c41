//! In-process storage backend.

use super::{IncidentStore, ResultStore, StoreError, TargetStore};
use crate::types::{CheckOutcome, CheckStatus, Incident, OutcomeCounts, Target, TargetId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Inner {
    targets: BTreeMap<TargetId, Target>,
    /// Per-target outcomes, kept sorted by `checked_at`
    outcomes: HashMap<TargetId, Vec<CheckOutcome>>,
    /// Per-target incidents, kept sorted by `start`
    incidents: HashMap<TargetId, Vec<Incident>>,
}

/// Storage backed by in-memory maps
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `targets`
    pub fn with_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let targets = targets.into_iter().map(|t| (t.id, t)).collect();
        Self {
            inner: RwLock::new(Inner {
                targets,
                ..Inner::default()
            }),
        }
    }

    /// Insert or replace a target
    pub async fn upsert_target(&self, target: Target) {
        self.inner.write().await.targets.insert(target.id, target);
    }

    /// Flip a target's active flag. Returns false if the target is unknown.
    pub async fn set_active(&self, target_id: TargetId, active: bool) -> bool {
        match self.inner.write().await.targets.get_mut(&target_id) {
            Some(target) => {
                target.is_active = active;
                true
            }
            None => false,
        }
    }

    /// Delete a target together with its outcomes and incidents
    pub async fn remove_target(&self, target_id: TargetId) -> Option<Target> {
        let mut inner = self.inner.write().await;
        inner.outcomes.remove(&target_id);
        inner.incidents.remove(&target_id);
        inner.targets.remove(&target_id)
    }

    /// Look up a target regardless of its active flag
    pub async fn target(&self, target_id: TargetId) -> Option<Target> {
        self.inner.read().await.targets.get(&target_id).cloned()
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn list_active_targets(&self) -> Result<Vec<Target>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.targets.values().filter(|t| t.is_active).cloned().collect())
    }

    async fn mark_checked(
        &self,
        target_id: TargetId,
        checked_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.targets.get_mut(&target_id) {
            Some(target) => target.last_checked_at = Some(checked_at),
            None => debug!(target_id, "Ignoring check mark for unknown target"),
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn append_outcome(&self, outcome: &CheckOutcome) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let log = inner.outcomes.entry(outcome.target_id).or_default();
        // Equal timestamps keep arrival order.
        let pos = log.partition_point(|o| o.checked_at <= outcome.checked_at);
        log.insert(pos, outcome.clone());
        Ok(())
    }

    async fn recent_outcomes(
        &self,
        target_id: TargetId,
        limit: usize,
    ) -> Result<Vec<CheckOutcome>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .outcomes
            .get(&target_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn outcome_history(&self, target_id: TargetId) -> Result<Vec<CheckOutcome>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.outcomes.get(&target_id).cloned().unwrap_or_default())
    }

    async fn outcomes_between(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CheckOutcome>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .outcomes
            .get(&target_id)
            .map(|log| {
                log.iter()
                    .filter(|o| o.checked_at >= from && o.checked_at <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn outcome_counts(&self, target_ids: &[TargetId]) -> Result<OutcomeCounts, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = OutcomeCounts::default();
        for id in target_ids {
            if let Some(log) = inner.outcomes.get(id) {
                counts.total += log.len() as u64;
                counts.down += log.iter().filter(|o| o.status() == CheckStatus::Down).count() as u64;
            }
        }
        Ok(counts)
    }

    async fn average_latency(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        let inner = self.inner.read().await;
        let latencies: Vec<f64> = inner
            .outcomes
            .get(&target_id)
            .into_iter()
            .flatten()
            .filter(|o| o.checked_at >= from && o.checked_at <= to)
            .filter_map(|o| o.latency_ms())
            .collect();

        if latencies.is_empty() {
            return Ok(None);
        }
        Ok(Some(latencies.iter().sum::<f64>() / latencies.len() as f64))
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn open_incident(
        &self,
        target_id: TargetId,
        start: DateTime<Utc>,
    ) -> Result<Incident, StoreError> {
        let mut inner = self.inner.write().await;
        let incidents = inner.incidents.entry(target_id).or_default();
        if incidents.iter().any(Incident::is_open) {
            return Err(StoreError::IncidentAlreadyOpen { target_id });
        }

        let incident = Incident::open(target_id, start);
        let pos = incidents.partition_point(|i| i.start <= start);
        incidents.insert(pos, incident.clone());
        Ok(incident)
    }

    async fn close_open_incident(
        &self,
        target_id: TargetId,
        end: DateTime<Utc>,
    ) -> Result<Option<Incident>, StoreError> {
        let mut inner = self.inner.write().await;
        let open = inner
            .incidents
            .get_mut(&target_id)
            .and_then(|incidents| incidents.iter_mut().find(|i| i.is_open()));

        Ok(open.map(|incident| {
            incident.end = Some(end);
            incident.clone()
        }))
    }

    async fn get_open_incident(&self, target_id: TargetId) -> Result<Option<Incident>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .incidents
            .get(&target_id)
            .and_then(|incidents| incidents.iter().find(|i| i.is_open()).cloned()))
    }

    async fn incidents_for(&self, target_id: TargetId) -> Result<Vec<Incident>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.incidents.get(&target_id).cloned().unwrap_or_default())
    }

    async fn incidents_between(
        &self,
        target_id: TargetId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .incidents
            .get(&target_id)
            .map(|incidents| {
                incidents
                    .iter()
                    .rev()
                    .filter(|i| i.start >= from && i.start <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
