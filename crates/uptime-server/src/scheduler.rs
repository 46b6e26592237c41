//! Monitoring scheduler.
//!
//! A single background loop wakes every `tick_interval`, reads the active
//! targets, and spawns one task per due target. Each task probes under a
//! shared concurrency bound and then runs the target's write sequence:
//!
//! 1. append the outcome
//! 2. apply the incident transition
//! 3. mark the target checked
//!
//! A target is never dispatched again while a task for it is still alive,
//! so outcomes for one target are written in completion order. A failed
//! write stops the sequence and leaves `last_checked_at` untouched, which
//! makes the target due again on the next tick.

use crate::metrics::MetricsRegistry;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uptime::incident::transition;
use uptime::prober::DEFAULT_PROBE_TIMEOUT;
use uptime::{
    CheckOutcome, CheckStatus, Collaborators, IncidentTracker, Prober, ProbeResult,
    RederiveReport, StoreError, Target, TargetId, TrackerError, Transition,
};

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Sleep between ticks
    pub tick_interval: Duration,
    /// Timeout handed to the prober
    pub probe_timeout: Duration,
    /// Probes allowed on the network at once
    pub max_concurrent_probes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrent_probes: 64,
        }
    }
}

/// Step of the per-target write sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Reading the preceding outcome
    ReadPrevious,
    AppendOutcome,
    IncidentUpdate,
    MarkChecked,
}

impl WriteStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStage::ReadPrevious => "recent_outcomes",
            WriteStage::AppendOutcome => "append_outcome",
            WriteStage::IncidentUpdate => "incident_update",
            WriteStage::MarkChecked => "mark_checked",
        }
    }
}

/// How a dispatched check ended
#[derive(Debug, Clone, PartialEq)]
pub enum CheckCompletion {
    /// Outcome stored, incidents updated, target marked checked
    Recorded {
        outcome: CheckOutcome,
        transition: Transition,
    },
    /// Outcome stored and target marked checked, but the target is
    /// quarantined so incidents were left alone
    IncidentSkipped { outcome: CheckOutcome },
    /// A storage call failed; the target is retried next tick
    StorageFailed {
        target_id: TargetId,
        stage: WriteStage,
        error: String,
    },
    /// The scheduler stopped before the probe could start
    Abandoned { target_id: TargetId },
}

impl CheckCompletion {
    pub fn target_id(&self) -> TargetId {
        match self {
            CheckCompletion::Recorded { outcome, .. } => outcome.target_id,
            CheckCompletion::IncidentSkipped { outcome } => outcome.target_id,
            CheckCompletion::StorageFailed { target_id, .. } => *target_id,
            CheckCompletion::Abandoned { target_id } => *target_id,
        }
    }

    /// The stored outcome, if it made it to the result store
    pub fn outcome(&self) -> Option<&CheckOutcome> {
        match self {
            CheckCompletion::Recorded { outcome, .. } => Some(outcome),
            CheckCompletion::IncidentSkipped { outcome } => Some(outcome),
            _ => None,
        }
    }
}

/// Why [`Scheduler::reconcile`] did not repair a target
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("target {0} has a check in flight")]
    Busy(TargetId),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl ReconcileError {
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ReconcileError::Tracker(e) if e.is_invariant_violation())
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        ReconcileError::Tracker(e.into())
    }
}

/// What a single tick did
#[derive(Debug, Default)]
pub struct TickReport {
    /// Active targets read from the configuration store
    pub active: usize,
    /// Due targets skipped because their previous check is still running
    pub skipped_in_flight: usize,
    /// Spawned checks
    pub dispatched: Vec<(TargetId, JoinHandle<CheckCompletion>)>,
}

impl TickReport {
    pub fn dispatched_ids(&self) -> Vec<TargetId> {
        self.dispatched.iter().map(|(id, _)| *id).collect()
    }

    /// Wait for every dispatched check to finish
    pub async fn wait(self) -> Vec<CheckCompletion> {
        let mut completions = Vec::with_capacity(self.dispatched.len());
        for (target_id, handle) in self.dispatched {
            match handle.await {
                Ok(completion) => completions.push(completion),
                Err(e) => warn!(target_id, error = %e, "Check task failed"),
            }
        }
        completions
    }
}

struct Shared {
    collaborators: Collaborators,
    prober: Arc<dyn Prober>,
    tracker: IncidentTracker,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    in_flight: DashSet<TargetId>,
    /// Targets with incident processing suspended, with the reason
    quarantined: DashMap<TargetId, String>,
    /// Targets whose last incident write failed
    needs_rederive: DashSet<TargetId>,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Removes a target from the in-flight set when its task ends.
struct InFlightGuard {
    shared: Arc<Shared>,
    target_id: TargetId,
}

impl InFlightGuard {
    fn acquire(shared: &Arc<Shared>, target_id: TargetId) -> Option<Self> {
        if !shared.in_flight.insert(target_id) {
            return None;
        }
        if let Some(ref m) = shared.metrics {
            m.probe_started();
        }
        Some(Self {
            shared: shared.clone(),
            target_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.remove(&self.target_id);
        if let Some(ref m) = self.shared.metrics {
            m.probe_finished();
        }
    }
}

/// Polling scheduler with injected collaborators.
///
/// Cloning is cheap; clones share state and the stop signal.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    stop_signal: Arc<Notify>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        collaborators: Collaborators,
        prober: Arc<dyn Prober>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));
        let tracker = IncidentTracker::new(collaborators.incidents.clone());

        Self {
            shared: Arc::new(Shared {
                collaborators,
                prober,
                tracker,
                config,
                permits,
                in_flight: DashSet::new(),
                quarantined: DashMap::new(),
                needs_rederive: DashSet::new(),
                metrics,
            }),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Start the background loop
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run().await;
        })
    }

    /// Stop the background loop.
    ///
    /// Checks waiting for a probe slot are abandoned; probes already on the
    /// network finish on their own timeout. A stopped scheduler cannot be
    /// started again.
    pub fn stop(&self) {
        info!("Stopping scheduler");
        self.shared.permits.close();
        self.stop_signal.notify_one();
    }

    async fn run(&self) {
        info!(
            tick_interval_ms = self.shared.config.tick_interval.as_millis() as u64,
            max_concurrent_probes = self.shared.config.max_concurrent_probes,
            prober = self.shared.prober.name(),
            "Scheduler started"
        );

        loop {
            let report = self.tick().await;
            if !report.dispatched.is_empty() {
                debug!(
                    active = report.active,
                    dispatched = report.dispatched.len(),
                    skipped_in_flight = report.skipped_in_flight,
                    "Tick dispatched checks"
                );
            }
            // Dropping the handles detaches the checks.
            drop(report);

            tokio::select! {
                _ = tokio::time::sleep(self.shared.config.tick_interval) => {}
                _ = self.stop_signal.notified() => {
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run one tick: read targets, dispatch every due target that is not
    /// already in flight, and return without waiting for the checks.
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick using `now` for the due check
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let start = Instant::now();

        let targets = match self.shared.collaborators.targets.list_active_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "Failed to read active targets, skipping tick");
                self.shared.record_storage_error("list_active_targets");
                return TickReport::default();
            }
        };

        if let Some(ref m) = self.shared.metrics {
            m.set_active_targets(targets.len());
        }

        let mut report = TickReport {
            active: targets.len(),
            ..TickReport::default()
        };

        for target in targets.into_iter().filter(|t| t.is_due(now)) {
            let target_id = target.id;
            let Some(guard) = InFlightGuard::acquire(&self.shared, target_id) else {
                debug!(target_id, "Previous check still in flight");
                report.skipped_in_flight += 1;
                continue;
            };

            let shared = self.shared.clone();
            let handle = tokio::spawn(async move {
                let _guard = guard;
                shared.run_check(target).await
            });
            report.dispatched.push((target_id, handle));
        }

        if let Some(ref m) = self.shared.metrics {
            m.record_tick_duration(start.elapsed());
        }

        report
    }

    /// Re-derive incidents for every active target.
    ///
    /// Returns the number of targets whose incidents needed repair. Targets
    /// that fail are logged and stay (or become) quarantined.
    pub async fn reconcile_all(&self) -> Result<usize, StoreError> {
        let targets = self.shared.collaborators.targets.list_active_targets().await?;
        let mut repaired = 0;

        for target in &targets {
            match self.reconcile(target.id).await {
                Ok(report) if !report.is_noop() => repaired += 1,
                Ok(_) => {}
                Err(e) => warn!(target_id = target.id, error = %e, "Reconciliation failed"),
            }
        }

        info!(targets = targets.len(), repaired, "Incident reconciliation finished");
        Ok(repaired)
    }

    /// Re-derive one target's incidents from its outcome history.
    ///
    /// Holds the target's in-flight slot, so the loop cannot dispatch it
    /// meanwhile; a target with a check already running is refused with
    /// [`ReconcileError::Busy`]. On success the target leaves quarantine.
    pub async fn reconcile(&self, target_id: TargetId) -> Result<RederiveReport, ReconcileError> {
        let shared = &self.shared;
        let Some(_guard) = InFlightGuard::acquire(shared, target_id) else {
            return Err(ReconcileError::Busy(target_id));
        };
        let history = shared.collaborators.results.outcome_history(target_id).await?;

        match shared.tracker.rederive(target_id, &history).await {
            Ok(report) => {
                shared.needs_rederive.remove(&target_id);
                if shared.quarantined.remove(&target_id).is_some() {
                    info!(target_id, "Target released from quarantine");
                    shared.update_quarantine_gauge();
                }
                Ok(report)
            }
            Err(TrackerError::Invariant { target_id, reason }) => {
                shared.quarantine(target_id, &reason);
                Err(TrackerError::Invariant { target_id, reason }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_quarantined(&self, target_id: TargetId) -> bool {
        self.shared.quarantined.contains_key(&target_id)
    }

    /// Quarantined targets with the violation that suspended them
    pub fn quarantined(&self) -> Vec<(TargetId, String)> {
        self.shared
            .quarantined
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Targets with a check task still alive
    pub fn in_flight(&self) -> Vec<TargetId> {
        self.shared.in_flight.iter().map(|id| *id).collect()
    }
}

impl Shared {
    async fn run_check(&self, target: Target) -> CheckCompletion {
        let target_id = target.id;

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                debug!(target_id, "Scheduler stopped, abandoning check");
                return CheckCompletion::Abandoned { target_id };
            }
        };
        let outcome = self
            .prober
            .probe(&target.url, self.config.probe_timeout)
            .await
            .for_target(target_id);
        drop(permit);

        match &outcome.result {
            ProbeResult::Up { latency_ms } => {
                debug!(target_id, url = %target.url, latency_ms, "Target up");
            }
            ProbeResult::Down { error } => {
                debug!(target_id, url = %target.url, error = %error, "Target down");
            }
        }

        self.record(outcome).await
    }

    /// Write sequence for one outcome
    async fn record(&self, outcome: CheckOutcome) -> CheckCompletion {
        let target_id = outcome.target_id;
        let results = &self.collaborators.results;

        let previous = match results.recent_outcomes(target_id, 1).await {
            Ok(recent) => recent.first().map(CheckOutcome::status),
            Err(e) => return self.storage_failed(target_id, WriteStage::ReadPrevious, &e),
        };

        if let Err(e) = results.append_outcome(&outcome).await {
            return self.storage_failed(target_id, WriteStage::AppendOutcome, &e);
        }
        if let Some(ref m) = self.metrics {
            m.record_check(target_id, outcome.status(), outcome.latency_ms());
        }

        let transition = match self.update_incidents(previous, &outcome).await {
            Ok(transition) => transition,
            Err(e) => return self.storage_failed(target_id, WriteStage::IncidentUpdate, &e),
        };

        if let Err(e) = self
            .collaborators
            .targets
            .mark_checked(target_id, outcome.checked_at)
            .await
        {
            return self.storage_failed(target_id, WriteStage::MarkChecked, &e);
        }

        match transition {
            Some(transition) => CheckCompletion::Recorded {
                outcome,
                transition,
            },
            None => CheckCompletion::IncidentSkipped { outcome },
        }
    }

    /// Apply the incident transition. `None` means the target is quarantined.
    async fn update_incidents(
        &self,
        previous: Option<CheckStatus>,
        outcome: &CheckOutcome,
    ) -> Result<Option<Transition>, StoreError> {
        let target_id = outcome.target_id;

        if self.quarantined.contains_key(&target_id) {
            debug!(target_id, "Target quarantined, skipping incident update");
            return Ok(None);
        }

        let result = if self.needs_rederive.contains(&target_id) {
            self.rederive(target_id)
                .await
                .map(|()| transition(previous, outcome))
        } else {
            self.tracker.observe(previous, outcome).await
        };

        match result {
            Ok(change) => {
                if let Some(ref m) = self.metrics {
                    match change {
                        Transition::Open { .. } => m.record_incident("opened"),
                        Transition::Close { .. } => m.record_incident("closed"),
                        Transition::Steady => {}
                    }
                }
                Ok(Some(change))
            }
            Err(TrackerError::Invariant { target_id, reason }) => {
                self.quarantine(target_id, &reason);
                Ok(None)
            }
            Err(TrackerError::Store(e)) => {
                self.needs_rederive.insert(target_id);
                Err(e)
            }
        }
    }

    /// Catch up on incident writes lost to an earlier storage failure
    async fn rederive(&self, target_id: TargetId) -> Result<(), TrackerError> {
        let history = self.collaborators.results.outcome_history(target_id).await?;
        self.tracker.rederive(target_id, &history).await?;
        self.needs_rederive.remove(&target_id);
        Ok(())
    }

    fn quarantine(&self, target_id: TargetId, reason: &str) {
        error!(
            target_id,
            reason,
            "Incident invariant violated, suspending incident processing until reconciled"
        );
        self.quarantined.insert(target_id, reason.to_string());
        self.update_quarantine_gauge();
    }

    fn update_quarantine_gauge(&self) {
        if let Some(ref m) = self.metrics {
            m.set_quarantined(self.quarantined.len());
        }
    }

    fn storage_failed(
        &self,
        target_id: TargetId,
        stage: WriteStage,
        error: &StoreError,
    ) -> CheckCompletion {
        warn!(
            target_id,
            stage = stage.as_str(),
            error = %error,
            "Storage failure, target will be retried next tick"
        );
        self.record_storage_error(stage.as_str());
        CheckCompletion::StorageFailed {
            target_id,
            stage,
            error: error.to_string(),
        }
    }

    fn record_storage_error(&self, operation: &str) {
        if let Some(ref m) = self.metrics {
            m.record_storage_error(operation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use uptime::{IncidentStore, MemoryStore, ProbeOutcome, ResultStore};

    /// Always answers UP instantly
    struct AlwaysUp;

    #[async_trait]
    impl Prober for AlwaysUp {
        async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeOutcome {
            ProbeOutcome {
                checked_at: Utc::now(),
                result: ProbeResult::Up { latency_ms: 1.0 },
            }
        }

        fn name(&self) -> &str {
            "always-up"
        }
    }

    fn scheduler(store: Arc<MemoryStore>) -> Scheduler {
        Scheduler::new(
            SchedulerConfig::default(),
            Collaborators::from_store(store),
            Arc::new(AlwaysUp),
            Some(Arc::new(MetricsRegistry::new())),
        )
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.max_concurrent_probes, 64);
    }

    #[tokio::test]
    async fn test_tick_records_and_marks_checked() {
        let store = Arc::new(MemoryStore::with_targets(vec![Target::new(1, "http://a.test", 60)]));
        let scheduler = scheduler(store.clone());

        let completions = scheduler.tick().await.wait().await;

        assert_eq!(completions.len(), 1);
        let outcome = completions[0].outcome().unwrap().clone();
        assert!(matches!(
            completions[0],
            CheckCompletion::Recorded { transition: Transition::Steady, .. }
        ));
        assert_eq!(store.recent_outcomes(1, 10).await.unwrap(), vec![outcome.clone()]);
        assert_eq!(store.target(1).await.unwrap().last_checked_at, Some(outcome.checked_at));
        assert!(scheduler.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_checked_target_is_not_due_again() {
        let store = Arc::new(MemoryStore::with_targets(vec![Target::new(1, "http://a.test", 60)]));
        let scheduler = scheduler(store);

        scheduler.tick().await.wait().await;
        let report = scheduler.tick().await;

        assert_eq!(report.active, 1);
        assert!(report.dispatched.is_empty());
    }

    #[tokio::test]
    async fn test_quarantined_target_is_still_probed() {
        let at = |s: i64| Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap();
        let store = Arc::new(MemoryStore::with_targets(vec![Target::new(1, "http://a.test", 60)]));
        // An open incident that the UP-only history cannot explain.
        store.append_outcome(&CheckOutcome::up(1, at(0), 1.0)).await.unwrap();
        store.open_incident(1, at(30)).await.unwrap();
        let scheduler = scheduler(store.clone());

        assert!(scheduler.reconcile(1).await.unwrap_err().is_invariant_violation());
        assert!(scheduler.is_quarantined(1));

        let completions = scheduler.tick().await.wait().await;
        assert!(matches!(completions[0], CheckCompletion::IncidentSkipped { .. }));
        assert_eq!(store.outcome_history(1).await.unwrap().len(), 2);
        assert_eq!(scheduler.quarantined().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_abandons_waiting_checks() {
        let store = Arc::new(MemoryStore::with_targets(vec![Target::new(1, "http://a.test", 60)]));
        let scheduler = scheduler(store.clone());

        scheduler.stop();
        let completions = scheduler.tick().await.wait().await;

        assert_eq!(completions, vec![CheckCompletion::Abandoned { target_id: 1 }]);
        assert!(store.target(1).await.unwrap().last_checked_at.is_none());
    }

    #[test]
    fn test_write_stage_labels() {
        assert_eq!(WriteStage::AppendOutcome.as_str(), "append_outcome");
        assert_eq!(WriteStage::MarkChecked.as_str(), "mark_checked");
    }
}
