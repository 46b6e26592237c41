//! Shared fixtures for scheduler integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uptime::{ProbeOutcome, ProbeResult, Prober};
use uptime_server::SchedulerConfig;

/// Fixed point in time used as tick zero
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Clock advanced by hand; probes stamp outcomes with its current value
#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(start)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }

    pub fn advance_secs(&self, secs: i64) -> DateTime<Utc> {
        let mut now = self.0.lock().unwrap();
        *now += ChronoDuration::seconds(secs);
        *now
    }
}

/// One scripted probe answer
#[derive(Debug, Clone)]
pub struct Step {
    delay: Duration,
    result: ProbeResult,
}

impl Step {
    pub fn up() -> Self {
        Self {
            delay: Duration::ZERO,
            result: ProbeResult::Up { latency_ms: 12.5 },
        }
    }

    pub fn down(error: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            result: ProbeResult::Down {
                error: error.to_string(),
            },
        }
    }

    /// Never answers; the probe runs into its timeout
    pub fn hang() -> Self {
        Self::up().after(Duration::from_secs(3600))
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Prober answering from per-URL scripts, `UP` once a script runs out
pub struct ScriptedProber {
    clock: Option<ManualClock>,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self {
            clock: None,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            clock: Some(clock),
            ..Self::new()
        }
    }

    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
    }

    /// URLs probed so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn now(&self) -> DateTime<Utc> {
        match &self.clock {
            Some(clock) => clock.now(),
            None => Utc::now(),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str, timeout_duration: Duration) -> ProbeOutcome {
        self.calls.lock().unwrap().push(url.to_string());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(Step::up);

        let result = if step.delay >= timeout_duration {
            tokio::time::sleep(timeout_duration).await;
            ProbeResult::Down {
                error: "Request timeout".to_string(),
            }
        } else {
            tokio::time::sleep(step.delay).await;
            step.result
        };

        ProbeOutcome {
            checked_at: self.now(),
            result,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Scheduler settings for tests
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_secs(2),
        max_concurrent_probes: 64,
    }
}
