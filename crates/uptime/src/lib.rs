//! Uptime monitoring core.
//!
//! This crate holds everything the monitoring scheduler needs apart from the
//! scheduling loop itself:
//! - HTTP probing (`prober`)
//! - incident detection from the outcome stream (`incident`)
//! - damped display status and availability summaries (`status`)
//! - storage collaborator traits and backends (`store`)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use uptime::{HttpProber, Prober};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let prober = HttpProber::new()?;
//! let outcome = prober
//!     .probe("https://example.com", Duration::from_secs(10))
//!     .await
//!     .for_target(1);
//!
//! println!("{} at {}", outcome.status(), outcome.checked_at);
//! # Ok(())
//! # }
//! ```

pub mod incident;
pub mod prober;
pub mod status;
pub mod store;
pub mod types;

pub use incident::{IncidentTracker, RederiveReport, TrackerError, Transition};
pub use prober::{HttpProber, ProbeError, Prober};
pub use status::{DisplayStatus, StatusAggregator, UptimeSummary};
pub use store::{
    Collaborators, IncidentStore, MemoryStore, ResultStore, SqliteStore, Storage, StoreError,
    TargetStore,
};
pub use types::{
    CheckOutcome, CheckStatus, Incident, OutcomeCounts, ProbeOutcome, ProbeResult, Target,
    TargetId,
};
