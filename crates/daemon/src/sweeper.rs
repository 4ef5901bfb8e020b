//! Background sweepers
//!
//! The promoter starts waiting test cases once adapters are available and the
//! reaper removes or fails adapters that stopped talking to us. Both tick on
//! the configured interval until cancelled.

use crate::state::{Orchestrator, ReapOutcome};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often completion is checked when exiting once all test cases finish
const COMPLETION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the promoter and reaper loops against one orchestrator
#[derive(Clone)]
pub struct Sweeper {
    orchestrator: Orchestrator,
    cancel: CancellationToken,
}

impl Sweeper {
    pub fn new(orchestrator: Orchestrator, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            cancel,
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.orchestrator.config().sweeper.interval_secs)
    }

    /// Start at most one waiting test case
    pub fn promote_once(&self) -> Option<String> {
        let promoted = self.orchestrator.promote_next();
        if promoted.is_none() {
            debug!("No test case could be started this tick");
        }
        promoted
    }

    /// Remove idle adapters and fail unresponsive ones, as of `now`
    pub fn reap_once(&self, now: DateTime<Utc>) -> ReapOutcome {
        let outcome = self.orchestrator.reap(now);
        if !outcome.removed.is_empty() || !outcome.timed_out.is_empty() {
            info!(
                "Reaped {} idle adapters, timed out {}",
                outcome.removed.len(),
                outcome.timed_out.len()
            );
        }
        outcome
    }

    /// Run the promoter until cancelled. New registrations trigger an early tick.
    pub async fn run_promoter(&self) {
        info!("Promoter started");
        loop {
            self.promote_once();

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval()) => {}
                _ = self.orchestrator.registered() => debug!("Woken by a new registration"),
            }
        }
        info!("Promoter stopped");
    }

    /// Run the reaper until cancelled
    pub async fn run_reaper(&self) {
        info!("Reaper started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval()) => {}
            }

            self.reap_once(Utc::now());
        }
        info!("Reaper stopped");
    }

    /// Cancel the sweepers once every test case is terminal
    pub async fn watch_completion(&self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(COMPLETION_CHECK_INTERVAL) => {}
            }

            if self.orchestrator.all_finished() {
                warn!("All test cases have finished, shutting down");
                self.cancel.cancel();
                return;
            }
        }
    }
}
