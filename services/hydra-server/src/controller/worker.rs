//! Controller background worker.
//!
//! Drives [`SandboxReconciler`] from a resync timer, change notifications and
//! election changes, and only while this replica leads.

use std::time::Duration;

use hydra_election::ElectionHandle;
use hydra_id::SandboxId;
use hydra_reconcile::Backoff;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::{ControllerError, Pass, SandboxReconciler};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between full resyncs while leading.
    pub resync_period: Duration,

    /// Retry delay after a transient failure; its maximum should not exceed
    /// the election retry period.
    pub backoff: Backoff,

    /// Most notifications folded into one pass.
    pub max_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(30 * 60),
            backoff: Backoff::default(),
            max_batch: 256,
        }
    }
}

pub struct ControllerWorker {
    reconciler: SandboxReconciler,
    election: ElectionHandle,
    notifications: mpsc::Receiver<SandboxId>,
    config: WorkerConfig,
    last_term: Option<u64>,
    failures: u32,
    retry_at: Option<Instant>,
}

impl ControllerWorker {
    pub fn new(
        reconciler: SandboxReconciler,
        election: ElectionHandle,
        notifications: mpsc::Receiver<SandboxId>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            reconciler,
            election,
            notifications,
            config,
            last_term: None,
            failures: 0,
            retry_at: None,
        }
    }

    /// Run until shutdown is signaled.
    #[instrument(skip_all, name = "controller_worker", fields(identity = %self.election.identity()))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            resync_period_secs = self.config.resync_period.as_secs(),
            "Starting controller worker"
        );

        let mut resync = tokio::time::interval(self.config.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the leadership check covers
        // the initial resync.
        resync.tick().await;

        let mut election_running = true;

        loop {
            self.observe_leadership().await;

            let retry_at = self.retry_at;
            tokio::select! {
                _ = resync.tick() => {
                    self.run_pass(Pass::FullResync).await;
                }
                Some(first) = self.notifications.recv() => {
                    let ids = self.drain_notifications(first);
                    self.run_pass(Pass::Changed(ids)).await;
                }
                changed = self.election.changed(), if election_running => {
                    if !changed {
                        warn!("Leader election has stopped, no further passes will run");
                        election_running = false;
                    }
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.run_pass(Pass::FullResync).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Controller worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// A newly gained term starts with a full resync.
    async fn observe_leadership(&mut self) {
        let term = self.election.leader_term();
        if term == self.last_term {
            return;
        }
        self.last_term = term;

        match term {
            Some(term) => {
                info!(term, "Leadership gained, running full resync");
                self.failures = 0;
                self.retry_at = None;
                self.run_pass(Pass::FullResync).await;
            }
            None => info!("Not leading, mutating work paused"),
        }
    }

    fn drain_notifications(&mut self, first: SandboxId) -> Vec<SandboxId> {
        let mut ids = vec![first];
        while ids.len() < self.config.max_batch {
            match self.notifications.try_recv() {
                Ok(id) => ids.push(id),
                Err(_) => break,
            }
        }
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    async fn run_pass(&mut self, pass: Pass) {
        let name = pass.name();
        if !self.election.is_leader() {
            debug!(pass = name, "Not leading, skipping pass");
            return;
        }

        match self.reconciler.reconcile(pass).await {
            Ok(stats) if stats.failed > 0 => {
                warn!(
                    pass = name,
                    failed = stats.failed,
                    writes = stats.writes(),
                    "Pass finished with transient failures"
                );
                self.schedule_retry();
            }
            Ok(stats) => {
                self.failures = 0;
                self.retry_at = None;
                if stats.writes() > 0 || stats.rejected > 0 {
                    info!(
                        pass = name,
                        created = stats.created,
                        updated = stats.updated,
                        deleted = stats.deleted,
                        rejected = stats.rejected,
                        unchanged = stats.unchanged,
                        "Reconciliation pass complete"
                    );
                } else {
                    debug!(pass = name, unchanged = stats.unchanged, "Nothing to do");
                }
            }
            Err(ControllerError::NotLeader) => {
                info!(pass = name, "Leadership lost during pass, aborted");
            }
            Err(e) if e.is_retryable() => {
                warn!(pass = name, error = %e, "Pass failed, will retry");
                self.schedule_retry();
            }
            Err(e) => {
                error!(pass = name, error = %e, "Pass failed");
            }
        }
    }

    fn schedule_retry(&mut self) {
        let delay = self.config.backoff.delay(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.retry_at = Some(Instant::now() + delay);
        debug!(delay_ms = delay.as_millis() as u64, "Scheduled retry");
    }
}
