//! The election driver.

use std::sync::Arc;

use hydra_lease::{Acquisition, LeaseError, LeaseStore};
use tokio::sync::watch;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    ElectionConfig, ElectionError, ElectionHandle, ElectionState, LeaderCallbacks, Transition,
};

/// Why a leadership term ended.
enum TermEnd {
    Lost,
    Shutdown,
    Fatal(LeaseError),
}

/// Outcome of one store call bounded by a deadline.
enum Attempt {
    Done(Acquisition),
    TimedOut,
    Failed(LeaseError),
}

/// Runs the acquire/renew cycle for one replica.
///
/// The elector is the only writer of [`ElectionState`]; it publishes every
/// change through a watch channel read by [`ElectionHandle`]s.
pub struct LeaderElector {
    store: Arc<dyn LeaseStore>,
    config: ElectionConfig,
    callbacks: Arc<dyn LeaderCallbacks>,
    state: watch::Sender<ElectionState>,
    observed_holder: Option<String>,
    terms: u64,
}

impl LeaderElector {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        config: ElectionConfig,
        callbacks: Arc<dyn LeaderCallbacks>,
    ) -> Result<Self, ElectionError> {
        config.validate()?;
        let (state, _) = watch::channel(ElectionState::Candidate);

        Ok(Self {
            store,
            config,
            callbacks,
            state,
            observed_holder: None,
            terms: 0,
        })
    }

    pub fn handle(&self) -> ElectionHandle {
        ElectionHandle::new(self.config.identity.clone(), self.state.subscribe())
    }

    /// Run the election until shutdown or a fatal store error.
    ///
    /// A fatal error is returned only after leadership has been given up.
    #[instrument(skip_all, name = "leader_election", fields(identity = %self.config.identity, lock = %self.config.lock))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ElectionError> {
        let timing = self.config.timing;
        info!(
            lease_duration_secs = timing.lease_duration.as_secs(),
            renew_deadline_secs = timing.renew_deadline.as_secs(),
            retry_period_secs = timing.retry_period.as_secs(),
            "Starting leader election"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            match self.attempt(started).await {
                Attempt::Done(acquisition) if acquisition.acquired => {
                    self.observe(&acquisition.record.holder_identity);
                    self.apply(
                        self.current()
                            .acquired(started + timing.renew_deadline, self.terms + 1),
                    );

                    let end = self.lead(&mut shutdown).await;
                    self.step_down(None);

                    match end {
                        TermEnd::Lost => {}
                        TermEnd::Shutdown => {
                            self.release().await;
                            break;
                        }
                        TermEnd::Fatal(e) => {
                            error!(error = %e, kind = e.kind(), "Lease store failure, abandoning election");
                            return Err(e.into());
                        }
                    }
                }
                Attempt::Done(acquisition) => {
                    let holder = acquisition.record.holder_identity;
                    debug!(holder = %holder, "Lease held by another replica");
                    self.observe(&holder);
                    self.step_down(Some(holder));
                }
                Attempt::TimedOut => {
                    warn!("Acquisition attempt did not complete before the renew deadline");
                    self.step_down(None);
                }
                Attempt::Failed(e) if e.is_fatal() => {
                    error!(error = %e, kind = e.kind(), "Lease store failure, abandoning election");
                    return Err(e.into());
                }
                Attempt::Failed(e) => {
                    warn!(error = %e, kind = e.kind(), "Acquisition attempt failed, will retry");
                    self.step_down(None);
                }
            }

            tokio::select! {
                _ = sleep(timing.retry_period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Leader election stopped");
        Ok(())
    }

    /// Keep renewing until a renewal fails, times out, or shutdown.
    async fn lead(&mut self, shutdown: &mut watch::Receiver<bool>) -> TermEnd {
        let timing = self.config.timing;

        loop {
            tokio::select! {
                _ = sleep(timing.retry_period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return TermEnd::Shutdown;
                    }
                    continue;
                }
            }

            let started = Instant::now();
            match self.attempt(started).await {
                Attempt::Done(acquisition) if acquisition.acquired => {
                    self.apply(
                        self.current()
                            .acquired(started + timing.renew_deadline, self.terms + 1),
                    );
                    debug!("Lease renewed");
                }
                Attempt::Done(acquisition) => {
                    warn!(
                        holder = %acquisition.record.holder_identity,
                        "Lease taken by another replica"
                    );
                    self.observe(&acquisition.record.holder_identity);
                    return TermEnd::Lost;
                }
                Attempt::TimedOut => {
                    warn!("Lease renewal did not complete before the renew deadline");
                    return TermEnd::Lost;
                }
                Attempt::Failed(e) if e.is_fatal() => return TermEnd::Fatal(e),
                Attempt::Failed(e) => {
                    warn!(error = %e, kind = e.kind(), "Lease renewal failed");
                    return TermEnd::Lost;
                }
            }
        }
    }

    /// One store call, abandoned when it cannot finish before the deadline
    /// that a success would have granted.
    async fn attempt(&self, started: Instant) -> Attempt {
        let deadline = match self.current() {
            ElectionState::Leader { renew_by, .. } => renew_by,
            _ => started + self.config.timing.renew_deadline,
        };

        let call = self.store.try_acquire_or_renew(
            &self.config.lock,
            &self.config.identity,
            self.config.timing.lease_duration,
        );

        match timeout_at(deadline, call).await {
            Ok(Ok(acquisition)) => Attempt::Done(acquisition),
            Ok(Err(e)) => Attempt::Failed(e),
            Err(_) => Attempt::TimedOut,
        }
    }

    async fn release(&self) {
        if !self.config.release_on_cancel {
            return;
        }

        let deadline = Instant::now() + self.config.timing.renew_deadline;
        let call = self
            .store
            .release(&self.config.lock, &self.config.identity);

        match timeout_at(deadline, call).await {
            Ok(Ok(true)) => info!("Lease released"),
            Ok(Ok(false)) => debug!("Lease was no longer ours to release"),
            Ok(Err(e)) => warn!(error = %e, "Failed to release lease"),
            Err(_) => warn!("Lease release timed out"),
        }
    }

    fn step_down(&mut self, holder: Option<String>) {
        let next = self.current().lost(holder);
        self.apply(next);
    }

    fn current(&self) -> ElectionState {
        self.state.borrow().clone()
    }

    /// Publish the new state, then fire the transition hook.
    fn apply(&mut self, (next, transition): (ElectionState, Transition)) {
        let to = next.name();
        let mut from = None;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            from = Some(std::mem::replace(current, next).name());
            true
        });

        if let (Some(from), true) = (from, transition != Transition::None) {
            info!(from, to, "Election state changed");
        }

        match transition {
            Transition::StartedLeading => {
                self.terms += 1;
                self.callbacks.on_started_leading();
            }
            Transition::StoppedLeading => self.callbacks.on_stopped_leading(),
            Transition::None => {}
        }
    }

    fn observe(&mut self, holder: &str) {
        if self.observed_holder.as_deref() != Some(holder) {
            self.observed_holder = Some(holder.to_string());
            self.callbacks.on_new_leader(holder);
        }
    }
}
