//! One reconciliation pass.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use hydra_election::ElectionHandle;
use hydra_id::SandboxId;
use hydra_quota::{AllocatableUsage, ErrorClass, QuotaCalculator};
use hydra_reconcile::{
    classify, Reconcilable, ReconcileError, RetryTracker, SpecHash, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_WINDOW,
};
use tracing::{debug, error, info, instrument, warn};

use crate::db::DbError;
use crate::desired::{DesiredListing, DesiredSandbox, DesiredState, InvalidSandbox, Rejection};
use crate::workload::{
    workload_name, ObservedWorkload, SandboxSpec, SandboxWorkload, WorkloadClient, WorkloadError,
};

/// Errors that end a pass early.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Leadership could not be confirmed before a write.
    #[error("not the leader")]
    NotLeader,

    #[error("desired state: {0}")]
    DesiredState(#[from] DbError),

    #[error("workloads: {0}")]
    Workload(#[from] WorkloadError),

    #[error("plan: {0}")]
    Plan(#[from] ReconcileError),
}

impl ControllerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotLeader | Self::Plan(_) => false,
            Self::DesiredState(e) => e.is_retryable(),
            Self::Workload(e) => e.is_retryable(),
        }
    }
}

/// Which sandboxes a pass looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pass {
    /// Everything desired against everything running, deleting orphans.
    FullResync,
    /// Only these sandboxes.
    Changed(Vec<SandboxId>),
}

impl Pass {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FullResync => "full_resync",
            Self::Changed(_) => "changed",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    /// Reported back as configuration or exhaustion errors.
    pub rejected: usize,
    /// Transient failures; worth another pass.
    pub failed: usize,
    /// Skipped after repeated transient failures.
    pub skipped: usize,
}

impl ReconcileStats {
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// A desired sandbox resolved to its workload name and spec hash.
#[derive(Debug)]
struct Planned {
    name: String,
    spec: SandboxSpec,
    spec_hash: SpecHash,
}

impl Reconcilable for Planned {
    fn key(&self) -> &str {
        &self.name
    }

    fn spec_hash(&self) -> Option<&SpecHash> {
        Some(&self.spec_hash)
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
    Create,
    Update,
}

/// Converges workloads to desired sandboxes.
pub struct SandboxReconciler {
    desired: Arc<dyn DesiredState>,
    workloads: Arc<dyn WorkloadClient>,
    calculator: QuotaCalculator,
    election: ElectionHandle,
    default_image: String,
    retries: RetryTracker,
}

impl SandboxReconciler {
    pub fn new(
        desired: Arc<dyn DesiredState>,
        workloads: Arc<dyn WorkloadClient>,
        calculator: QuotaCalculator,
        election: ElectionHandle,
        default_image: impl Into<String>,
    ) -> Self {
        Self {
            desired,
            workloads,
            calculator,
            election,
            default_image: default_image.into(),
            retries: RetryTracker::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_WINDOW),
        }
    }

    /// Stop retrying a sandbox after `max_retries` transient failures within
    /// `window`, until the window passes.
    pub fn with_retry_limit(mut self, max_retries: u32, window: Duration) -> Self {
        self.retries = RetryTracker::new(max_retries, window);
        self
    }

    /// Run one pass. Deletes go first so freed slots count toward creates.
    #[instrument(skip_all, fields(pass = pass.name()))]
    pub async fn reconcile(&mut self, pass: Pass) -> Result<ReconcileStats, ControllerError> {
        self.ensure_leader()?;
        self.retries.prune();

        let observed = self.workloads.list().await?;
        let mut running = observed.len() as u64;

        let (listing, observed) = match pass {
            Pass::FullResync => (self.desired.list().await?, observed),
            Pass::Changed(ids) => self.changed_subset(ids, observed).await?,
        };

        let mut stats = ReconcileStats::default();

        // Workloads of malformed requests are left alone, not treated as orphans.
        let held = self.reject_invalid(listing.invalid, &mut stats).await?;
        let observed: Vec<ObservedWorkload> = observed
            .into_iter()
            .filter(|w| !held.contains(&w.name))
            .collect();

        let planned: Vec<Planned> = listing
            .sandboxes
            .into_iter()
            .map(|s| self.plan(s))
            .collect();
        let plan = classify(planned, observed)?;
        debug!(
            create = plan.create.len(),
            update = plan.update.len(),
            delete = plan.delete.len(),
            unchanged = plan.unchanged.len(),
            "Planned pass"
        );

        stats.unchanged = plan.unchanged.len();

        for orphan in plan.delete {
            self.ensure_leader()?;
            match self.workloads.delete(&orphan.name).await {
                Ok(deleted) => {
                    if deleted {
                        info!(name = %orphan.name, "Deleted orphaned workload");
                        stats.deleted += 1;
                    }
                    running = running.saturating_sub(1);
                }
                Err(e) => {
                    warn!(name = %orphan.name, error = %e, "Failed to delete workload");
                    stats.failed += 1;
                }
            }
        }

        for (want, _) in plan.update {
            // A replacement does not add to the running count.
            let usage = AllocatableUsage {
                pod_count: running.saturating_sub(1),
            };
            self.write(want, usage, WriteKind::Update, &mut stats)
                .await?;
        }

        for want in plan.create {
            let usage = AllocatableUsage { pod_count: running };
            if self
                .write(want, usage, WriteKind::Create, &mut stats)
                .await?
            {
                running += 1;
            }
        }

        Ok(stats)
    }

    async fn changed_subset(
        &self,
        ids: Vec<SandboxId>,
        observed: Vec<ObservedWorkload>,
    ) -> Result<(DesiredListing, Vec<ObservedWorkload>), ControllerError> {
        let ids: BTreeSet<SandboxId> = ids.into_iter().collect();
        let names: BTreeSet<String> = ids.iter().map(workload_name).collect();

        let mut listing = DesiredListing::default();
        for id in &ids {
            match self.desired.get(id).await {
                Ok(Some(sandbox)) => listing.sandboxes.push(sandbox),
                Ok(None) => {}
                Err(DbError::InvalidRow { id, reason }) => {
                    listing.invalid.push(InvalidSandbox { id, reason });
                }
                Err(e) => return Err(e.into()),
            }
        }

        let observed = observed
            .into_iter()
            .filter(|w| names.contains(&w.name))
            .collect();
        Ok((listing, observed))
    }

    /// Report requests that could not be read as configuration errors.
    ///
    /// Returns the workload names of those that carry a usable id.
    async fn reject_invalid(
        &self,
        invalid: Vec<InvalidSandbox>,
        stats: &mut ReconcileStats,
    ) -> Result<BTreeSet<String>, ControllerError> {
        let mut held = BTreeSet::new();
        for entry in invalid {
            match SandboxId::parse(&entry.id) {
                Ok(id) => {
                    held.insert(workload_name(&id));
                    let rejection = Rejection {
                        class: ErrorClass::Configuration,
                        reason: entry.reason,
                    };
                    self.reject(id, rejection, stats).await?;
                }
                Err(e) => {
                    warn!(
                        sandbox_id = %entry.id,
                        reason = %entry.reason,
                        error = %e,
                        "Ignoring sandbox request with an unreadable id"
                    );
                }
            }
        }
        Ok(held)
    }

    fn plan(&self, sandbox: DesiredSandbox) -> Planned {
        let spec = SandboxSpec {
            image: sandbox
                .image
                .unwrap_or_else(|| self.default_image.clone()),
            sandbox_id: sandbox.id,
            owner: sandbox.owner,
            request: sandbox.request,
        };
        Planned {
            name: spec.workload_name(),
            spec_hash: spec.spec_hash(self.calculator.catalog().settings()),
            spec,
        }
    }

    /// Allocate and apply one workload. Returns whether it was written.
    async fn write(
        &mut self,
        planned: Planned,
        usage: AllocatableUsage,
        kind: WriteKind,
        stats: &mut ReconcileStats,
    ) -> Result<bool, ControllerError> {
        let id = planned.spec.sandbox_id;
        if self.retries.is_exhausted(&planned.name) {
            debug!(sandbox_id = %id, "Retries exhausted, skipping until the window passes");
            stats.skipped += 1;
            return Ok(false);
        }

        let allocation = match self.calculator.allocate(&planned.spec.request, &usage) {
            Ok(allocation) => allocation,
            Err(e) => {
                let rejection = Rejection {
                    class: e.class(),
                    reason: e.to_string(),
                };
                self.reject(id, rejection, stats).await?;
                return Ok(false);
            }
        };

        let workload = SandboxWorkload {
            name: planned.name,
            spec: planned.spec,
            spec_hash: planned.spec_hash,
            allocation,
        };

        self.ensure_leader()?;
        match self.workloads.apply(&workload).await {
            Ok(()) => {
                self.retries.clear(&workload.name);
                match kind {
                    WriteKind::Create => {
                        info!(sandbox_id = %id, name = %workload.name, "Created workload");
                        stats.created += 1;
                    }
                    WriteKind::Update => {
                        info!(sandbox_id = %id, name = %workload.name, "Replaced drifted workload");
                        stats.updated += 1;
                    }
                }
                Ok(true)
            }
            Err(e) if e.is_retryable() => {
                stats.failed += 1;
                if self.retries.record_failure(&workload.name) {
                    error!(
                        sandbox_id = %id,
                        attempts = self.retries.attempts(&workload.name),
                        error = %e,
                        "Giving up on workload for now"
                    );
                } else {
                    warn!(sandbox_id = %id, error = %e, "Failed to apply workload, will retry");
                }
                Ok(false)
            }
            Err(e) => {
                let rejection = Rejection {
                    class: ErrorClass::Configuration,
                    reason: e.to_string(),
                };
                self.reject(id, rejection, stats).await?;
                Ok(false)
            }
        }
    }

    async fn reject(
        &self,
        id: SandboxId,
        rejection: Rejection,
        stats: &mut ReconcileStats,
    ) -> Result<(), ControllerError> {
        warn!(
            sandbox_id = %id,
            class = rejection.class.as_str(),
            reason = %rejection.reason,
            "Rejected sandbox"
        );
        stats.rejected += 1;

        self.ensure_leader()?;
        if let Err(e) = self.desired.report_rejection(&id, &rejection).await {
            warn!(sandbox_id = %id, error = %e, "Failed to report rejection");
        }
        Ok(())
    }

    fn ensure_leader(&self) -> Result<(), ControllerError> {
        if self.election.is_leader() {
            Ok(())
        } else {
            Err(ControllerError::NotLeader)
        }
    }
}
