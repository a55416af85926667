//! Sandbox workloads and the orchestrator client boundary.
//!
//! The controller builds a [`SandboxWorkload`] for every desired sandbox and
//! hands it to a [`WorkloadClient`]. Listing returns [`ObservedWorkload`]s,
//! which carry just enough to detect drift: the sandbox id and the spec hash
//! the workload was built from.

mod error;
mod memory;
mod pods;

pub use error::WorkloadError;
pub use memory::InMemoryWorkloadClient;
pub use pods::PodWorkloadClient;

use async_trait::async_trait;
use hydra_id::SandboxId;
use hydra_quota::{CatalogSettings, ResourceAllocation, SandboxRequest};
use hydra_reconcile::{Reconcilable, SpecHash};
use serde::Serialize;

/// Marks workloads owned by this controller.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "open-hydra";

pub const SANDBOX_ID_LABEL: &str = "openhydra.io/sandbox-id";
pub const OWNER_ANNOTATION: &str = "openhydra.io/owner";
pub const SPEC_HASH_ANNOTATION: &str = "openhydra.io/spec-hash";

/// Orchestrator object name for a sandbox.
pub fn workload_name(id: &SandboxId) -> String {
    format!("sandbox-{}", id.dns_label())
}

/// What a sandbox should run, before resources are allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSpec {
    pub sandbox_id: SandboxId,
    pub owner: String,
    pub image: String,
    pub request: SandboxRequest,
}

impl SandboxSpec {
    pub fn workload_name(&self) -> String {
        workload_name(&self.sandbox_id)
    }

    /// Hash of the spec together with the resource settings it will be
    /// allocated under, so a settings change is seen as drift.
    pub fn spec_hash(&self, resources: &CatalogSettings) -> SpecHash {
        SpecHash::from_json(&serde_json::json!({
            "spec": self,
            "resources": resources,
        }))
    }
}

/// A fully resolved workload, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxWorkload {
    pub name: String,
    pub spec: SandboxSpec,
    pub spec_hash: SpecHash,
    pub allocation: ResourceAllocation,
}

/// A workload as listed from the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedWorkload {
    pub name: String,
    /// Absent when the label is missing or unparsable.
    pub sandbox_id: Option<SandboxId>,
    pub spec_hash: Option<SpecHash>,
}

impl From<&SandboxWorkload> for ObservedWorkload {
    fn from(workload: &SandboxWorkload) -> Self {
        Self {
            name: workload.name.clone(),
            sandbox_id: Some(workload.spec.sandbox_id),
            spec_hash: Some(workload.spec_hash.clone()),
        }
    }
}

impl Reconcilable for ObservedWorkload {
    fn key(&self) -> &str {
        &self.name
    }

    fn spec_hash(&self) -> Option<&SpecHash> {
        self.spec_hash.as_ref()
    }
}

/// Orchestrator operations the controller needs.
///
/// Only the leader calls `apply` and `delete`.
#[async_trait]
pub trait WorkloadClient: Send + Sync + 'static {
    /// All workloads managed by this controller.
    async fn list(&self) -> Result<Vec<ObservedWorkload>, WorkloadError>;

    /// Create the workload, or replace it if it was built from another spec.
    async fn apply(&self, workload: &SandboxWorkload) -> Result<(), WorkloadError>;

    /// Returns false when there was nothing to delete.
    async fn delete(&self, name: &str) -> Result<bool, WorkloadError>;
}
