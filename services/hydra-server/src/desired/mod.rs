//! Desired sandboxes and the store that holds them.
//!
//! The API layer writes sandbox requests; the controller only reads them and
//! reports back requests it had to reject.

mod memory;
mod postgres;

pub use memory::InMemoryDesiredState;
pub use postgres::{spawn_notification_forwarder, PgDesiredState, NOTIFY_CHANNEL};

use async_trait::async_trait;
use hydra_id::SandboxId;
use hydra_quota::{ErrorClass, SandboxRequest};

use crate::db::DbError;

/// One sandbox a user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSandbox {
    pub id: SandboxId,
    pub owner: String,
    pub request: SandboxRequest,
    /// Overrides the configured default image.
    pub image: Option<String>,
}

/// A stored request that does not describe a valid sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSandbox {
    /// The stored id, which may itself be the malformed part.
    pub id: String,
    pub reason: String,
}

/// Everything currently desired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredListing {
    pub sandboxes: Vec<DesiredSandbox>,
    /// Skipped requests; they do not stop the rest from being reconciled.
    pub invalid: Vec<InvalidSandbox>,
}

/// Why a sandbox could not be provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub class: ErrorClass,
    pub reason: String,
}

#[async_trait]
pub trait DesiredState: Send + Sync + 'static {
    async fn list(&self) -> Result<DesiredListing, DbError>;

    /// Fails with [`DbError::InvalidRow`] when the stored request is
    /// malformed.
    async fn get(&self, id: &SandboxId) -> Result<Option<DesiredSandbox>, DbError>;

    /// Surface a rejection to whoever submitted the sandbox.
    async fn report_rejection(&self, id: &SandboxId, rejection: &Rejection)
        -> Result<(), DbError>;
}
