//! # hydra-lease
//!
//! Time-bounded exclusive claims stored in a shared, linearizable store.
//!
//! A [`LeaseRecord`] names the current holder and when its claim lapses.
//! A [`LeaseStore`] replaces that record atomically: the write succeeds when
//! no record exists, when the existing record has expired, or when the caller
//! already holds it (renewal). Every backend routes through the same pure
//! [`decide`] function so acquisition semantics cannot drift between them.
//!
//! ## Backends
//!
//! - [`MemoryLeaseStore`]: a single-process store for tests and dev mode.
//! - [`PgLeaseStore`]: Postgres, using an optimistic `version` column as the
//!   compare-and-swap primitive.

mod clock;
mod error;
mod lock;
mod memory;
mod postgres;
mod record;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::LeaseError;
pub use lock::{LockKey, ResourceLockKind};
pub use memory::MemoryLeaseStore;
pub use postgres::{PgLeaseStore, PgStoreConfig};
pub use record::{decide, Decision, LeaseRecord};
pub use store::{Acquisition, LeaseStore};

/// Default lock record name.
pub const DEFAULT_RESOURCE_NAME: &str = "open-hydra-api-leader-lock";

/// Default lock kind, as spelled in existing deployments.
pub const DEFAULT_RESOURCE_LOCK: ResourceLockKind = ResourceLockKind::EndpointsLeases;

/// Default namespace for the lock record.
pub const DEFAULT_RESOURCE_NAMESPACE: &str = "default";
