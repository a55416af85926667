//! Resource allocation policy for sandboxes.
//!
//! A [`ResourceCatalog`] is built once from [`CatalogSettings`] and shared
//! read-only. [`QuotaCalculator::allocate`] turns a [`SandboxRequest`] plus a
//! usage snapshot into a [`ResourceAllocation`]:
//!
//! - requests are the nominal amount divided by the over-commit rate,
//!   floored, never below one unit
//! - limits are always the nominal amount
//! - GPUs are never over-committed
//! - the allocatable pod ceiling is checked before anything else
//!
//! The calculator is a pure function of its inputs. Serializing concurrent
//! allocations against the real usage counter is the caller's job.

mod calculator;
mod catalog;
mod error;
mod types;

pub use calculator::QuotaCalculator;
pub use catalog::{CatalogSettings, ResourceCatalog};
pub use error::{ErrorClass, QuotaError};
pub use types::{
    AllocatableSummary, AllocatableUsage, DeviceKind, GpuAllocation, ResourceAllocation,
    ResourcePair, SandboxRequest,
};

/// Orchestrator resource name for CPU.
pub const CPU_RESOURCE: &str = "cpu";

/// Orchestrator resource name for memory.
pub const MEMORY_RESOURCE: &str = "memory";
