//! The sandbox control loop.
//!
//! The controller converges orchestrator workloads to the desired sandboxes.
//! It runs on every replica but only writes while this replica leads:
//! - leadership is checked before every write, and losing it aborts a pass
//! - each newly gained term starts with a full resync, covering whatever
//!   changed while another replica (or none) was leading
//! - between resyncs, change notifications trigger targeted passes

mod reconciler;
mod worker;

pub use reconciler::{ControllerError, Pass, ReconcileStats, SandboxReconciler};
pub use worker::{ControllerWorker, WorkerConfig};
