//! # hydra-id
//!
//! Typed identifiers for sandboxes and control-plane replicas.
//!
//! IDs render as `{prefix}_{ulid}`, e.g. `sbx_01HV4Z2WQXKJNM8GPQY6VBKC3D`.
//! The prefix keeps a sandbox ID from being mistaken for a replica identity
//! in logs and lease records; the ULID keeps them sortable by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Raw ULIDs, for building IDs from stored values.
pub use ulid::Ulid;
