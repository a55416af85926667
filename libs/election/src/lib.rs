//! # hydra-election
//!
//! Leader election over a [`LeaseStore`](hydra_lease::LeaseStore).
//!
//! One [`LeaderElector`] task per replica drives the protocol; any number of
//! [`ElectionHandle`]s read the published [`ElectionState`].
//!
//! ## Safety
//!
//! `retry_period < renew_deadline < lease_duration`. A leader that cannot
//! renew within `renew_deadline` stops believing it leads, which happens
//! before any other replica can see the lease as expired. The deadline is
//! carried inside [`ElectionState::Leader`], so [`ElectionHandle::is_leader`]
//! turns false at the deadline even if the elector task itself is stalled.

mod callbacks;
mod config;
mod elector;
mod error;
mod handle;
mod state;

pub use callbacks::{LeaderCallbacks, TracingCallbacks};
pub use config::{ElectionConfig, ElectionTiming};
pub use elector::LeaderElector;
pub use error::ElectionError;
pub use handle::ElectionHandle;
pub use state::{ElectionState, Transition};
