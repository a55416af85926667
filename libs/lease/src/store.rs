//! The lease store contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::{LeaseError, LeaseRecord, LockKey};

/// Result of [`LeaseStore::try_acquire_or_renew`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// The record now stored: ours when `acquired`, otherwise the live
    /// holder's.
    pub record: LeaseRecord,
    pub acquired: bool,
}

/// A linearizable store holding lock records.
///
/// Implementations must perform [`try_acquire_or_renew`] as a single
/// conditional write so that, for one lock, at most one identity can observe
/// `acquired == true` while a record is valid.
///
/// [`try_acquire_or_renew`]: LeaseStore::try_acquire_or_renew
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Take or refresh the lease for `identity`.
    ///
    /// Returns `acquired == false` (not an error) when another identity holds
    /// a live lease.
    async fn try_acquire_or_renew(
        &self,
        lock: &LockKey,
        identity: &str,
        duration: Duration,
    ) -> Result<Acquisition, LeaseError>;

    /// Read the current record without writing.
    async fn get(&self, lock: &LockKey) -> Result<Option<LeaseRecord>, LeaseError>;

    /// Give up the lease if `identity` holds it. Returns whether anything
    /// was released.
    async fn release(&self, lock: &LockKey, identity: &str) -> Result<bool, LeaseError>;
}
