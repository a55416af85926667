//! In-process lease store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    decide, Acquisition, Clock, Decision, LeaseError, LeaseRecord, LeaseStore, LockKey,
    SystemClock,
};

/// A lease store backed by a mutex-guarded map of encoded records.
///
/// Linearizable within one process only. Records are kept in their encoded
/// form so decoding failures surface exactly as they would from a remote
/// store.
pub struct MemoryLeaseStore {
    entries: Mutex<HashMap<String, String>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Overwrite the raw stored value for a store key.
    ///
    /// Used to seed records written by another deployment.
    pub fn put_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock_entries().insert(key.into(), value.into());
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(
        entries: &HashMap<String, String>,
        lock: &LockKey,
    ) -> Result<Option<LeaseRecord>, LeaseError> {
        let keys = lock.store_keys();
        let stored: Vec<(String, String)> = keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        LeaseRecord::decode_first(&keys, &stored)
    }

    fn write(
        entries: &mut HashMap<String, String>,
        lock: &LockKey,
        record: &LeaseRecord,
    ) -> Result<(), LeaseError> {
        let encoded = record.encode()?;
        for key in lock.store_keys() {
            entries.insert(key, encoded.clone());
        }
        Ok(())
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire_or_renew(
        &self,
        lock: &LockKey,
        identity: &str,
        duration: Duration,
    ) -> Result<Acquisition, LeaseError> {
        let mut entries = self.lock_entries();
        let existing = Self::read(&entries, lock)?;
        let decision = decide(existing.as_ref(), identity, duration, self.clock.now());

        if let Some(record) = decision.to_write() {
            Self::write(&mut entries, lock, record)?;
        }

        let acquired = !matches!(decision, Decision::Held(_));
        debug!(lock = %lock, identity, acquired, "Memory lease store write");

        Ok(Acquisition {
            record: decision.into_record(),
            acquired,
        })
    }

    async fn get(&self, lock: &LockKey) -> Result<Option<LeaseRecord>, LeaseError> {
        Self::read(&self.lock_entries(), lock)
    }

    async fn release(&self, lock: &LockKey, identity: &str) -> Result<bool, LeaseError> {
        let mut entries = self.lock_entries();
        match Self::read(&entries, lock)? {
            Some(record) if record.is_held_by(identity) => {
                let released = record.released_at(self.clock.now());
                Self::write(&mut entries, lock, &released)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
