use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use hydra_id::SandboxId;
use tokio::sync::mpsc;

use super::{DesiredListing, DesiredSandbox, DesiredState, InvalidSandbox, Rejection};
use crate::db::DbError;

/// Desired state held in process, for dev mode and tests.
///
/// Writes notify the controller the same way database triggers do.
#[derive(Debug, Default)]
pub struct InMemoryDesiredState {
    sandboxes: Mutex<BTreeMap<SandboxId, DesiredSandbox>>,
    rejections: Mutex<BTreeMap<SandboxId, Rejection>>,
    invalid: Mutex<BTreeMap<String, String>>,
    notify: Option<mpsc::Sender<SandboxId>>,
}

impl InMemoryDesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notifications(notify: mpsc::Sender<SandboxId>) -> Self {
        Self {
            notify: Some(notify),
            ..Self::default()
        }
    }

    pub fn upsert(&self, sandbox: DesiredSandbox) {
        let id = sandbox.id;
        lock(&self.sandboxes).insert(id, sandbox);
        self.notify(id);
    }

    pub fn remove(&self, id: &SandboxId) -> Option<DesiredSandbox> {
        let removed = lock(&self.sandboxes).remove(id);
        if removed.is_some() {
            self.notify(*id);
        }
        removed
    }

    /// Store a request that cannot be turned into a sandbox, the way a
    /// malformed row would sit in the database.
    pub fn insert_invalid(&self, id: impl Into<String>, reason: impl Into<String>) {
        let id = id.into();
        let parsed = SandboxId::parse(&id).ok();
        lock(&self.invalid).insert(id, reason.into());
        if let Some(parsed) = parsed {
            lock(&self.sandboxes).remove(&parsed);
            self.notify(parsed);
        }
    }

    pub fn rejection(&self, id: &SandboxId) -> Option<Rejection> {
        lock(&self.rejections).get(id).cloned()
    }

    fn notify(&self, id: SandboxId) {
        if let Some(tx) = &self.notify {
            // A full channel is fine; the next resync covers it.
            let _ = tx.try_send(id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DesiredState for InMemoryDesiredState {
    async fn list(&self) -> Result<DesiredListing, DbError> {
        let sandboxes = lock(&self.sandboxes).values().cloned().collect();
        let invalid = lock(&self.invalid)
            .iter()
            .map(|(id, reason)| InvalidSandbox {
                id: id.clone(),
                reason: reason.clone(),
            })
            .collect();
        Ok(DesiredListing { sandboxes, invalid })
    }

    async fn get(&self, id: &SandboxId) -> Result<Option<DesiredSandbox>, DbError> {
        if let Some(reason) = lock(&self.invalid).get(&id.to_string()) {
            return Err(DbError::InvalidRow {
                id: id.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(lock(&self.sandboxes).get(id).cloned())
    }

    async fn report_rejection(
        &self,
        id: &SandboxId,
        rejection: &Rejection,
    ) -> Result<(), DbError> {
        lock(&self.rejections).insert(*id, rejection.clone());
        Ok(())
    }
}
