use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ObservedWorkload, SandboxWorkload, WorkloadClient, WorkloadError};

/// Single-process workload client for dev mode and tests.
#[derive(Debug, Default)]
pub struct InMemoryWorkloadClient {
    workloads: Mutex<BTreeMap<String, SandboxWorkload>>,
    failures: Mutex<VecDeque<WorkloadError>>,
    writes: Mutex<u64>,
}

impl InMemoryWorkloadClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write fail with `error`. Queued errors are used in order.
    pub fn fail_next_write(&self, error: WorkloadError) {
        lock(&self.failures).push_back(error);
    }

    /// Place a workload directly, bypassing write accounting.
    pub fn insert(&self, workload: SandboxWorkload) {
        lock(&self.workloads).insert(workload.name.clone(), workload);
    }

    pub fn get(&self, name: &str) -> Option<SandboxWorkload> {
        lock(&self.workloads).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.workloads).keys().cloned().collect()
    }

    /// Successful applies and deletes so far.
    pub fn write_count(&self) -> u64 {
        *lock(&self.writes)
    }

    fn begin_write(&self) -> Result<(), WorkloadError> {
        match lock(&self.failures).pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn count_write(&self) {
        *lock(&self.writes) += 1;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl WorkloadClient for InMemoryWorkloadClient {
    async fn list(&self) -> Result<Vec<ObservedWorkload>, WorkloadError> {
        Ok(lock(&self.workloads)
            .values()
            .map(ObservedWorkload::from)
            .collect())
    }

    async fn apply(&self, workload: &SandboxWorkload) -> Result<(), WorkloadError> {
        self.begin_write()?;
        lock(&self.workloads).insert(workload.name.clone(), workload.clone());
        self.count_write();
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, WorkloadError> {
        self.begin_write()?;
        let removed = lock(&self.workloads).remove(name).is_some();
        if removed {
            self.count_write();
        }
        Ok(removed)
    }
}
