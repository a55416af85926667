//! Application state shared across request handlers.

use std::sync::Arc;

use hydra_election::ElectionHandle;
use hydra_quota::ResourceCatalog;

use crate::db::Database;
use crate::workload::WorkloadClient;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    db: Option<Database>,
    election: ElectionHandle,
    catalog: Arc<ResourceCatalog>,
    workloads: Arc<dyn WorkloadClient>,
}

impl AppState {
    pub fn new(
        db: Option<Database>,
        election: ElectionHandle,
        catalog: Arc<ResourceCatalog>,
        workloads: Arc<dyn WorkloadClient>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                db,
                election,
                catalog,
                workloads,
            }),
        }
    }

    /// The desired-state database, absent when running fully in memory.
    pub fn db(&self) -> Option<&Database> {
        self.inner.db.as_ref()
    }

    pub fn election(&self) -> &ElectionHandle {
        &self.inner.election
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.inner.catalog
    }

    pub fn workloads(&self) -> &dyn WorkloadClient {
        self.inner.workloads.as_ref()
    }
}
