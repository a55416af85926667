use std::sync::Arc;

use crate::{
    AllocatableUsage, DeviceKind, GpuAllocation, QuotaError, ResourceAllocation, ResourceCatalog,
    ResourcePair, SandboxRequest,
};

/// Computes sandbox allocations from a shared catalog.
#[derive(Debug, Clone)]
pub struct QuotaCalculator {
    catalog: Arc<ResourceCatalog>,
}

impl QuotaCalculator {
    pub fn new(catalog: Arc<ResourceCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ResourceCatalog {
        &self.catalog
    }

    /// Allocate resources for one sandbox. All or nothing.
    pub fn allocate(
        &self,
        request: &SandboxRequest,
        in_use: &AllocatableUsage,
    ) -> Result<ResourceAllocation, QuotaError> {
        let catalog = &*self.catalog;
        let devices = u64::from(request.device_count);
        if devices == 0 {
            return Err(QuotaError::EmptyRequest);
        }

        if let Some(limit) = catalog.pod_allocatable_limit() {
            if in_use.pod_count.saturating_add(1) > limit {
                return Err(QuotaError::AllocatableExhausted {
                    limit,
                    in_use: in_use.pod_count,
                });
            }
        }

        let too_large = || QuotaError::RequestTooLarge {
            device_count: request.device_count,
        };

        let cpu = over_committed(
            catalog.cpu_per_device().checked_mul(devices).ok_or_else(too_large)?,
            catalog.cpu_over_commit_rate(),
        );
        let memory = over_committed(
            catalog.ram_per_device().checked_mul(devices).ok_or_else(too_large)?,
            catalog.memory_over_commit_rate(),
        );

        let gpu = match &request.device {
            DeviceKind::Gpu { vendor } if catalog.gpu_per_device() > 0 => {
                let resource_key = catalog.resolve_gpu_key(vendor.as_deref())?;
                let count = u64::from(catalog.gpu_per_device())
                    .checked_mul(devices)
                    .ok_or_else(too_large)?;
                Some(GpuAllocation {
                    resource_key: resource_key.to_string(),
                    count,
                })
            }
            _ => None,
        };

        Ok(ResourceAllocation { cpu, memory, gpu })
    }
}

/// Request is the nominal amount divided by `rate`, floored, at least 1.
/// Limit stays nominal.
fn over_committed(nominal: u64, rate: u64) -> ResourcePair {
    ResourcePair {
        request: (nominal / rate.max(1)).max(1),
        limit: nominal,
    }
}
