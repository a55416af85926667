use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CPU_RESOURCE, MEMORY_RESOURCE};

/// What kind of device a sandbox asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    /// `vendor` is a GPU resource key; none means the default driver.
    Gpu {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vendor: Option<String>,
    },
}

/// A sandbox's resource request, consumed once by the calculator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRequest {
    pub device_count: u32,
    pub device: DeviceKind,
}

impl SandboxRequest {
    pub fn cpu(device_count: u32) -> Self {
        Self {
            device_count,
            device: DeviceKind::Cpu,
        }
    }

    pub fn gpu(device_count: u32, vendor: Option<&str>) -> Self {
        Self {
            device_count,
            device: DeviceKind::Gpu {
                vendor: vendor.map(str::to_string),
            },
        }
    }
}

/// Snapshot of current usage, supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AllocatableUsage {
    /// Sandboxes currently running.
    pub pod_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourcePair {
    pub request: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuAllocation {
    pub resource_key: String,
    pub count: u64,
}

/// Concrete requests and limits for one sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocation {
    /// Milli-cores.
    pub cpu: ResourcePair,
    /// MiB.
    pub memory: ResourcePair,
    pub gpu: Option<GpuAllocation>,
}

impl ResourceAllocation {
    /// Orchestrator quantity strings for requests.
    pub fn requests(&self) -> BTreeMap<String, String> {
        self.quantities(self.cpu.request, self.memory.request)
    }

    /// Orchestrator quantity strings for limits.
    pub fn limits(&self) -> BTreeMap<String, String> {
        self.quantities(self.cpu.limit, self.memory.limit)
    }

    fn quantities(&self, cpu_millis: u64, memory_mib: u64) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(CPU_RESOURCE.to_string(), format!("{cpu_millis}m"));
        out.insert(MEMORY_RESOURCE.to_string(), format!("{memory_mib}Mi"));
        if let Some(gpu) = &self.gpu {
            out.insert(gpu.resource_key.clone(), gpu.count.to_string());
        }
        out
    }
}

/// The cluster-wide allocatable picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocatableSummary {
    /// `None` when unbounded.
    pub limit: Option<u64>,
    pub in_use: u64,
    pub remaining: Option<u64>,
}
