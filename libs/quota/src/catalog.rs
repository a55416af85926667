use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{AllocatableSummary, AllocatableUsage, QuotaError};

/// Resource settings as they appear in configuration.
///
/// Every field has a default so absent keys keep the documented values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogSettings {
    /// Maximum concurrently running sandboxes; negative means unbounded.
    pub pod_allocatable_limit: i64,

    /// Milli-cores per device.
    pub default_cpu_per_device: u64,

    /// MiB per device.
    pub default_ram_per_device: u64,

    pub default_gpu_per_device: u32,

    /// Divides the nominal CPU request.
    pub cpu_over_commit_rate: u8,

    /// Divides the nominal memory request.
    pub memory_over_commit_rate: u8,

    /// Recognised GPU resource keys, in lookup order.
    pub gpu_resource_keys: Vec<String>,

    /// Key used when a GPU sandbox names no vendor. GPU scheduling is
    /// disabled while unset.
    pub default_gpu_driver: Option<String>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            pod_allocatable_limit: -1,
            default_cpu_per_device: 2000,
            default_ram_per_device: 8192,
            default_gpu_per_device: 0,
            cpu_over_commit_rate: 1,
            memory_over_commit_rate: 1,
            gpu_resource_keys: vec!["nvidia.com/gpu".to_string(), "amd.com/gpu".to_string()],
            default_gpu_driver: None,
        }
    }
}

/// Validated, immutable resource catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCatalog {
    settings: CatalogSettings,
}

impl ResourceCatalog {
    /// Validate settings. Configuration errors surface here, once, rather
    /// than on every allocation.
    pub fn new(settings: CatalogSettings) -> Result<Self, QuotaError> {
        if settings.cpu_over_commit_rate == 0 {
            return Err(QuotaError::InvalidOverCommitRate { resource: "cpu" });
        }
        if settings.memory_over_commit_rate == 0 {
            return Err(QuotaError::InvalidOverCommitRate { resource: "memory" });
        }
        if settings.default_cpu_per_device == 0 {
            return Err(QuotaError::InvalidResourceDefault { resource: "cpu" });
        }
        if settings.default_ram_per_device == 0 {
            return Err(QuotaError::InvalidResourceDefault { resource: "memory" });
        }
        if settings.gpu_resource_keys.is_empty() {
            return Err(QuotaError::NoGpuResourceKeys);
        }

        let mut seen = HashSet::new();
        for key in &settings.gpu_resource_keys {
            if !seen.insert(key.as_str()) {
                return Err(QuotaError::DuplicateGpuResourceKey(key.clone()));
            }
        }

        if let Some(driver) = &settings.default_gpu_driver {
            if !seen.contains(driver.as_str()) {
                return Err(QuotaError::UnsupportedGpuVendor(driver.clone()));
            }
        }

        Ok(Self { settings })
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    /// The allocatable ceiling, `None` when unbounded.
    pub fn pod_allocatable_limit(&self) -> Option<u64> {
        u64::try_from(self.settings.pod_allocatable_limit).ok()
    }

    pub fn cpu_per_device(&self) -> u64 {
        self.settings.default_cpu_per_device
    }

    pub fn ram_per_device(&self) -> u64 {
        self.settings.default_ram_per_device
    }

    pub fn gpu_per_device(&self) -> u32 {
        self.settings.default_gpu_per_device
    }

    pub fn cpu_over_commit_rate(&self) -> u64 {
        u64::from(self.settings.cpu_over_commit_rate)
    }

    pub fn memory_over_commit_rate(&self) -> u64 {
        u64::from(self.settings.memory_over_commit_rate)
    }

    pub fn gpu_resource_keys(&self) -> &[String] {
        &self.settings.gpu_resource_keys
    }

    /// Map a requested vendor to a configured GPU resource key.
    ///
    /// No vendor means the default driver. Until a default driver is
    /// configured GPU scheduling is off and every lookup fails.
    pub fn resolve_gpu_key(&self, vendor: Option<&str>) -> Result<&str, QuotaError> {
        let driver = self
            .settings
            .default_gpu_driver
            .as_deref()
            .ok_or(QuotaError::GpuDriverNotConfigured)?;
        let wanted = vendor.unwrap_or(driver);

        self.settings
            .gpu_resource_keys
            .iter()
            .find(|key| key.as_str() == wanted)
            .map(String::as_str)
            .ok_or_else(|| QuotaError::UnsupportedGpuVendor(wanted.to_string()))
    }

    /// Cluster-wide view of allocatable slots.
    pub fn summarize(&self, usage: &AllocatableUsage) -> AllocatableSummary {
        let limit = self.pod_allocatable_limit();
        AllocatableSummary {
            limit,
            in_use: usage.pod_count,
            remaining: limit.map(|limit| limit.saturating_sub(usage.pod_count)),
        }
    }
}

impl Default for ResourceCatalog {
    fn default() -> Self {
        Self {
            settings: CatalogSettings::default(),
        }
    }
}
