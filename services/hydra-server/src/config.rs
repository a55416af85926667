//! Server configuration.
//!
//! Loaded once at start-up from an optional YAML file, then overridden by
//! environment variables. Every key is optional and falls back to its
//! documented default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hydra_election::{ElectionConfig, ElectionTiming};
use hydra_id::ReplicaId;
use hydra_lease::{
    LockKey, PgStoreConfig, ResourceLockKind, DEFAULT_RESOURCE_LOCK, DEFAULT_RESOURCE_NAME,
    DEFAULT_RESOURCE_NAMESPACE,
};
use hydra_quota::{CatalogSettings, ResourceCatalog};
use serde::{Deserialize, Serialize};

use crate::db::DbConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Per-device defaults, allocatable limit, over-commit and GPU keys.
    #[serde(flatten)]
    pub resources: CatalogSettings,

    pub leader_election: LeaderElectionSettings,

    pub lease_store: LeaseStoreSettings,

    pub database: DatabaseSettings,

    pub workloads: WorkloadSettings,

    /// Seconds between full resyncs while leading.
    pub resync_period_secs: u64,

    pub listen_addr: SocketAddr,

    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resources: CatalogSettings::default(),
            leader_election: LeaderElectionSettings::default(),
            lease_store: LeaseStoreSettings::default(),
            database: DatabaseSettings::default(),
            workloads: WorkloadSettings::default(),
            resync_period_secs: 30 * 60,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeaderElectionSettings {
    pub lease_duration_secs: u64,
    pub renew_deadline_secs: u64,
    pub retry_period_secs: u64,
    pub resource_name: String,
    pub resource_lock: ResourceLockKind,
    pub resource_namespace: String,
    /// Defaults to the host name, or a generated replica id.
    pub identity: Option<String>,
    pub release_on_cancel: bool,
}

impl Default for LeaderElectionSettings {
    fn default() -> Self {
        let timing = ElectionTiming::default();
        Self {
            lease_duration_secs: timing.lease_duration.as_secs(),
            renew_deadline_secs: timing.renew_deadline.as_secs(),
            retry_period_secs: timing.retry_period.as_secs(),
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
            resource_lock: DEFAULT_RESOURCE_LOCK,
            resource_namespace: DEFAULT_RESOURCE_NAMESPACE.to_string(),
            identity: None,
            release_on_cancel: true,
        }
    }
}

impl LeaderElectionSettings {
    pub fn timing(&self) -> ElectionTiming {
        ElectionTiming {
            lease_duration: Duration::from_secs(self.lease_duration_secs),
            renew_deadline: Duration::from_secs(self.renew_deadline_secs),
            retry_period: Duration::from_secs(self.retry_period_secs),
        }
    }

    pub fn lock(&self) -> LockKey {
        LockKey::new(
            self.resource_lock,
            self.resource_namespace.clone(),
            self.resource_name.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseBackend {
    Postgres,
    /// Single replica only.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LeaseStoreSettings {
    pub backend: LeaseBackend,
    /// Connection URLs tried in order. Empty means the database URL.
    pub endpoints: Vec<String>,
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for LeaseStoreSettings {
    fn default() -> Self {
        Self {
            backend: LeaseBackend::Postgres,
            endpoints: Vec::new(),
            ca_file: None,
            cert_file: None,
            key_file: None,
            max_connections: PgStoreConfig::default().max_connections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseSettings {
    /// Desired-state database. Unset runs desired state in memory.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let db = DbConfig::default();
        Self {
            url: None,
            max_connections: db.max_connections,
            min_connections: db.min_connections,
            run_migrations: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadBackend {
    Kubernetes,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkloadSettings {
    pub backend: WorkloadBackend,
    pub namespace: String,
    /// Image for sandboxes that do not name one.
    pub image: String,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            backend: WorkloadBackend::Kubernetes,
            namespace: "open-hydra".to_string(),
            image: "openhydra/sandbox:latest".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from `path` (if any), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `HYDRA_*` and `DATABASE_URL` overrides read through `var`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = var("HYDRA_LISTEN_ADDR") {
            self.listen_addr = addr
                .parse()
                .with_context(|| format!("HYDRA_LISTEN_ADDR {addr:?}"))?;
        }
        if let Some(level) = var("HYDRA_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(flag) = var("HYDRA_RUN_MIGRATIONS") {
            self.database.run_migrations = flag == "1" || flag.eq_ignore_ascii_case("true");
        }

        if let Some(identity) = var("HYDRA_IDENTITY").or_else(|| var("HOSTNAME")) {
            if self.leader_election.identity.is_none() || var("HYDRA_IDENTITY").is_some() {
                self.leader_election.identity = Some(identity);
            }
        }

        if let Some(backend) = var("HYDRA_LEASE_BACKEND") {
            self.lease_store.backend = match backend.as_str() {
                "postgres" => LeaseBackend::Postgres,
                "memory" => LeaseBackend::Memory,
                other => bail!("HYDRA_LEASE_BACKEND: unknown backend {other:?}"),
            };
        }
        if let Some(endpoints) = var("HYDRA_LEASE_ENDPOINTS") {
            self.lease_store.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(backend) = var("HYDRA_WORKLOAD_BACKEND") {
            self.workloads.backend = match backend.as_str() {
                "kubernetes" => WorkloadBackend::Kubernetes,
                "memory" => WorkloadBackend::Memory,
                other => bail!("HYDRA_WORKLOAD_BACKEND: unknown backend {other:?}"),
            };
        }
        if let Some(namespace) = var("HYDRA_WORKLOAD_NAMESPACE") {
            self.workloads.namespace = namespace;
        }

        if let Some(limit) = var("HYDRA_POD_ALLOCATABLE_LIMIT") {
            self.resources.pod_allocatable_limit = limit
                .parse()
                .with_context(|| format!("HYDRA_POD_ALLOCATABLE_LIMIT {limit:?}"))?;
        }
        if let Some(driver) = var("HYDRA_DEFAULT_GPU_DRIVER") {
            self.resources.default_gpu_driver = Some(driver).filter(|d| !d.is_empty());
        }

        Ok(())
    }

    /// Check everything that can be checked without connecting anywhere.
    pub fn validate(&self) -> Result<()> {
        self.catalog().context("invalid resource settings")?;
        self.leader_election
            .timing()
            .validate()
            .context("invalid leader election timing")?;

        if self.resync_period_secs == 0 {
            bail!("resyncPeriodSecs must be greater than zero");
        }
        if self.lease_store.backend == LeaseBackend::Postgres && self.lease_endpoints().is_empty() {
            bail!("postgres lease store needs leaseStore.endpoints or database.url");
        }
        if self.lease_store.cert_file.is_some() != self.lease_store.key_file.is_some() {
            bail!("leaseStore.certFile and leaseStore.keyFile must be set together");
        }
        Ok(())
    }

    pub fn catalog(&self) -> Result<ResourceCatalog, hydra_quota::QuotaError> {
        ResourceCatalog::new(self.resources.clone())
    }

    pub fn election(&self) -> ElectionConfig {
        let settings = &self.leader_election;
        let identity = settings
            .identity
            .clone()
            .unwrap_or_else(|| ReplicaId::new().to_string());

        let mut config = ElectionConfig::new(identity, settings.lock()).with_timing(settings.timing());
        config.release_on_cancel = settings.release_on_cancel;
        config
    }

    fn lease_endpoints(&self) -> Vec<String> {
        if self.lease_store.endpoints.is_empty() {
            self.database.url.iter().cloned().collect()
        } else {
            self.lease_store.endpoints.clone()
        }
    }

    pub fn lease_store(&self) -> PgStoreConfig {
        PgStoreConfig {
            endpoints: self.lease_endpoints(),
            ca_file: self.lease_store.ca_file.clone(),
            cert_file: self.lease_store.cert_file.clone(),
            key_file: self.lease_store.key_file.clone(),
            max_connections: self.lease_store.max_connections,
            ..PgStoreConfig::default()
        }
    }

    /// Desired-state database settings, if a database is configured.
    pub fn db(&self) -> Option<DbConfig> {
        let url = self.database.url.clone()?;
        Some(DbConfig {
            url,
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections,
            ..DbConfig::default()
        })
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }
}
