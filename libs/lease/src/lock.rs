//! Lock kinds and lock record keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The primitive that backs the lock record.
///
/// The spellings match the `resourceLock` values used by existing
/// deployments so a rolling upgrade keeps contending on the same record.
/// Hybrid kinds write a primary record plus a `leases` record in one atomic
/// write, and read the primary first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceLockKind {
    Leases,
    Endpoints,
    ConfigMaps,
    EndpointsLeases,
    ConfigMapsLeases,
}

impl ResourceLockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leases => "leases",
            Self::Endpoints => "endpoints",
            Self::ConfigMaps => "configmaps",
            Self::EndpointsLeases => "endpointsleases",
            Self::ConfigMapsLeases => "configmapsleases",
        }
    }

    /// Key segment of the record that is authoritative for reads.
    fn primary_segment(&self) -> &'static str {
        match self {
            Self::Leases => "leases",
            Self::Endpoints | Self::EndpointsLeases => "endpoints",
            Self::ConfigMaps | Self::ConfigMapsLeases => "configmaps",
        }
    }

    pub fn is_hybrid(&self) -> bool {
        matches!(self, Self::EndpointsLeases | Self::ConfigMapsLeases)
    }
}

impl fmt::Display for ResourceLockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceLockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leases" => Ok(Self::Leases),
            "endpoints" => Ok(Self::Endpoints),
            "configmaps" => Ok(Self::ConfigMaps),
            "endpointsleases" => Ok(Self::EndpointsLeases),
            "configmapsleases" => Ok(Self::ConfigMapsLeases),
            other => Err(format!("unknown resource lock kind '{other}'")),
        }
    }
}

/// Identifies one lock record: kind, namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub kind: ResourceLockKind,
    pub namespace: String,
    pub name: String,
}

impl LockKey {
    pub fn new(
        kind: ResourceLockKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Store key of the authoritative record.
    pub fn primary_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind.primary_segment(),
            self.namespace,
            self.name
        )
    }

    /// Store key of the mirrored `leases` record for hybrid kinds.
    pub fn secondary_key(&self) -> Option<String> {
        self.kind
            .is_hybrid()
            .then(|| format!("leases/{}/{}", self.namespace, self.name))
    }

    /// All store keys written by an acquisition, primary first.
    pub fn store_keys(&self) -> Vec<String> {
        let mut keys = vec![self.primary_key()];
        keys.extend(self.secondary_key());
        keys
    }
}

impl Default for LockKey {
    fn default() -> Self {
        Self::new(
            crate::DEFAULT_RESOURCE_LOCK,
            crate::DEFAULT_RESOURCE_NAMESPACE,
            crate::DEFAULT_RESOURCE_NAME,
        )
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_spellings_roundtrip() {
        for kind in [
            ResourceLockKind::Leases,
            ResourceLockKind::Endpoints,
            ResourceLockKind::ConfigMaps,
            ResourceLockKind::EndpointsLeases,
            ResourceLockKind::ConfigMapsLeases,
        ] {
            assert_eq!(kind.as_str().parse::<ResourceLockKind>().unwrap(), kind);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("leader".parse::<ResourceLockKind>().is_err());
    }

    #[test]
    fn test_default_lock_key() {
        let key = LockKey::default();
        assert_eq!(key.primary_key(), "endpoints/default/open-hydra-api-leader-lock");
        assert_eq!(
            key.secondary_key().as_deref(),
            Some("leases/default/open-hydra-api-leader-lock")
        );
    }

    #[test]
    fn test_plain_lease_has_single_key() {
        let key = LockKey::new(ResourceLockKind::Leases, "open-hydra", "lock");
        assert_eq!(key.store_keys(), vec!["leases/open-hydra/lock".to_string()]);
    }
}
