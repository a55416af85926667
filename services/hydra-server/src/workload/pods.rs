use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, info};

use super::{
    ObservedWorkload, SandboxWorkload, WorkloadClient, WorkloadError, MANAGED_BY,
    MANAGED_BY_LABEL, OWNER_ANNOTATION, SANDBOX_ID_LABEL, SPEC_HASH_ANNOTATION,
};

const CONTAINER_NAME: &str = "sandbox";

/// Runs each sandbox as a single pod in one namespace.
///
/// Pod resources are immutable, so a drifted pod is deleted and created
/// again rather than patched.
#[derive(Clone)]
pub struct PodWorkloadClient {
    api: Api<Pod>,
    namespace: String,
}

impl PodWorkloadClient {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn try_default(namespace: &str) -> Result<Self, WorkloadError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

fn managed_selector() -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY}")
}

fn quantities(values: BTreeMap<String, String>) -> BTreeMap<String, Quantity> {
    values.into_iter().map(|(k, v)| (k, Quantity(v))).collect()
}

/// Render the pod for a workload.
pub(crate) fn build_pod(workload: &SandboxWorkload, namespace: &str) -> Pod {
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (
            SANDBOX_ID_LABEL.to_string(),
            workload.spec.sandbox_id.to_string(),
        ),
    ]);
    let annotations = BTreeMap::from([
        (OWNER_ANNOTATION.to_string(), workload.spec.owner.clone()),
        (
            SPEC_HASH_ANNOTATION.to_string(),
            workload.spec_hash.to_string(),
        ),
    ]);

    Pod {
        metadata: ObjectMeta {
            name: Some(workload.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTAINER_NAME.to_string(),
                image: Some(workload.spec.image.clone()),
                resources: Some(ResourceRequirements {
                    requests: Some(quantities(workload.allocation.requests())),
                    limits: Some(quantities(workload.allocation.limits())),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            restart_policy: Some("Always".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn observe_pod(pod: &Pod) -> Option<ObservedWorkload> {
    let name = pod.metadata.name.clone()?;
    let sandbox_id = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SANDBOX_ID_LABEL))
        .and_then(|id| id.parse().ok());
    let spec_hash = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(SPEC_HASH_ANNOTATION))
        .and_then(|hash| hash.parse().ok());

    Some(ObservedWorkload {
        name,
        sandbox_id,
        spec_hash,
    })
}

#[async_trait]
impl WorkloadClient for PodWorkloadClient {
    async fn list(&self) -> Result<Vec<ObservedWorkload>, WorkloadError> {
        let params = ListParams::default().labels(&managed_selector());
        let pods = self.api.list(&params).await?;
        Ok(pods.items.iter().filter_map(observe_pod).collect())
    }

    async fn apply(&self, workload: &SandboxWorkload) -> Result<(), WorkloadError> {
        if let Some(existing) = self.api.get_opt(&workload.name).await? {
            let current = observe_pod(&existing).and_then(|observed| observed.spec_hash);
            if current.as_ref() == Some(&workload.spec_hash) {
                debug!(name = %workload.name, "Pod already up to date");
                return Ok(());
            }

            info!(name = %workload.name, "Replacing drifted pod");
            self.api
                .delete(&workload.name, &DeleteParams::default())
                .await?;
        }

        let pod = build_pod(workload, &self.namespace);
        self.api.create(&PostParams::default(), &pod).await?;
        info!(
            name = %workload.name,
            sandbox_id = %workload.spec.sandbox_id,
            "Pod created"
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, WorkloadError> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(name, "Pod deleted");
                Ok(true)
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use hydra_id::SandboxId;
    use hydra_quota::{
        CatalogSettings, GpuAllocation, ResourceAllocation, ResourcePair, SandboxRequest,
    };

    use super::*;
    use crate::workload::SandboxSpec;

    fn workload() -> SandboxWorkload {
        let spec = SandboxSpec {
            sandbox_id: SandboxId::new(),
            owner: "alice".into(),
            image: "openhydra/sandbox:latest".into(),
            request: SandboxRequest::gpu(1, None),
        };
        SandboxWorkload {
            name: spec.workload_name(),
            spec_hash: spec.spec_hash(&CatalogSettings::default()),
            spec,
            allocation: ResourceAllocation {
                cpu: ResourcePair {
                    request: 666,
                    limit: 2000,
                },
                memory: ResourcePair {
                    request: 8192,
                    limit: 8192,
                },
                gpu: Some(GpuAllocation {
                    resource_key: "nvidia.com/gpu".into(),
                    count: 1,
                }),
            },
        }
    }

    #[test]
    fn test_build_pod() {
        let workload = workload();
        let pod = build_pod(&workload, "open-hydra");

        assert_eq!(pod.metadata.name.as_deref(), Some(workload.name.as_str()));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("open-hydra"));

        let container = &pod.spec.as_ref().unwrap().containers[0];
        let resources = container.resources.as_ref().unwrap();
        let requests = resources.requests.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(requests["cpu"], Quantity("666m".into()));
        assert_eq!(limits["cpu"], Quantity("2000m".into()));
        assert_eq!(requests["memory"], Quantity("8192Mi".into()));
        assert_eq!(limits["nvidia.com/gpu"], Quantity("1".into()));
    }

    #[test]
    fn test_observe_round_trips_identity() {
        let workload = workload();
        let observed = observe_pod(&build_pod(&workload, "open-hydra")).unwrap();
        assert_eq!(observed, ObservedWorkload::from(&workload));
    }

    #[test]
    fn test_observe_tolerates_foreign_labels() {
        let mut pod = build_pod(&workload(), "open-hydra");
        pod.metadata.labels = None;
        pod.metadata.annotations = Some(BTreeMap::from([(
            SPEC_HASH_ANNOTATION.to_string(),
            "not-a-hash".to_string(),
        )]));

        let observed = observe_pod(&pod).unwrap();
        assert_eq!(observed.sandbox_id, None);
        assert_eq!(observed.spec_hash, None);
    }
}
