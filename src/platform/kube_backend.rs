//! Kubernetes backend using kube-rs.
//!
//! Core objects are upserted with server-side apply. Chaos Mesh objects have no
//! typed bindings, so they go through `DynamicObject` with a hand-built
//! `ApiResource` for `chaos-mesh.org/v1alpha1`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
};
use serde_json::Value;

use super::{
    FailureSpec, FaultPlatformClient, PartitionSpec, PlatformClient, PlatformError, PodPhase,
    PodSpec, PodStatus, ResourceKind, ServiceSpec, WorkloadSpec, WorkloadStatus, manifest,
};

const FIELD_MANAGER: &str = "systest";

/// Real Kubernetes backend using a kube-rs client.
#[derive(Clone)]
pub struct KubeBackend {
    client: kube::Client,
}

impl KubeBackend {
    /// Create a new KubeBackend from a kube::Client.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Create a new KubeBackend using the in-cluster or kubeconfig configuration.
    pub async fn try_default() -> Result<Self, PlatformError> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| PlatformError::Connection(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn chaos_api(&self, namespace: &str, kind: ResourceKind) -> Api<DynamicObject> {
        let kind_name = match kind {
            ResourceKind::PodChaos => "PodChaos",
            _ => "NetworkChaos",
        };
        let gvk = GroupVersionKind::gvk(manifest::CHAOS_GROUP, manifest::CHAOS_VERSION, kind_name);
        let resource = ApiResource::from_gvk(&gvk);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }

    async fn apply_chaos(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        body: Value,
    ) -> Result<(), PlatformError> {
        self.chaos_api(namespace, kind)
            .patch(name, &apply_params(), &Patch::Apply(&body))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(kind, name, e))
    }
}

fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

fn map_kube_error(kind: ResourceKind, name: &str, err: kube::Error) -> PlatformError {
    match err {
        kube::Error::Api(e) if e.code == 404 => PlatformError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(e) if e.code == 422 => PlatformError::Invalid {
            kind,
            name: name.to_string(),
            message: e.message,
        },
        e => PlatformError::backend(kind, name, e),
    }
}

#[async_trait]
impl PlatformClient for KubeBackend {
    async fn apply_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.patch(
            namespace,
            &apply_params(),
            &Patch::Apply(&manifest::namespace(namespace)),
        )
        .await
        .map(|_| ())
        .map_err(|e| map_kube_error(ResourceKind::Namespace, namespace, e))
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.delete(namespace, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(ResourceKind::Namespace, namespace, e))
    }

    async fn apply_service(&self, namespace: &str, spec: &ServiceSpec) -> Result<(), PlatformError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &spec.name,
            &apply_params(),
            &Patch::Apply(&manifest::service(namespace, spec)),
        )
        .await
        .map(|_| ())
        .map_err(|e| map_kube_error(ResourceKind::Service, &spec.name, e))
    }

    async fn apply_workload(
        &self,
        namespace: &str,
        spec: &WorkloadSpec,
    ) -> Result<(), PlatformError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &spec.name,
            &apply_params(),
            &Patch::Apply(&manifest::workload(namespace, spec)),
        )
        .await
        .map(|_| ())
        .map_err(|e| map_kube_error(ResourceKind::StatefulSet, &spec.name, e))
    }

    async fn apply_pod(&self, namespace: &str, spec: &PodSpec) -> Result<(), PlatformError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &spec.name,
            &apply_params(),
            &Patch::Apply(&manifest::pod(namespace, spec)),
        )
        .await
        .map(|_| ())
        .map_err(|e| map_kube_error(ResourceKind::Pod, &spec.name, e))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodStatus, PlatformError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(ResourceKind::Pod, name, e))?;
        let status = pod.status.unwrap_or_default();
        Ok(PodStatus {
            name: name.to_string(),
            phase: status
                .phase
                .as_deref()
                .map(PodPhase::parse)
                .unwrap_or(PodPhase::Pending),
            ip: status.pod_ip.unwrap_or_default(),
        })
    }

    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, PlatformError> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let sset = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(ResourceKind::StatefulSet, name, e))?;
        let status = sset.status.unwrap_or_default();
        Ok(WorkloadStatus {
            replicas: status.replicas.max(0) as u32,
            ready_replicas: status.ready_replicas.unwrap_or(0).max(0) as u32,
        })
    }

    async fn delete(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), PlatformError> {
        let dp = DeleteParams::default();
        let result = match kind {
            ResourceKind::Namespace => return self.delete_namespace(name).await,
            ResourceKind::Service => Api::<Service>::namespaced(self.client.clone(), namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::StatefulSet => {
                Api::<StatefulSet>::namespaced(self.client.clone(), namespace)
                    .delete(name, &dp)
                    .await
                    .map(|_| ())
            }
            ResourceKind::Pod => Api::<Pod>::namespaced(self.client.clone(), namespace)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::NetworkChaos | ResourceKind::PodChaos => {
                return self.delete_fault(namespace, kind, name).await;
            }
        };
        result.map_err(|e| map_kube_error(kind, name, e))
    }
}

#[async_trait]
impl FaultPlatformClient for KubeBackend {
    async fn apply_partition(
        &self,
        namespace: &str,
        spec: &PartitionSpec,
    ) -> Result<(), PlatformError> {
        self.apply_chaos(
            namespace,
            ResourceKind::NetworkChaos,
            &spec.name,
            manifest::partition(namespace, spec),
        )
        .await
    }

    async fn apply_failure(
        &self,
        namespace: &str,
        spec: &FailureSpec,
    ) -> Result<(), PlatformError> {
        self.apply_chaos(
            namespace,
            ResourceKind::PodChaos,
            &spec.name,
            manifest::failure(namespace, spec),
        )
        .await
    }

    async fn delete_fault(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), PlatformError> {
        self.chaos_api(namespace, kind)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(kind, name, e))
    }
}
