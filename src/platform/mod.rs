//! Orchestration backend operations used by the harness.
//!
//! Everything the harness does to the cluster goes through two traits:
//!
//! - [`PlatformClient`]: namespaces, services, stateful workloads, single pods
//! - [`FaultPlatformClient`]: fault-injection objects (network partition, pod failure)
//!
//! Implementations:
//!
//! - `KubeBackend`: Kubernetes via kube-rs, Chaos Mesh for faults (feature `k8s`)
//! - [`MockPlatform`]: in-memory backend for deterministic tests
//!
//! Every apply is an idempotent upsert keyed by name inside a namespace. There
//! are no retries at this layer; callers own their retry policy.

use async_trait::async_trait;
use std::collections::BTreeMap;

#[cfg(feature = "k8s")]
pub mod kube_backend;
pub mod manifest;
pub mod mock;

#[cfg(feature = "k8s")]
pub use kube_backend::KubeBackend;
pub use mock::MockPlatform;

/// Kind of backend object an operation acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Namespace,
    Service,
    StatefulSet,
    Pod,
    NetworkChaos,
    PodChaos,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Service => "service",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::Pod => "pod",
            ResourceKind::NetworkChaos => "networkchaos",
            ResourceKind::PodChaos => "podchaos",
        };
        f.write_str(s)
    }
}

/// Error type for platform operations. Every variant names the object involved.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },
    #[error("{kind} {name}: {message}")]
    Backend {
        kind: ResourceKind,
        name: String,
        message: String,
    },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("invalid {kind} {name}: {message}")]
    Invalid {
        kind: ResourceKind,
        name: String,
        message: String,
    },
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }

    pub(crate) fn backend(kind: ResourceKind, name: &str, message: impl ToString) -> Self {
        PlatformError::Backend {
            kind,
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

/// Pod lifecycle phase as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatus {
    pub name: String,
    pub phase: PodPhase,
    /// Empty until the pod has been scheduled and assigned an address
    pub ip: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
}

/// A service selecting pods by label. Headless services get no cluster IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePort>,
    pub headless: bool,
}

/// A replicated stateful workload; replica `i` is named `<name>-<i>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub service_name: String,
    pub replicas: u32,
    pub image: String,
    pub command: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub p2p_port: u16,
    pub api_port: u16,
    pub storage: String,
    pub node_selector: BTreeMap<String, String>,
}

/// A single pod, used for the auxiliary service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSpec {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub port: ServicePort,
    pub node_selector: BTreeMap<String, String>,
}

/// Bidirectional partition between two disjoint sets of pod names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub name: String,
    pub selector: Vec<String>,
    pub target: Vec<String>,
}

/// Failure of every listed pod; they are kept from respawning while the object exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureSpec {
    pub name: String,
    pub targets: Vec<String>,
}

/// Core orchestration operations.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn apply_namespace(&self, namespace: &str) -> Result<(), PlatformError>;

    /// Delete a namespace and, transitively, everything inside it.
    async fn delete_namespace(&self, namespace: &str) -> Result<(), PlatformError>;

    async fn apply_service(&self, namespace: &str, spec: &ServiceSpec) -> Result<(), PlatformError>;

    async fn apply_workload(
        &self,
        namespace: &str,
        spec: &WorkloadSpec,
    ) -> Result<(), PlatformError>;

    async fn apply_pod(&self, namespace: &str, spec: &PodSpec) -> Result<(), PlatformError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodStatus, PlatformError>;

    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, PlatformError>;

    /// Delete one object. A missing object is reported as `NotFound`.
    async fn delete(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), PlatformError>;
}

/// Fault-injection operations.
#[async_trait]
pub trait FaultPlatformClient: Send + Sync {
    async fn apply_partition(
        &self,
        namespace: &str,
        spec: &PartitionSpec,
    ) -> Result<(), PlatformError>;

    async fn apply_failure(&self, namespace: &str, spec: &FailureSpec)
    -> Result<(), PlatformError>;

    /// Delete a fault object by name. A missing object is reported as `NotFound`.
    async fn delete_fault(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), PlatformError>;
}

/// A backend providing both the core and the fault operations.
pub trait Platform: PlatformClient + FaultPlatformClient {}

impl<T: PlatformClient + FaultPlatformClient> Platform for T {}
