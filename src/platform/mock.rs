//! In-memory platform backend for tests.
//!
//! Workloads materialize their replicas immediately as pods with synthetic
//! addresses. Pod phases can be scripted per pod name, faults are stored and
//! consulted by [`MockPlatform::reachable`], and failures can be injected per
//! resource kind.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use super::{
    FailureSpec, FaultPlatformClient, PartitionSpec, PlatformClient, PlatformError, PodPhase,
    PodSpec, PodStatus, ResourceKind, ServiceSpec, WorkloadSpec, WorkloadStatus,
};

#[derive(Debug, Clone)]
struct MockPod {
    ip: String,
    phase: PodPhase,
    command: Vec<String>,
}

#[derive(Debug, Clone)]
enum MockFault {
    Partition(PartitionSpec),
    Failure(FailureSpec),
}

#[derive(Debug, Default)]
struct MockState {
    namespaces: HashSet<String>,
    services: HashMap<(String, String), ServiceSpec>,
    workloads: HashMap<(String, String), WorkloadSpec>,
    pods: BTreeMap<(String, String), MockPod>,
    faults: HashMap<(String, String), MockFault>,
    /// Phases reported by successive reads; the last one sticks.
    scripts: HashMap<String, VecDeque<PodPhase>>,
    /// Pending injected failures per kind.
    failures: HashMap<ResourceKind, usize>,
    next_ip: u32,
}

impl MockState {
    fn take_failure(&mut self, kind: ResourceKind, name: &str) -> Result<(), PlatformError> {
        if let Some(remaining) = self.failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlatformError::backend(kind, name, "injected failure"));
            }
        }
        Ok(())
    }

    fn require_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        if self.namespaces.contains(namespace) {
            Ok(())
        } else {
            Err(PlatformError::NotFound {
                kind: ResourceKind::Namespace,
                name: namespace.to_string(),
            })
        }
    }

    fn allocate_ip(&mut self) -> String {
        self.next_ip += 1;
        format!("10.1.{}.{}", self.next_ip / 250, self.next_ip % 250 + 2)
    }

    fn upsert_pod(&mut self, namespace: &str, name: &str, command: Vec<String>) {
        let key = (namespace.to_string(), name.to_string());
        if let Some(pod) = self.pods.get_mut(&key) {
            pod.command = command;
            return;
        }
        let ip = self.allocate_ip();
        self.pods.insert(
            key,
            MockPod {
                ip,
                phase: PodPhase::Running,
                command,
            },
        );
    }

    fn failed_by_fault(&self, namespace: &str, pod: &str) -> bool {
        self.faults.iter().any(|((ns, _), fault)| {
            ns == namespace
                && matches!(fault, MockFault::Failure(spec) if spec.targets.iter().any(|t| t == pod))
        })
    }
}

/// In-memory [`PlatformClient`] and [`FaultPlatformClient`].
#[derive(Debug, Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
    deletes: AtomicUsize,
    fault_deletes: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Script the phases `get_pod` reports for `pod`, in order. The last
    /// phase keeps being reported once the script is exhausted.
    pub async fn script_pod(&self, pod: &str, phases: impl IntoIterator<Item = PodPhase>) {
        let mut state = self.state.lock().await;
        state
            .scripts
            .insert(pod.to_string(), phases.into_iter().collect());
    }

    /// Make the next `count` operations on `kind` fail with a backend error.
    pub async fn fail_next(&self, kind: ResourceKind, count: usize) {
        let mut state = self.state.lock().await;
        *state.failures.entry(kind).or_default() += count;
    }

    pub async fn has_namespace(&self, namespace: &str) -> bool {
        self.state.lock().await.namespaces.contains(namespace)
    }

    pub async fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadSpec> {
        let state = self.state.lock().await;
        state
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub async fn service(&self, namespace: &str, name: &str) -> Option<ServiceSpec> {
        let state = self.state.lock().await;
        state
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Command or args the pod was last applied with.
    pub async fn pod_command(&self, namespace: &str, pod: &str) -> Option<Vec<String>> {
        let state = self.state.lock().await;
        state
            .pods
            .get(&(namespace.to_string(), pod.to_string()))
            .map(|p| p.command.clone())
    }

    /// Names of all pods in a namespace, sorted.
    pub async fn pod_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Namespace and name of the pod holding `ip`.
    pub async fn pod_by_ip(&self, ip: &str) -> Option<(String, String)> {
        let state = self.state.lock().await;
        state
            .pods
            .iter()
            .find(|(_, pod)| pod.ip == ip)
            .map(|(key, _)| key.clone())
    }

    /// Current phase of a pod without consuming its script.
    pub async fn peek_phase(&self, namespace: &str, pod: &str) -> Option<PodPhase> {
        let state = self.state.lock().await;
        let current = state.pods.get(&(namespace.to_string(), pod.to_string()))?;
        if state.failed_by_fault(namespace, pod) {
            return Some(PodPhase::Failed);
        }
        let scripted = state.scripts.get(pod).and_then(|s| s.front().copied());
        Some(scripted.unwrap_or(current.phase))
    }

    /// Whether `pod` is currently held down by a failure fault.
    pub async fn is_failed(&self, namespace: &str, pod: &str) -> bool {
        self.state.lock().await.failed_by_fault(namespace, pod)
    }

    /// Whether traffic can flow between `a` and `b` under the active faults.
    pub async fn reachable(&self, namespace: &str, a: &str, b: &str) -> bool {
        let state = self.state.lock().await;
        if state.failed_by_fault(namespace, a) || state.failed_by_fault(namespace, b) {
            return false;
        }
        !state.faults.iter().any(|((ns, _), fault)| match fault {
            MockFault::Partition(spec) if ns == namespace => {
                let in_selector = |p: &str| spec.selector.iter().any(|s| s == p);
                let in_target = |p: &str| spec.target.iter().any(|t| t == p);
                (in_selector(a) && in_target(b)) || (in_target(a) && in_selector(b))
            }
            _ => false,
        })
    }

    /// Names of the fault objects present in a namespace, sorted.
    pub async fn active_faults(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state
            .faults
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Successful object deletions, namespaces included.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Successful fault deletions.
    pub fn fault_delete_count(&self) -> usize {
        self.fault_deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn apply_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.take_failure(ResourceKind::Namespace, namespace)?;
        state.namespaces.insert(namespace.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.take_failure(ResourceKind::Namespace, namespace)?;
        if !state.namespaces.remove(namespace) {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::Namespace,
                name: namespace.to_string(),
            });
        }
        state.services.retain(|(ns, _), _| ns != namespace);
        state.workloads.retain(|(ns, _), _| ns != namespace);
        state.pods.retain(|(ns, _), _| ns != namespace);
        state.faults.retain(|(ns, _), _| ns != namespace);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_service(&self, namespace: &str, spec: &ServiceSpec) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.require_namespace(namespace)?;
        state.take_failure(ResourceKind::Service, &spec.name)?;
        state
            .services
            .insert((namespace.to_string(), spec.name.clone()), spec.clone());
        Ok(())
    }

    async fn apply_workload(
        &self,
        namespace: &str,
        spec: &WorkloadSpec,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.require_namespace(namespace)?;
        state.take_failure(ResourceKind::StatefulSet, &spec.name)?;
        for i in 0..spec.replicas {
            let pod = format!("{}-{}", spec.name, i);
            state.upsert_pod(namespace, &pod, spec.command.clone());
        }
        // Scaling down removes the highest ordinals.
        let prefix = format!("{}-", spec.name);
        let replicas = spec.replicas;
        state.pods.retain(|(ns, name), _| {
            ns != namespace
                || name
                    .strip_prefix(&prefix)
                    .and_then(|ordinal| ordinal.parse::<u32>().ok())
                    .is_none_or(|ordinal| ordinal < replicas)
        });
        state
            .workloads
            .insert((namespace.to_string(), spec.name.clone()), spec.clone());
        Ok(())
    }

    async fn apply_pod(&self, namespace: &str, spec: &PodSpec) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.require_namespace(namespace)?;
        state.take_failure(ResourceKind::Pod, &spec.name)?;
        state.upsert_pod(namespace, &spec.name, spec.args.clone());
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodStatus, PlatformError> {
        let mut state = self.state.lock().await;
        let key = (namespace.to_string(), name.to_string());
        let Some(pod) = state.pods.get(&key).cloned() else {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::Pod,
                name: name.to_string(),
            });
        };
        let mut phase = pod.phase;
        if let Some(script) = state.scripts.get_mut(name) {
            if script.len() > 1 {
                phase = script.pop_front().unwrap_or(phase);
            } else if let Some(last) = script.front() {
                phase = *last;
            }
        }
        if state.failed_by_fault(namespace, name) {
            phase = PodPhase::Failed;
        }
        let ip = match phase {
            PodPhase::Pending => String::new(),
            _ => pod.ip,
        };
        Ok(PodStatus {
            name: name.to_string(),
            phase,
            ip,
        })
    }

    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WorkloadStatus, PlatformError> {
        let state = self.state.lock().await;
        let spec = state
            .workloads
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::StatefulSet,
                name: name.to_string(),
            })?;
        let ready = (0..spec.replicas)
            .filter(|i| {
                let pod = format!("{name}-{i}");
                !state.failed_by_fault(namespace, &pod)
            })
            .count() as u32;
        Ok(WorkloadStatus {
            replicas: spec.replicas,
            ready_replicas: ready,
        })
    }

    async fn delete(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), PlatformError> {
        match kind {
            ResourceKind::Namespace => return self.delete_namespace(name).await,
            ResourceKind::NetworkChaos | ResourceKind::PodChaos => {
                return self.delete_fault(namespace, kind, name).await;
            }
            _ => {}
        }
        let mut state = self.state.lock().await;
        state.take_failure(kind, name)?;
        let key = (namespace.to_string(), name.to_string());
        let removed = match kind {
            ResourceKind::Service => state.services.remove(&key).is_some(),
            ResourceKind::Pod => state.pods.remove(&key).is_some(),
            ResourceKind::StatefulSet => {
                let prefix = format!("{name}-");
                state
                    .pods
                    .retain(|(ns, pod), _| ns != namespace || !pod.starts_with(&prefix));
                state.workloads.remove(&key).is_some()
            }
            _ => false,
        };
        if !removed {
            return Err(PlatformError::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl FaultPlatformClient for MockPlatform {
    async fn apply_partition(
        &self,
        namespace: &str,
        spec: &PartitionSpec,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.require_namespace(namespace)?;
        state.take_failure(ResourceKind::NetworkChaos, &spec.name)?;
        state.faults.insert(
            (namespace.to_string(), spec.name.clone()),
            MockFault::Partition(spec.clone()),
        );
        Ok(())
    }

    async fn apply_failure(
        &self,
        namespace: &str,
        spec: &FailureSpec,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.require_namespace(namespace)?;
        state.take_failure(ResourceKind::PodChaos, &spec.name)?;
        state.faults.insert(
            (namespace.to_string(), spec.name.clone()),
            MockFault::Failure(spec.clone()),
        );
        Ok(())
    }

    async fn delete_fault(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().await;
        state.take_failure(kind, name)?;
        let key = (namespace.to_string(), name.to_string());
        let matches_kind = match state.faults.get(&key) {
            Some(MockFault::Partition(_)) => kind == ResourceKind::NetworkChaos,
            Some(MockFault::Failure(_)) => kind == ResourceKind::PodChaos,
            None => false,
        };
        if !matches_kind {
            return Err(PlatformError::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        state.faults.remove(&key);
        self.fault_deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(name: &str, a: &[&str], b: &[&str]) -> PartitionSpec {
        PartitionSpec {
            name: name.to_string(),
            selector: a.iter().map(|s| s.to_string()).collect(),
            target: b.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn partition_blocks_both_directions_only_across_sets() {
        let platform = MockPlatform::new();
        platform.apply_namespace("ns").await.unwrap();
        platform
            .apply_partition("ns", &partition("split", &["a", "b"], &["c"]))
            .await
            .unwrap();

        assert!(platform.reachable("ns", "a", "b").await);
        assert!(!platform.reachable("ns", "a", "c").await);
        assert!(!platform.reachable("ns", "c", "b").await);
        assert!(platform.reachable("other", "a", "c").await);

        platform
            .delete_fault("ns", ResourceKind::NetworkChaos, "split")
            .await
            .unwrap();
        assert!(platform.reachable("ns", "a", "c").await);
    }

    #[tokio::test]
    async fn scripted_phases_are_consumed_in_order_and_last_sticks() {
        let platform = MockPlatform::new();
        platform.apply_namespace("ns").await.unwrap();
        platform
            .apply_pod(
                "ns",
                &PodSpec {
                    name: "p".to_string(),
                    image: "img".to_string(),
                    args: vec![],
                    labels: BTreeMap::new(),
                    port: super::super::ServicePort {
                        name: "rest".to_string(),
                        port: 80,
                    },
                    node_selector: BTreeMap::new(),
                },
            )
            .await
            .unwrap();
        platform
            .script_pod("p", [PodPhase::Pending, PodPhase::Failed])
            .await;

        let first = platform.get_pod("ns", "p").await.unwrap();
        assert_eq!(first.phase, PodPhase::Pending);
        assert!(first.ip.is_empty());
        for _ in 0..3 {
            assert_eq!(
                platform.get_pod("ns", "p").await.unwrap().phase,
                PodPhase::Failed
            );
        }
    }

    #[tokio::test]
    async fn deleting_missing_objects_reports_not_found() {
        let platform = MockPlatform::new();
        platform.apply_namespace("ns").await.unwrap();
        let err = platform
            .delete("ns", ResourceKind::Service, "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let err = platform
            .delete_fault("ns", ResourceKind::PodChaos, "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(platform.delete_count(), 0);
    }
}
