//! Server-side-apply manifests for every object the harness creates.
//!
//! Kept free of client types so the shapes can be checked without a cluster.

use serde_json::{Value, json};

use super::{FailureSpec, PartitionSpec, PodSpec, ServiceSpec, WorkloadSpec};

pub const CHAOS_GROUP: &str = "chaos-mesh.org";
pub const CHAOS_VERSION: &str = "v1alpha1";

const CPU_REQUEST: &str = "0.5";
const MEMORY_REQUEST: &str = "1Gi";
const STORAGE_CLASS: &str = "standard";

pub fn namespace(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    })
}

pub fn service(namespace: &str, spec: &ServiceSpec) -> Value {
    let ports: Vec<Value> = spec
        .ports
        .iter()
        .map(|p| json!({ "name": p.name, "port": p.port, "protocol": "TCP" }))
        .collect();
    let mut svc = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": spec.selector,
        },
        "spec": {
            "selector": spec.selector,
            "ports": ports,
        }
    });
    if spec.headless {
        svc["spec"]["clusterIP"] = json!("None");
    }
    svc
}

pub fn workload(namespace: &str, spec: &WorkloadSpec) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": spec.labels,
        },
        "spec": {
            "podManagementPolicy": "Parallel",
            "replicas": spec.replicas,
            "serviceName": spec.service_name,
            "selector": { "matchLabels": spec.labels },
            "volumeClaimTemplates": [{
                "metadata": { "name": "data", "namespace": namespace },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "storageClassName": STORAGE_CLASS,
                    "resources": { "requests": { "storage": spec.storage } }
                }
            }],
            "template": {
                "metadata": { "labels": spec.labels },
                "spec": {
                    "nodeSelector": spec.node_selector,
                    "containers": [{
                        "name": "smesher",
                        "image": spec.image,
                        "imagePullPolicy": "IfNotPresent",
                        "ports": [
                            { "containerPort": spec.p2p_port, "name": "p2p" },
                            { "containerPort": spec.api_port, "name": "grpc" }
                        ],
                        "volumeMounts": [{ "name": "data", "mountPath": "/data" }],
                        "resources": {
                            "requests": { "cpu": CPU_REQUEST, "memory": MEMORY_REQUEST }
                        },
                        "env": [{ "name": "GOMAXPROCS", "value": "2" }],
                        "command": spec.command,
                    }]
                }
            }
        }
    })
}

pub fn pod(namespace: &str, spec: &PodSpec) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "labels": spec.labels,
        },
        "spec": {
            "nodeSelector": spec.node_selector,
            "containers": [{
                "name": spec.name,
                "image": spec.image,
                "args": spec.args,
                "ports": [{
                    "name": spec.port.name,
                    "protocol": "TCP",
                    "containerPort": spec.port.port
                }],
                "resources": {
                    "requests": { "cpu": CPU_REQUEST, "memory": MEMORY_REQUEST }
                }
            }]
        }
    })
}

pub fn partition(namespace: &str, spec: &PartitionSpec) -> Value {
    json!({
        "apiVersion": format!("{CHAOS_GROUP}/{CHAOS_VERSION}"),
        "kind": "NetworkChaos",
        "metadata": { "name": spec.name, "namespace": namespace },
        "spec": {
            "action": "partition",
            "mode": "all",
            "selector": { "pods": { namespace: spec.selector } },
            "direction": "both",
            "target": {
                "mode": "all",
                "selector": { "pods": { namespace: spec.target } }
            }
        }
    })
}

pub fn failure(namespace: &str, spec: &FailureSpec) -> Value {
    json!({
        "apiVersion": format!("{CHAOS_GROUP}/{CHAOS_VERSION}"),
        "kind": "PodChaos",
        "metadata": { "name": spec.name, "namespace": namespace },
        "spec": {
            "action": "pod-failure",
            "mode": "all",
            "selector": { "pods": { namespace: spec.targets } }
        }
    })
}
