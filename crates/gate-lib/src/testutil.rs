//! Shared fixtures for the library's unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetStatus, DaemonSetUpdateStrategy, Deployment,
    DeploymentSpec, DeploymentStatus, DeploymentStrategy, ReplicaSet, ReplicaSetSpec,
    ReplicaSetStatus, RollingUpdateDaemonSet, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Pod, PodCondition, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::cluster::ClusterApi;
use crate::crd::Smooth;
use crate::error::GateError;

pub fn pod_with_owner(namespace: &str, name: &str, owner_kind: &str, owner_name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: owner_kind.to_string(),
                name: owner_name.to_string(),
                uid: "owner-uid".to_string(),
                ..OwnerReference::default()
            }]),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ports: Some(vec![ContainerPort {
                    container_port: 8080,
                    ..ContainerPort::default()
                }]),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            pod_ip: Some("10.0.0.9".to_string()),
            ..PodStatus::default()
        }),
    }
}

pub fn pod_with_ip(namespace: &str, name: &str, ip: &str) -> Pod {
    let mut pod = pod_with_owner(namespace, name, "ReplicaSet", "owner");
    if let Some(status) = pod.status.as_mut() {
        status.pod_ip = Some(ip.to_string());
    }
    pod
}

pub fn set_ready(pod: &mut Pod, ready: bool) {
    if let Some(status) = pod.status.as_mut() {
        status.conditions = Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            ..PodCondition::default()
        }]);
    }
}

pub fn set_phase(pod: &mut Pod, phase: &str) {
    if let Some(status) = pod.status.as_mut() {
        status.phase = Some(phase.to_string());
    }
}

pub fn daemon_set(desired: i32, max_unavailable: Option<IntOrString>) -> DaemonSet {
    DaemonSet {
        spec: Some(DaemonSetSpec {
            update_strategy: Some(DaemonSetUpdateStrategy {
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable,
                    ..RollingUpdateDaemonSet::default()
                }),
                ..DaemonSetUpdateStrategy::default()
            }),
            ..DaemonSetSpec::default()
        }),
        status: Some(DaemonSetStatus {
            desired_number_scheduled: desired,
            ..DaemonSetStatus::default()
        }),
        ..DaemonSet::default()
    }
}

pub fn deployment(
    desired: i32,
    available: i32,
    max_unavailable: Option<IntOrString>,
    max_surge: Option<IntOrString>,
) -> Deployment {
    Deployment {
        spec: Some(DeploymentSpec {
            replicas: Some(desired),
            strategy: Some(DeploymentStrategy {
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable,
                    max_surge,
                }),
                ..DeploymentStrategy::default()
            }),
            ..DeploymentSpec::default()
        }),
        status: Some(DeploymentStatus {
            available_replicas: Some(available),
            ..DeploymentStatus::default()
        }),
        ..Deployment::default()
    }
}

pub fn replica_set(
    namespace: &str,
    name: &str,
    owner_deployment: Option<&str>,
    desired: i32,
    observed: i32,
) -> ReplicaSet {
    ReplicaSet {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            owner_references: owner_deployment.map(|owner| {
                vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: owner.to_string(),
                    uid: "dep-uid".to_string(),
                    ..OwnerReference::default()
                }]
            }),
            ..ObjectMeta::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(desired),
            ..ReplicaSetSpec::default()
        }),
        status: Some(ReplicaSetStatus {
            replicas: observed,
            ..ReplicaSetStatus::default()
        }),
    }
}

type Key = (String, String);

/// In-memory [`ClusterApi`] for engine and sweep tests.
#[derive(Default)]
pub struct FakeCluster {
    pub pods: Mutex<HashMap<Key, Pod>>,
    pub daemon_sets: Mutex<HashMap<Key, DaemonSet>>,
    pub deployments: Mutex<HashMap<Key, Deployment>>,
    pub replica_sets: Mutex<HashMap<Key, ReplicaSet>>,
    pub smooths: Mutex<HashMap<String, Vec<Smooth>>>,
    pub fail_deletes: AtomicBool,
    pub fail_patches: AtomicBool,
    pub deleted: Mutex<Vec<Key>>,
    pub patched: Mutex<Vec<(Key, BTreeMap<String, String>)>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        let _ = self.pods.lock().unwrap().insert(key, pod);
    }

    pub fn add_daemon_set(&self, namespace: &str, name: &str, set: DaemonSet) {
        let _ = self
            .daemon_sets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), set);
    }

    pub fn add_deployment(&self, namespace: &str, name: &str, dep: Deployment) {
        let _ = self
            .deployments
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), dep);
    }

    pub fn add_replica_set(
        &self,
        namespace: &str,
        name: &str,
        owner_deployment: Option<&str>,
        desired: i32,
        observed: i32,
    ) {
        let set = replica_set(namespace, name, owner_deployment, desired, observed);
        let _ = self
            .replica_sets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), set);
    }

    pub fn add_smooth(&self, namespace: &str, smooth: Smooth) {
        self.smooths
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push(smooth);
    }

    pub fn deleted_pods(&self) -> Vec<Key> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, GateError> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), GateError> {
        if self.fail_deletes.load(Ordering::Relaxed) {
            return Err(GateError::WorkloadLookup("delete refused".to_string()));
        }
        let key = (namespace.to_string(), name.to_string());
        let _ = self.pods.lock().unwrap().remove(&key);
        self.deleted.lock().unwrap().push(key);
        Ok(())
    }

    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), GateError> {
        if self.fail_patches.load(Ordering::Relaxed) {
            return Err(GateError::WorkloadLookup("patch refused".to_string()));
        }
        let key = (namespace.to_string(), name.to_string());
        if let Some(pod) = self.pods.lock().unwrap().get_mut(&key) {
            pod.metadata.labels = Some(labels.clone());
        }
        self.patched.lock().unwrap().push((key, labels));
        Ok(())
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, GateError> {
        self.daemon_sets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| GateError::WorkloadLookup(format!("DaemonSet [{namespace}/{name}] not found")))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, GateError> {
        self.deployments
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| GateError::WorkloadLookup(format!("Deployment [{namespace}/{name}] not found")))
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, GateError> {
        self.replica_sets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| GateError::WorkloadLookup(format!("ReplicaSet [{namespace}/{name}] not found")))
    }

    async fn list_smooth_configs(&self, namespace: &str) -> Result<Vec<Smooth>, GateError> {
        Ok(self
            .smooths
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}
