//! Cluster API seam
//!
//! The engine and the sweeps talk to Kubernetes through this trait so the
//! decision logic can be exercised against a fake in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};

use crate::crd::Smooth;
use crate::error::GateError;

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// `Ok(None)` means the pod is confirmed absent, as opposed to an API
    /// failure, which the sweeps must not mistake for deletion.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, GateError>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), GateError>;

    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), GateError>;

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, GateError>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, GateError>;

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, GateError>;

    async fn list_smooth_configs(&self, namespace: &str) -> Result<Vec<Smooth>, GateError>;
}

/// Live implementation backed by a [`kube::Client`].
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

fn lookup_failed(err: kube::Error) -> GateError {
    GateError::WorkloadLookup(err.to_string())
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, GateError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match pods.get(name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(err) if is_not_found(&err) => Ok(None),
            Err(err) => Err(lookup_failed(err)),
        }
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), GateError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let _ = pods
            .delete(name, &DeleteParams::default())
            .await
            .map_err(lookup_failed)?;
        Ok(())
    }

    async fn patch_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        labels: BTreeMap<String, String>,
    ) -> Result<(), GateError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({"metadata": {"labels": labels}});
        let _ = pods
            .patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .map_err(lookup_failed)?;
        Ok(())
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet, GateError> {
        let sets: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        sets.get(name).await.map_err(lookup_failed)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, GateError> {
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        deployments.get(name).await.map_err(lookup_failed)
    }

    async fn get_replica_set(&self, namespace: &str, name: &str) -> Result<ReplicaSet, GateError> {
        let sets: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        sets.get(name).await.map_err(lookup_failed)
    }

    async fn list_smooth_configs(&self, namespace: &str) -> Result<Vec<Smooth>, GateError> {
        let configs: Api<Smooth> = Api::namespaced(self.client.clone(), namespace);
        let list = configs
            .list(&ListParams::default())
            .await
            .map_err(lookup_failed)?;
        Ok(list.items)
    }
}
