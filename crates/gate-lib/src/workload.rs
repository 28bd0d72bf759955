//! Owner-reference resolution
//!
//! The gate understands exactly three workload kinds. A pod's direct owner
//! drives locking and drain counting; policy lookup additionally resolves a
//! ReplicaSet one hop further to its Deployment.

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::cluster::ClusterApi;
use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    ReplicaSet,
}

impl WorkloadKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "DaemonSet" => Some(Self::DaemonSet),
            "Deployment" => Some(Self::Deployment),
            "ReplicaSet" => Some(Self::ReplicaSet),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DaemonSet => "DaemonSet",
            Self::Deployment => "Deployment",
            Self::ReplicaSet => "ReplicaSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
}

fn sole_reference(refs: &[OwnerReference]) -> Result<&OwnerReference, GateError> {
    match refs {
        [] => Err(GateError::NoTarget),
        [only] => Ok(only),
        _ => Err(GateError::TooManyTargets),
    }
}

/// The pod's direct controller. Zero or multiple owner references, or an
/// owner kind outside the taxonomy, are terminal errors.
pub fn pod_owner(pod: &Pod) -> Result<WorkloadRef, GateError> {
    let refs = pod.metadata.owner_references.as_deref().unwrap_or(&[]);
    let owner = sole_reference(refs)?;
    let kind = WorkloadKind::parse(&owner.kind).ok_or_else(|| {
        GateError::WorkloadLookup(format!("unsupported owner kind [{}]", owner.kind))
    })?;
    Ok(WorkloadRef {
        kind,
        name: owner.name.clone(),
    })
}

/// One-hop resolution: a ReplicaSet owned by exactly one Deployment resolves
/// to that Deployment; an orphan ReplicaSet stands for itself.
pub async fn resolve_target(
    cluster: &dyn ClusterApi,
    namespace: &str,
    owner: &WorkloadRef,
) -> Result<WorkloadRef, GateError> {
    match owner.kind {
        WorkloadKind::DaemonSet | WorkloadKind::Deployment => Ok(owner.clone()),
        WorkloadKind::ReplicaSet => {
            let replica_set = cluster.get_replica_set(namespace, &owner.name).await?;
            let refs = replica_set
                .metadata
                .owner_references
                .as_deref()
                .unwrap_or(&[]);
            match refs {
                [] => Ok(owner.clone()),
                [only] if only.kind == "Deployment" => Ok(WorkloadRef {
                    kind: WorkloadKind::Deployment,
                    name: only.name.clone(),
                }),
                [only] => Err(GateError::WorkloadLookup(format!(
                    "unexpected ReplicaSet owner kind [{}]",
                    only.kind
                ))),
                _ => Err(GateError::TooManyTargets),
            }
        }
    }
}
