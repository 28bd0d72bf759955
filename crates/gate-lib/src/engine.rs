//! Admission decision engine
//!
//! Answers "may this pod be deleted?" for one admission request. First
//! attempts take the per-owner lock, check the concurrency budget and begin
//! smoothing; repeat attempts skip straight to the health checks using the
//! records committed earlier. Every error before a decision denies — the
//! gate never fails open.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use tracing::{error, info, warn};

use crate::admission::{AdmissionRequest, Verdict};
use crate::budget::{daemon_set_budget, deployment_budget, replica_set_budget, BudgetVerdict};
use crate::cluster::ClusterApi;
use crate::crd::{Smooth, FORCE_DELETE_LABEL, SMOOTHED_VALUE};
use crate::error::GateError;
use crate::keys;
use crate::probe::{ProbeRunner, ProbeTarget};
use crate::store::{CoordinationStore, Lock};
use crate::workload::{self, WorkloadKind, WorkloadRef};

/// Grace wait after a pod first proves drained, to outlast in-flight
/// connections the network layer may still be routing toward it.
const NOT_READY_GRACE: Duration = Duration::from_secs(5);

pub struct SmoothEngine {
    store: Arc<dyn CoordinationStore>,
    cluster: Arc<dyn ClusterApi>,
    probes: ProbeRunner,
    not_ready_grace: Duration,
}

impl SmoothEngine {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        cluster: Arc<dyn ClusterApi>,
    ) -> Result<Self, GateError> {
        Ok(Self {
            store,
            cluster,
            probes: ProbeRunner::new()?,
            not_ready_grace: NOT_READY_GRACE,
        })
    }

    /// Shorten the post-drain grace wait; test hook.
    pub fn with_not_ready_grace(mut self, grace: Duration) -> Self {
        self.not_ready_grace = grace;
        self
    }

    /// Decide one admission request. Only pod DELETE operations are in this
    /// gate's decision domain; everything else is denied with a diagnostic.
    pub async fn decide(&self, request: &AdmissionRequest) -> Verdict {
        if request.kind.kind != "Pod" {
            return Verdict::denied(format!("FAILURE: KIND[{}]", request.kind.kind));
        }
        if request.operation != "DELETE" {
            return Verdict::denied(format!("FAILURE: OPERATION[{}]", request.operation));
        }

        let pod: Pod = match serde_json::from_value(request.old_object.clone()) {
            Ok(pod) => pod,
            Err(err) => {
                error!(
                    namespace = %request.namespace,
                    pod = %request.name,
                    error = %err,
                    "Admission request carried an undecodable pod"
                );
                return Verdict::denied(GateError::Protocol(err.to_string()).to_string());
            }
        };

        let verdict = match self.admit_pod(&pod).await {
            Ok(verdict) => verdict,
            Err(err) => Verdict::denied(err.to_string()),
        };

        info!(
            namespace = %request.namespace,
            pod = %request.name,
            allowed = verdict.allowed,
            reason = %verdict.reason,
            "Admission verdict"
        );
        verdict
    }

    async fn admit_pod(&self, pod: &Pod) -> Result<Verdict, GateError> {
        // Pods already terminating or never scheduled need no drain.
        if pod.metadata.deletion_timestamp.is_some() {
            return Ok(Verdict::allowed("{pod DeletionTimestamp not null}"));
        }
        match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
            Some("Pending") => return Ok(Verdict::allowed("{pod status Pending}")),
            Some("Failed") => {
                let reason = pod
                    .status
                    .as_ref()
                    .and_then(|s| s.reason.clone())
                    .unwrap_or_default();
                return Ok(Verdict::allowed(format!("{{pod status Failed/{reason}}}")));
            }
            _ => {}
        }

        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();

        let record_exists = self
            .store
            .get(&keys::pod_record_key(&namespace, &name))
            .await?
            .is_some();
        let label_cached = match self.store.get(&keys::label_record_key(&namespace, &name)).await {
            Ok(value) => value.is_some(),
            Err(error) => {
                warn!(%namespace, pod = %name, %error, "Cached config lookup failed");
                false
            }
        };

        let verdict = if record_exists || label_cached {
            // Re-entrant check: this pod is already smoothing.
            self.run_smoothing(pod, &namespace, &name).await?
        } else {
            // First attempt: prove the owner chain resolves before locking.
            let owner = workload::pod_owner(pod)?;
            let _ =
                workload::resolve_target(self.cluster.as_ref(), &namespace, &owner).await?;

            let lock_key = keys::owner_lock_key(owner.kind.as_str(), &namespace, &owner.name);
            let lock = Lock::acquire(self.store.as_ref(), &lock_key).await?;
            info!(
                workload = %format!("{namespace}/{}/{}", owner.kind, owner.name),
                pod = %name,
                "Smoothing first attempt"
            );

            // Budget and health form one critical section: a sibling request
            // must not count records until this one has committed its own.
            let outcome = self.first_attempt(pod, &namespace, &name, &owner).await;
            lock.release(self.store.as_ref()).await;
            outcome?
        };

        // Only smoothing-path approvals leave the marker; terminal-state
        // short-circuits returned above and leave no records at all.
        if verdict.allowed {
            self.mark_delete_approved(&namespace, &name).await;
        }
        Ok(verdict)
    }

    async fn first_attempt(
        &self,
        pod: &Pod,
        namespace: &str,
        name: &str,
        owner: &WorkloadRef,
    ) -> Result<Verdict, GateError> {
        let drain_count = self.count_draining(namespace, &owner.name).await?;

        let budget = if drain_count < 1 || force_delete(pod) {
            info!(
                workload = %format!("{namespace}/{}/{}", owner.kind, owner.name),
                drain_count,
                "Budget check passed unconditionally"
            );
            None
        } else {
            Some(self.check_budget(namespace, owner, drain_count).await?)
        };

        if let Some(budget) = budget {
            if !budget.allowed {
                return Ok(Verdict::denied(budget.reason));
            }
        }
        self.run_smoothing(pod, namespace, name).await
    }

    async fn check_budget(
        &self,
        namespace: &str,
        owner: &WorkloadRef,
        drain_count: i32,
    ) -> Result<BudgetVerdict, GateError> {
        match owner.kind {
            WorkloadKind::DaemonSet => {
                let set = self.cluster.get_daemon_set(namespace, &owner.name).await?;
                daemon_set_budget(&set, drain_count)
            }
            WorkloadKind::Deployment => {
                let dep = self.cluster.get_deployment(namespace, &owner.name).await?;
                deployment_budget(&dep, drain_count)
            }
            WorkloadKind::ReplicaSet => {
                let set = self.cluster.get_replica_set(namespace, &owner.name).await?;
                let owner_dep = match owner_deployment_name(&set) {
                    Some(dep_name) => match self.cluster.get_deployment(namespace, &dep_name).await
                    {
                        Ok(dep) => Some(dep),
                        Err(error) => {
                            warn!(%namespace, deployment = %dep_name, %error, "Owner Deployment lookup failed");
                            None
                        }
                    },
                    None => None,
                };
                replica_set_budget(&set, owner_dep.as_ref(), drain_count)
            }
        }
    }

    /// Count drain records belonging to this owner. Prefix scanning alone
    /// over-matches owners whose names share a prefix, so the decoded owner
    /// field is compared exactly.
    async fn count_draining(&self, namespace: &str, owner_name: &str) -> Result<i32, GateError> {
        let prefix = format!("{}{namespace}_", keys::POD_RECORD_PREFIX);
        let record_keys = self.store.keys_with_prefix(&prefix).await?;

        let mut count = 0;
        for key in record_keys {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let record = keys::PodRecord::decode(&raw)?;
            if record.owner_name == owner_name {
                count += 1;
            }
        }
        Ok(count)
    }

    /// The health phase: resolve policy, commit the drain record, run the
    /// rules, and require the pod to have left the endpoint rotation.
    async fn run_smoothing(
        &self,
        pod: &Pod,
        namespace: &str,
        name: &str,
    ) -> Result<Verdict, GateError> {
        let label_key = keys::label_record_key(namespace, name);
        let cached = self.load_cached_config(&label_key, namespace, name).await;
        let had_cache = cached.is_some();

        let config = match cached {
            Some(config) => Some(config),
            None => self.lookup_config(pod, namespace).await?,
        };
        let Some(config) = config else {
            return Ok(Verdict::allowed(format!(
                "Smooth Config NOT SET[{namespace}/{name}]"
            )));
        };

        self.commit_drain_record(pod, namespace, name, config.spec.interval_secs())
            .await?;

        let mut reasons: Vec<String> = Vec::new();
        for rule in &config.spec.rules {
            let target = ProbeTarget::resolve(rule, pod)?;
            match self.probes.fetch(&target, rule).await {
                Err(err) => {
                    reasons.push(format!("{{{err}}}"));
                    return Ok(Verdict::denied(reasons.join(",")));
                }
                Ok(body) => {
                    reasons.push(format!(
                        "{{{} {}{} {}}}",
                        target.method, target.port, rule.path, body
                    ));
                    if body != rule.expect.trim() {
                        return Ok(Verdict::denied(reasons.join(",")));
                    }
                }
            }
        }

        // Every rule matched; the pod must also have left the ready set.
        if pod_is_ready(pod) {
            reasons.push("{pod status Ready}".to_string());
            return Ok(Verdict::denied(reasons.join(",")));
        }

        if let Some(denial) = self
            .mark_smoothed(pod, namespace, name, &config, had_cache, &mut reasons)
            .await
        {
            return Ok(denial);
        }

        self.wait_not_ready_grace(namespace, name).await?;
        Ok(Verdict::allowed(reasons.join(",")))
    }

    /// Best-effort read of the cached policy; store or decode trouble falls
    /// through to re-resolution.
    async fn load_cached_config(
        &self,
        label_key: &str,
        namespace: &str,
        name: &str,
    ) -> Option<Smooth> {
        match self.store.get(label_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(config) => Some(config),
                Err(error) => {
                    warn!(%namespace, pod = %name, %error, "Cached config undecodable, re-resolving");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(%namespace, pod = %name, %error, "Cached config read failed, re-resolving");
                None
            }
        }
    }

    async fn lookup_config(
        &self,
        pod: &Pod,
        namespace: &str,
    ) -> Result<Option<Smooth>, GateError> {
        let owner = workload::pod_owner(pod)?;
        let target = workload::resolve_target(self.cluster.as_ref(), namespace, &owner).await?;
        let configs = self.cluster.list_smooth_configs(namespace).await?;
        Ok(configs.into_iter().find(|config| {
            config.spec.target_ref.kind == target.kind.as_str()
                && config.spec.target_ref.name == target.name
        }))
    }

    /// Commit the PodRecord once per pod. On the first attempt this runs
    /// under the owner lock, so sibling requests observe the new count.
    async fn commit_drain_record(
        &self,
        pod: &Pod,
        namespace: &str,
        name: &str,
        interval_secs: u64,
    ) -> Result<(), GateError> {
        let record_key = keys::pod_record_key(namespace, name);
        if self.store.get(&record_key).await?.is_some() {
            return Ok(());
        }
        // Only pods with an unambiguous controller get a record.
        let Ok(owner) = workload::pod_owner(pod) else {
            return Ok(());
        };
        let record =
            keys::PodRecord::new(namespace, &owner.name, interval_secs, Utc::now().timestamp());
        if self.store.set_nx(&record_key, &record.encode()).await? {
            info!(key = %record_key, value = %record.encode(), "Drain record committed");
        }
        Ok(())
    }

    /// Patch the policy label onto the pod so replica counting ignores it,
    /// and cache the resolved config for repeat admission calls. A failed
    /// patch denies: an unlabeled pod would be re-counted next check.
    async fn mark_smoothed(
        &self,
        pod: &Pod,
        namespace: &str,
        name: &str,
        config: &Smooth,
        had_cache: bool,
        reasons: &mut Vec<String>,
    ) -> Option<Verdict> {
        let label_name = &config.spec.sm_label;
        if label_name.is_empty() {
            return None;
        }
        let mut labels: BTreeMap<String, String> =
            pod.metadata.labels.clone().unwrap_or_default();
        if labels.get(label_name).map(String::as_str) == Some(SMOOTHED_VALUE) {
            return None;
        }
        let _ = labels.insert(label_name.clone(), SMOOTHED_VALUE.to_string());

        if let Err(error) = self.cluster.patch_pod_labels(namespace, name, labels).await {
            reasons.push(format!("{{smoothLabel set [{error}]}}"));
            return Some(Verdict::denied(reasons.join(",")));
        }

        if !had_cache {
            let serialized = match serde_json::to_string(config) {
                Ok(json) => json,
                Err(error) => {
                    reasons.push(format!("{{SmConfig Marshal [{error}]}}"));
                    return Some(Verdict::denied(reasons.join(",")));
                }
            };
            let label_key = keys::label_record_key(namespace, name);
            if let Err(error) = self.store.set_nx(&label_key, &serialized).await {
                reasons.push(format!("{{SmConfig set [{error}]}}"));
                return Some(Verdict::denied(reasons.join(",")));
            }
        }
        None
    }

    /// One-time wait before the first approval, to outlast connections still
    /// draining toward the terminating pod.
    async fn wait_not_ready_grace(&self, namespace: &str, name: &str) -> Result<(), GateError> {
        let grace_key = keys::not_ready_key(namespace, name);
        if self.store.get(&grace_key).await?.is_none() {
            tokio::time::sleep(self.not_ready_grace).await;
            let epoch = Utc::now().timestamp().to_string();
            if self.store.set_nx(&grace_key, &epoch).await? {
                info!(key = %grace_key, "Not-ready grace recorded");
            }
        }
        Ok(())
    }

    /// Record the approval for the reconciliation loops. The verdict is
    /// already reached; a failed write is logged, not folded back in.
    async fn mark_delete_approved(&self, namespace: &str, name: &str) {
        let key = keys::delete_record_key(namespace, name);
        match self.store.set_nx(&key, "1").await {
            Ok(true) => info!(%key, "Delete record committed"),
            Ok(false) => {}
            Err(error) => error!(%key, %error, "Delete record write failed"),
        }
    }
}

fn force_delete(pod: &Pod) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(FORCE_DELETE_LABEL))
        .map(|value| value == "true" || value == "1")
        .unwrap_or(false)
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|cond| cond.type_ == "Ready" && cond.status == "True")
        })
        .unwrap_or(false)
}

fn owner_deployment_name(set: &k8s_openapi::api::apps::v1::ReplicaSet) -> Option<String> {
    let refs = set.metadata.owner_references.as_deref().unwrap_or(&[]);
    match refs {
        [only] if only.kind == "Deployment" => Some(only.name.clone()),
        _ => None,
    }
}
