//! Reconciliation loops
//!
//! Two background workers complete what admission starts. The drain sweep
//! retries deletion of pods whose drain interval has elapsed and retires
//! records that hit their retry budget; the delete sweep garbage-collects
//! the record pair once a pod is observed gone. Each loop serializes with
//! its peers in other replicas through a global store lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cluster::ClusterApi;
use crate::error::GateError;
use crate::keys::{self, PodRecord, PodRef};
use crate::metrics::GateMetrics;
use crate::store::{CoordinationStore, Lock};

const DRAIN_TICK: Duration = Duration::from_secs(10);
const DELETE_TICK: Duration = Duration::from_secs(1);

/// Retries pod deletion for due drain records and retires terminal ones.
pub struct DrainSweep {
    store: Arc<dyn CoordinationStore>,
    cluster: Arc<dyn ClusterApi>,
    metrics: GateMetrics,
}

impl DrainSweep {
    pub fn new(store: Arc<dyn CoordinationStore>, cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            store,
            cluster,
            metrics: GateMetrics::new(),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = DRAIN_TICK.as_secs(), "Starting drain sweep");
        let mut ticker = tokio::time::interval(DRAIN_TICK);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        warn!(%error, "Drain sweep tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down drain sweep");
                    break;
                }
            }
        }
    }

    /// One full pass over the drain records. Skipped entirely when another
    /// replica holds the loop lock.
    async fn sweep_once(&self) -> Result<(), GateError> {
        if !self.store.try_lock(keys::DRAIN_LOOP_LOCK).await? {
            return Ok(());
        }
        let record_keys = self
            .store
            .keys_with_prefix(keys::POD_RECORD_PREFIX)
            .await?;
        for key in &record_keys {
            if let Err(error) = self.reconcile_record(key).await {
                warn!(%key, %error, "Drain record reconciliation failed");
            }
        }
        let _ = self.store.delete(keys::DRAIN_LOOP_LOCK).await?;
        Ok(())
    }

    async fn reconcile_record(&self, key: &str) -> Result<(), GateError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(());
        };
        // An undecodable record would poison every future scan; retire it.
        let (pod_ref, mut record) =
            match keys::parse_record_key(key, keys::POD_RECORD_PREFIX)
                .ok_or_else(|| GateError::Store(format!("malformed record key [{key}]")))
                .and_then(|pod_ref| Ok((pod_ref, PodRecord::decode(&raw)?)))
            {
                Ok(parsed) => parsed,
                Err(error) => {
                    warn!(%key, %error, "Removing undecodable drain record");
                    let _ = self.store.delete(key).await?;
                    self.metrics.record_cleared("drain");
                    return Ok(());
                }
            };

        // Records wait out their interval untouched; only due ones are
        // acted on, terminal cleanup included.
        let now = Utc::now().timestamp();
        if !record.due(now) {
            return Ok(());
        }

        let pod_exists = self
            .cluster
            .get_pod(&pod_ref.namespace, &pod_ref.name)
            .await?
            .is_some();
        let mut deleted = false;

        if pod_exists {
            match self
                .cluster
                .delete_pod(&pod_ref.namespace, &pod_ref.name)
                .await
            {
                Ok(()) => {
                    info!(namespace = %pod_ref.namespace, pod = %pod_ref.name, "Drained pod deleted");
                    self.metrics.record_pod_delete(true);
                    deleted = true;
                }
                Err(error) => {
                    warn!(
                        namespace = %pod_ref.namespace,
                        pod = %pod_ref.name,
                        retry = record.retry_count + 1,
                        %error,
                        "Pod delete failed, rescheduling"
                    );
                    self.metrics.record_pod_delete(false);
                    record.retry_count += 1;
                    record.last_attempt = now;
                    self.store.set(key, &record.encode()).await?;
                }
            }
        }

        // Terminal: pod gone, delete just landed, or retry budget spent.
        // The delete sweep owns cleanup while an approval marker remains.
        let terminal = !pod_exists || deleted || record.expired();
        if terminal {
            let marker = keys::delete_record_key(&pod_ref.namespace, &pod_ref.name);
            if !self.store.exists(&marker).await? {
                let _ = self.store.delete(key).await?;
                self.metrics.record_cleared("drain");
                info!(%key, "Drain record retired");
            }
        }
        Ok(())
    }
}

/// Removes the record pair once an approved pod is observed gone.
pub struct DeleteSweep {
    store: Arc<dyn CoordinationStore>,
    cluster: Arc<dyn ClusterApi>,
    metrics: GateMetrics,
}

impl DeleteSweep {
    pub fn new(store: Arc<dyn CoordinationStore>, cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            store,
            cluster,
            metrics: GateMetrics::new(),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = DELETE_TICK.as_secs(), "Starting delete sweep");
        let mut ticker = tokio::time::interval(DELETE_TICK);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        warn!(%error, "Delete sweep tick failed");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down delete sweep");
                    break;
                }
            }
        }
    }

    async fn sweep_once(&self) -> Result<(), GateError> {
        if !self.store.try_lock(keys::DELETE_LOOP_LOCK).await? {
            return Ok(());
        }
        let record_keys = self
            .store
            .keys_with_prefix(keys::DELETE_RECORD_PREFIX)
            .await?;
        for key in &record_keys {
            if let Err(error) = self.reconcile_record(key).await {
                warn!(%key, %error, "Delete record reconciliation failed");
            }
        }
        let _ = self.store.delete(keys::DELETE_LOOP_LOCK).await?;
        Ok(())
    }

    async fn reconcile_record(&self, key: &str) -> Result<(), GateError> {
        let Some(pod_ref) = keys::parse_record_key(key, keys::DELETE_RECORD_PREFIX) else {
            warn!(%key, "Removing malformed delete record key");
            let _ = self.store.delete(key).await?;
            return Ok(());
        };
        if self
            .cluster
            .get_pod(&pod_ref.namespace, &pod_ref.name)
            .await?
            .is_some()
        {
            return Ok(());
        }

        // Both records go together; the drain lock keeps a concurrent
        // drain-sweep retry from resurrecting the pod record mid-removal.
        let lock = Lock::acquire(self.store.as_ref(), keys::DRAIN_LOOP_LOCK).await?;
        let outcome = self.remove_pair(key, &pod_ref).await;
        lock.release(self.store.as_ref()).await;
        outcome
    }

    async fn remove_pair(&self, key: &str, pod_ref: &PodRef) -> Result<(), GateError> {
        let pod_key = keys::pod_record_key(&pod_ref.namespace, &pod_ref.name);
        let _ = self.store.delete(&pod_key).await?;
        let _ = self.store.delete(key).await?;
        self.metrics.record_cleared("delete");
        info!(
            namespace = %pod_ref.namespace,
            pod = %pod_ref.name,
            "Deleted pod's records cleared"
        );
        Ok(())
    }
}
