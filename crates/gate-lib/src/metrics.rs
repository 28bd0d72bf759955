//! Prometheus metrics for the gate

use prometheus::{register_int_counter_vec, register_int_gauge, IntCounterVec, IntGauge};
use std::sync::OnceLock;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GateMetricsInner> = OnceLock::new();

struct GateMetricsInner {
    admission_decisions: IntCounterVec,
    pods_deleted: IntCounterVec,
    records_cleared: IntCounterVec,
    store_up: IntGauge,
}

impl GateMetricsInner {
    fn new() -> Self {
        Self {
            admission_decisions: register_int_counter_vec!(
                "admitee_gate_admission_decisions_total",
                "Admission verdicts returned, labelled by outcome",
                &["outcome"]
            )
            .expect("Failed to register admission_decisions_total"),

            pods_deleted: register_int_counter_vec!(
                "admitee_gate_pods_deleted_total",
                "Asynchronous pod deletions attempted by the drain sweep",
                &["outcome"]
            )
            .expect("Failed to register pods_deleted_total"),

            records_cleared: register_int_counter_vec!(
                "admitee_gate_records_cleared_total",
                "Coordination records garbage-collected, labelled by sweep",
                &["sweep"]
            )
            .expect("Failed to register records_cleared_total"),

            store_up: register_int_gauge!(
                "admitee_gate_store_up",
                "Whether the coordination store answered its last ping"
            )
            .expect("Failed to register store_up"),
        }
    }
}

/// Cheap handle to the process-wide metrics.
#[derive(Clone, Copy, Default)]
pub struct GateMetrics;

impl GateMetrics {
    pub fn new() -> Self {
        let _ = GLOBAL_METRICS.get_or_init(GateMetricsInner::new);
        Self
    }

    fn inner(&self) -> &'static GateMetricsInner {
        GLOBAL_METRICS.get_or_init(GateMetricsInner::new)
    }

    pub fn record_decision(&self, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        self.inner()
            .admission_decisions
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_pod_delete(&self, succeeded: bool) {
        let outcome = if succeeded { "deleted" } else { "failed" };
        self.inner()
            .pods_deleted
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_cleared(&self, sweep: &str) {
        self.inner()
            .records_cleared
            .with_label_values(&[sweep])
            .inc();
    }

    pub fn set_store_up(&self, up: bool) {
        self.inner().store_up.set(i64::from(up));
    }
}
