//! Core library for the admission gate
//!
//! This crate provides:
//! - The admission decision engine (budget arithmetic, health probes)
//! - Coordination-store records, keys and locking
//! - The `Smooth` drain-policy CRD
//! - Reconciliation sweeps that finish deletions asynchronously
//! - Store liveness and Prometheus observability

pub mod admission;
pub mod budget;
pub mod cluster;
pub mod crd;
pub mod engine;
pub mod error;
pub mod health;
pub mod keys;
pub mod metrics;
pub mod probe;
pub mod store;
pub mod sweep;
pub mod workload;

#[cfg(test)]
mod testutil;

pub use admission::{AdmissionRequest, AdmissionReview, Verdict};
pub use cluster::{ClusterApi, KubeCluster};
pub use engine::SmoothEngine;
pub use error::GateError;
pub use health::{HealthzResponse, StoreHealth};
pub use metrics::GateMetrics;
pub use store::{CoordinationStore, MemoryStore, RedisStore};
pub use sweep::{DeleteSweep, DrainSweep};
