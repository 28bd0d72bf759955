//! Error taxonomy for the admission gate
//!
//! Every error reached before a decision folds into the denial reason;
//! the gate never fails open.

use thiserror::Error;

/// Errors produced by the decision path and the reconciliation sweeps.
#[derive(Debug, Error)]
pub enum GateError {
    /// Admission review body or embedded pod could not be decoded
    #[error("FAILURE: Decode[{0}]")]
    Protocol(String),

    /// Coordination store I/O or lock failure
    #[error("FAILURE: Store[{0}]")]
    Store(String),

    /// Pod carries no owner reference to resolve a workload from
    #[error("FAILURE: No OwnerReference Matched")]
    NoTarget,

    /// Owner reference chain is ambiguous at some hop
    #[error("FAILURE: Too Many Target Matched")]
    TooManyTargets,

    /// Workload or pod lookup against the cluster API failed
    #[error("FAILURE: Workload[{0}]")]
    WorkloadLookup(String),

    /// Rolling-update budget fields could not be parsed
    #[error("FAILURE: Budget[{0}]")]
    BudgetCompute(String),

    /// Health probe failed (network, timeout, non-2xx, bad rule)
    #[error("FAILURE: Probe[{0}]")]
    Probe(String),
}

impl From<redis::RedisError> for GateError {
    fn from(err: redis::RedisError) -> Self {
        GateError::Store(err.to_string())
    }
}
