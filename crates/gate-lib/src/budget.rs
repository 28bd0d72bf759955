//! Per-workload concurrency budgets
//!
//! Pure arithmetic over workload spec/status: given how many sibling pods
//! are already draining, how many may drain at once? A computed budget of 0
//! always normalizes to 1 so a busy workload can never be blocked forever.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::error::GateError;

/// Outcome of one budget check, with the human-readable reason reported to
/// the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetVerdict {
    pub allowed: bool,
    pub reason: String,
}

fn against_budget(kind: &str, drain_count: i32, budget: i32) -> BudgetVerdict {
    let budget = budget.max(1);
    if drain_count >= budget {
        BudgetVerdict {
            allowed: false,
            reason: format!("{kind} exceed maxUnavailable[{drain_count}/{budget}]"),
        }
    } else {
        BudgetVerdict {
            allowed: true,
            reason: format!("{kind} maxUnavailable[{drain_count}/{budget}]"),
        }
    }
}

/// Strip a trailing `%` and read the remainder as a fraction of `desired`.
fn percent_fraction(raw: &str) -> Result<f64, GateError> {
    let trimmed = raw.trim().trim_end_matches('%');
    let percent: f64 = trimmed
        .parse()
        .map_err(|_| GateError::BudgetCompute(format!("invalid percentage [{raw}]")))?;
    if !(0.0..=100.0).contains(&percent) {
        return Err(GateError::BudgetCompute(format!(
            "percentage out of range [{raw}]"
        )));
    }
    Ok(percent / 100.0)
}

fn resolve_floor(value: &IntOrString, desired: i32) -> Result<i32, GateError> {
    match value {
        IntOrString::Int(n) => Ok(*n),
        IntOrString::String(s) => Ok((f64::from(desired) * percent_fraction(s)?) as i32),
    }
}

fn resolve_ceil(value: &IntOrString, desired: i32) -> Result<i32, GateError> {
    match value {
        IntOrString::Int(n) => Ok(*n),
        IntOrString::String(s) => Ok((f64::from(desired) * percent_fraction(s)?).ceil() as i32),
    }
}

/// DaemonSet budget: `ceil(desiredScheduled * maxUnavailable%)`, floor 1.
pub fn daemon_set_budget(set: &DaemonSet, drain_count: i32) -> Result<BudgetVerdict, GateError> {
    let desired = set
        .status
        .as_ref()
        .map(|status| status.desired_number_scheduled)
        .unwrap_or(0);
    if desired <= 1 {
        return Ok(against_budget("DaemonSet", drain_count, 1));
    }

    let max_unavailable = set
        .spec
        .as_ref()
        .and_then(|spec| spec.update_strategy.as_ref())
        .and_then(|strategy| strategy.rolling_update.as_ref())
        .and_then(|rolling| rolling.max_unavailable.as_ref());

    let budget = match max_unavailable {
        Some(value) => resolve_ceil(value, desired)?,
        None => 1,
    };
    Ok(against_budget("DaemonSet", drain_count, budget))
}

/// Deployment budget: nothing to protect when no replica is available;
/// never drain below a single survivor; otherwise `maxUnavailable`, falling
/// back to `maxSurge`, falling back to 1.
pub fn deployment_budget(
    deployment: &Deployment,
    drain_count: i32,
) -> Result<BudgetVerdict, GateError> {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(0);
    let available = deployment
        .status
        .as_ref()
        .and_then(|status| status.available_replicas)
        .unwrap_or(0);

    if available == 0 {
        return Ok(BudgetVerdict {
            allowed: true,
            reason: "Deployment AvailableReplicas[0]".to_string(),
        });
    }
    if desired - drain_count <= 1 {
        return Ok(BudgetVerdict {
            allowed: false,
            reason: format!("Deployment Replicas/Smoothing[{desired}/{drain_count}]"),
        });
    }

    let rolling = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.strategy.as_ref())
        .and_then(|strategy| strategy.rolling_update.as_ref());

    let mut budget = match rolling.and_then(|r| r.max_unavailable.as_ref()) {
        Some(value) => resolve_floor(value, desired)?,
        None => 0,
    };
    if budget == 0 {
        budget = match rolling.and_then(|r| r.max_surge.as_ref()) {
            Some(value) => resolve_ceil(value, desired)?,
            None => 0,
        };
    }
    Ok(against_budget("Deployment", drain_count, budget))
}

/// ReplicaSet budget: an over-provisioned set may shed its surplus;
/// otherwise the owning Deployment's rule decides.
pub fn replica_set_budget(
    set: &ReplicaSet,
    owner: Option<&Deployment>,
    drain_count: i32,
) -> Result<BudgetVerdict, GateError> {
    let desired = set.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or(0);
    let observed = set
        .status
        .as_ref()
        .map(|status| status.replicas)
        .unwrap_or(0);

    let surplus = observed - desired;
    if surplus > 0 {
        return Ok(against_budget("ReplicaSet", drain_count, surplus));
    }
    match owner {
        Some(deployment) => deployment_budget(deployment, drain_count),
        None => Ok(against_budget("ReplicaSet", drain_count, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{daemon_set, deployment, replica_set};

    #[test]
    fn daemon_set_half_percent_budget() {
        let set = daemon_set(10, Some(IntOrString::String("50%".to_string())));
        let verdict = daemon_set_budget(&set, 4).unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, "DaemonSet maxUnavailable[4/5]");

        let verdict = daemon_set_budget(&set, 5).unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("5/5"));
    }

    #[test]
    fn daemon_set_percentage_rounds_up_and_floors_at_one() {
        let set = daemon_set(10, Some(IntOrString::String("15%".to_string())));
        // ceil(10 * 0.15) = 2
        assert_eq!(
            daemon_set_budget(&set, 1).unwrap().reason,
            "DaemonSet maxUnavailable[1/2]"
        );

        let set = daemon_set(10, Some(IntOrString::String("0%".to_string())));
        assert_eq!(
            daemon_set_budget(&set, 0).unwrap().reason,
            "DaemonSet maxUnavailable[0/1]"
        );
    }

    #[test]
    fn daemon_set_single_node_always_permits_first_drain() {
        let set = daemon_set(1, None);
        assert!(daemon_set_budget(&set, 0).unwrap().allowed);
        assert!(!daemon_set_budget(&set, 1).unwrap().allowed);
    }

    #[test]
    fn daemon_set_bad_percentage_is_a_compute_error() {
        let set = daemon_set(10, Some(IntOrString::String("half".to_string())));
        assert!(matches!(
            daemon_set_budget(&set, 0),
            Err(GateError::BudgetCompute(_))
        ));

        let set = daemon_set(10, Some(IntOrString::String("250%".to_string())));
        assert!(matches!(
            daemon_set_budget(&set, 0),
            Err(GateError::BudgetCompute(_))
        ));
    }

    #[test]
    fn deployment_with_no_available_replicas_permits() {
        let dep = deployment(4, 0, Some(IntOrString::Int(1)), None);
        let verdict = deployment_budget(&dep, 3).unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, "Deployment AvailableReplicas[0]");
    }

    #[test]
    fn deployment_never_drains_below_one_survivor() {
        let dep = deployment(4, 4, Some(IntOrString::Int(3)), None);
        let verdict = deployment_budget(&dep, 3).unwrap();
        assert!(!verdict.allowed);
        assert_eq!(verdict.reason, "Deployment Replicas/Smoothing[4/3]");
    }

    #[test]
    fn deployment_quarter_percent_floors_to_one() {
        let dep = deployment(4, 4, Some(IntOrString::String("25%".to_string())), None);
        assert!(deployment_budget(&dep, 0).unwrap().allowed);
        let verdict = deployment_budget(&dep, 1).unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("1/1"));
    }

    #[test]
    fn deployment_falls_back_to_surge_then_one() {
        // maxUnavailable 0 -> surge 25% of 10 rounds up to 3
        let dep = deployment(
            10,
            10,
            Some(IntOrString::Int(0)),
            Some(IntOrString::String("25%".to_string())),
        );
        assert_eq!(
            deployment_budget(&dep, 2).unwrap().reason,
            "Deployment maxUnavailable[2/3]"
        );

        // Everything zero -> budget normalizes to 1
        let dep = deployment(10, 10, Some(IntOrString::Int(0)), None);
        let verdict = deployment_budget(&dep, 2).unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.contains("2/1"));
    }

    #[test]
    fn replica_set_surplus_is_the_budget() {
        let set = replica_set("default", "web-6d5f8", Some("web"), 3, 5);
        let verdict = replica_set_budget(&set, None, 1).unwrap();
        assert!(verdict.allowed);
        assert_eq!(verdict.reason, "ReplicaSet maxUnavailable[1/2]");
    }

    #[test]
    fn replica_set_delegates_to_owner_deployment() {
        let set = replica_set("default", "web-6d5f8", Some("web"), 4, 4);
        let dep = deployment(4, 4, Some(IntOrString::String("25%".to_string())), None);
        let verdict = replica_set_budget(&set, Some(&dep), 1).unwrap();
        assert!(!verdict.allowed);
        assert!(verdict.reason.starts_with("Deployment"));
    }

    #[test]
    fn replica_set_without_owner_falls_back_to_one() {
        let set = replica_set("default", "solo", None, 3, 3);
        assert!(replica_set_budget(&set, None, 0).unwrap().allowed);
        assert!(!replica_set_budget(&set, None, 1).unwrap().allowed);
    }
}
