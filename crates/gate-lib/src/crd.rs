//! `Smooth` Custom Resource Definition: per-workload draining policy

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_METHOD: &str = "get";

/// Label value written onto a pod once its traffic is proven drained.
pub const SMOOTHED_VALUE: &str = "smoothed";

/// Pods carrying this label with value `true` or `1` bypass the budget check.
pub const FORCE_DELETE_LABEL: &str = "admitee.io/force-delete";

/// Workload the policy applies to, matched by resolved owner kind and name.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct TargetRef {
    pub kind: String,
    pub name: String,
}

/// One health check: an HTTP call whose trimmed response must equal `expect`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct Rule {
    /// Request address; defaults to the pod IP
    #[serde(default)]
    pub address: String,
    /// Request port; 0 falls back to the pod's first container port, then 80
    #[serde(default)]
    pub port: u16,
    /// Request path; required
    #[serde(default)]
    pub path: String,
    /// `get` or `post`, case-insensitive; defaults to `get`
    #[serde(default)]
    pub method: String,
    /// Request body; required for `post`
    #[serde(default)]
    pub body: String,
    /// Expected response body
    #[serde(default)]
    pub expect: String,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "admitee.io", version = "v1alpha1", kind = "Smooth")]
#[kube(namespaced)]
pub struct SmoothSpec {
    #[serde(rename = "targetRef")]
    pub target_ref: TargetRef,
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Seconds between deletion retries; 0 means the 60s default
    #[serde(default)]
    pub interval: u64,
    /// Drain timeout in seconds; 0 means the 60s default
    #[serde(default)]
    pub timeout: u64,
    /// Label name flipped to `smoothed` once traffic is drained
    #[serde(rename = "smLabel", default)]
    pub sm_label: String,
}

impl SmoothSpec {
    pub fn interval_secs(&self) -> u64 {
        if self.interval > 0 {
            self.interval
        } else {
            DEFAULT_INTERVAL_SECS
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        if self.timeout > 0 {
            self.timeout
        } else {
            DEFAULT_TIMEOUT_SECS
        }
    }
}
