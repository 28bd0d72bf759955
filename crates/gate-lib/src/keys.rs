//! Coordination-store key and value codec
//!
//! The key scheme is shared by every gate replica and must stay bit-exact:
//!
//! - `ADMITEE_SMOOTH_POD_<ns>_<pod>`      -> drain record (see [`PodRecord`])
//! - `ADMITEE_SMOOTH_DEL_<ns>_<pod>`      -> `1`, written once admission approved
//! - `ADMITEE_SMOOTH_LABEL_<ns>_<pod>`    -> cached Smooth config (JSON)
//! - `ADMITEE_SMOOTH_NOTREADY_<ns>_<pod>` -> epoch of the one-time grace wait
//! - `LOCK_<kind>_<ns>_<owner>`           -> per-owner admission lock
//!
//! Kubernetes names never contain `_`, so the underscore join is unambiguous.

use crate::error::GateError;

pub const POD_RECORD_PREFIX: &str = "ADMITEE_SMOOTH_POD_";
pub const DELETE_RECORD_PREFIX: &str = "ADMITEE_SMOOTH_DEL_";
pub const LABEL_RECORD_PREFIX: &str = "ADMITEE_SMOOTH_LABEL_";
pub const NOT_READY_PREFIX: &str = "ADMITEE_SMOOTH_NOTREADY_";

/// Global lock serializing the drain sweep (and two-record removals).
pub const DRAIN_LOOP_LOCK: &str = "ADMITEE_SMOOTH_LOCK_LOOP_POD";
/// Global lock serializing the delete sweep.
pub const DELETE_LOOP_LOCK: &str = "ADMITEE_SMOOTH_LOCK_LOOP_DELETE";

/// Retry cap for drain records: once `retryCount * interval` reaches this
/// many seconds the record is eligible for terminal cleanup.
pub const RETRY_CAP_SECS: u64 = 3600;

pub fn pod_record_key(namespace: &str, pod: &str) -> String {
    format!("{POD_RECORD_PREFIX}{namespace}_{pod}")
}

pub fn delete_record_key(namespace: &str, pod: &str) -> String {
    format!("{DELETE_RECORD_PREFIX}{namespace}_{pod}")
}

pub fn label_record_key(namespace: &str, pod: &str) -> String {
    format!("{LABEL_RECORD_PREFIX}{namespace}_{pod}")
}

pub fn not_ready_key(namespace: &str, pod: &str) -> String {
    format!("{NOT_READY_PREFIX}{namespace}_{pod}")
}

pub fn owner_lock_key(kind: &str, namespace: &str, owner: &str) -> String {
    format!("LOCK_{kind}_{namespace}_{owner}")
}

/// Namespace/name pair recovered from a record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

/// Split `<prefix><ns>_<pod>` back into its parts.
pub fn parse_record_key(key: &str, prefix: &str) -> Option<PodRef> {
    let rest = key.strip_prefix(prefix)?;
    let (namespace, name) = rest.split_once('_')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some(PodRef {
        namespace: namespace.to_string(),
        name: name.to_string(),
    })
}

/// A "this pod is being drained" marker.
///
/// Value field order: `<ns>_<ownerName>_<interval>_<lastEpoch>_<retryCount>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRecord {
    pub namespace: String,
    pub owner_name: String,
    pub interval_secs: u64,
    pub last_attempt: i64,
    pub retry_count: u64,
}

impl PodRecord {
    pub fn new(namespace: &str, owner_name: &str, interval_secs: u64, now: i64) -> Self {
        Self {
            namespace: namespace.to_string(),
            owner_name: owner_name.to_string(),
            interval_secs,
            last_attempt: now,
            retry_count: 0,
        }
    }

    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.namespace, self.owner_name, self.interval_secs, self.last_attempt, self.retry_count
        )
    }

    pub fn decode(raw: &str) -> Result<Self, GateError> {
        let fields: Vec<&str> = raw.split('_').collect();
        if fields.len() != 5 {
            return Err(GateError::Store(format!("corrupt pod record [{raw}]")));
        }
        let interval_secs = fields[2]
            .parse()
            .map_err(|_| GateError::Store(format!("corrupt pod record interval [{raw}]")))?;
        let last_attempt = fields[3]
            .parse()
            .map_err(|_| GateError::Store(format!("corrupt pod record epoch [{raw}]")))?;
        let retry_count = fields[4]
            .parse()
            .map_err(|_| GateError::Store(format!("corrupt pod record retries [{raw}]")))?;
        Ok(Self {
            namespace: fields[0].to_string(),
            owner_name: fields[1].to_string(),
            interval_secs,
            last_attempt,
            retry_count,
        })
    }

    /// True once a new deletion attempt is owed.
    pub fn due(&self, now: i64) -> bool {
        self.last_attempt + self.interval_secs as i64 <= now
    }

    /// True once the retry budget is spent and the record may be retired.
    pub fn expired(&self) -> bool {
        self.retry_count * self.interval_secs >= RETRY_CAP_SECS
    }
}
