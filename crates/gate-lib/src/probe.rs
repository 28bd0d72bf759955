//! Health probe runner
//!
//! Issues one HTTP call per policy rule against the draining pod and hands
//! the trimmed response body back to the engine for comparison.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use reqwest::header::CONTENT_TYPE;

use crate::crd::{Rule, DEFAULT_METHOD, DEFAULT_PORT};
use crate::error::GateError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A rule resolved against a concrete pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub url: String,
    pub port: u16,
    pub method: String,
}

impl ProbeTarget {
    /// Resolve address, port and method defaults. The address falls back to
    /// the pod IP and the port to the pod's first container port, then 80.
    pub fn resolve(rule: &Rule, pod: &Pod) -> Result<Self, GateError> {
        if rule.path.is_empty() {
            return Err(GateError::Probe(format!("Path NOT SET[{:?}]", rule.path)));
        }

        let port = if rule.port != 0 {
            rule.port
        } else {
            first_container_port(pod).unwrap_or(DEFAULT_PORT)
        };

        let host = if rule.address.is_empty() {
            pod.status
                .as_ref()
                .and_then(|status| status.pod_ip.clone())
                .ok_or_else(|| GateError::Probe("pod IP NOT SET".to_string()))?
        } else {
            rule.address.clone()
        };

        let method = if rule.method.is_empty() {
            DEFAULT_METHOD.to_string()
        } else {
            rule.method.to_lowercase()
        };

        Ok(Self {
            url: format!("http://{host}:{port}{}", rule.path),
            port,
            method,
        })
    }
}

fn first_container_port(pod: &Pod) -> Option<u16> {
    let port = pod
        .spec
        .as_ref()?
        .containers
        .first()?
        .ports
        .as_ref()?
        .first()?
        .container_port;
    u16::try_from(port).ok()
}

/// Blocking (per-rule) HTTP prober with bounded connect and response
/// deadlines.
#[derive(Clone)]
pub struct ProbeRunner {
    client: reqwest::Client,
}

impl ProbeRunner {
    pub fn new() -> Result<Self, GateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(PROBE_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|err| GateError::Probe(err.to_string()))?;
        Ok(Self { client })
    }

    /// Run one resolved rule and return the trimmed response body. Timeouts,
    /// connection failures and non-2xx statuses are probe errors.
    pub async fn fetch(&self, target: &ProbeTarget, rule: &Rule) -> Result<String, GateError> {
        let response = match target.method.as_str() {
            "get" => self
                .client
                .get(&target.url)
                .send()
                .await
                .map_err(|err| GateError::Probe(err.to_string()))?,
            "post" => {
                if rule.body.is_empty() {
                    return Err(GateError::Probe(format!("Body NOT SET[{}]", target.url)));
                }
                self.client
                    .post(&target.url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(rule.body.clone())
                    .send()
                    .await
                    .map_err(|err| GateError::Probe(err.to_string()))?
            }
            other => {
                return Err(GateError::Probe(format!("unsupported method [{other}]")));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Probe(format!(
                "Http status code[{}]",
                status.as_u16()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|err| GateError::Probe(err.to_string()))?;
        Ok(body.trim().to_string())
    }
}
