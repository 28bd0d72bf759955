//! Admission review wire types
//!
//! Hand-rolled serde view of the `admission.k8s.io` review object, limited
//! to the fields the gate actually consumes and answers with.

use serde::{Deserialize, Serialize};

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1beta1";
pub const ADMISSION_KIND: &str = "AdmissionReview";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a response in a review envelope, echoing the request UID.
    pub fn answer(uid: &str, verdict: Verdict) -> Self {
        Self {
            api_version: Some(ADMISSION_API_VERSION.to_string()),
            kind: Some(ADMISSION_KIND.to_string()),
            request: None,
            response: Some(AdmissionResponse {
                uid: uid.to_string(),
                allowed: verdict.allowed,
                result: Some(Status {
                    reason: Some(verdict.reason),
                    message: None,
                }),
            }),
        }
    }

    /// Review carrying only a decode error, for bodies that never yielded a
    /// usable request.
    pub fn decode_failure(message: String) -> Self {
        Self {
            api_version: Some(ADMISSION_API_VERSION.to_string()),
            kind: Some(ADMISSION_KIND.to_string()),
            request: None,
            response: Some(AdmissionResponse {
                uid: String::new(),
                allowed: false,
                result: Some(Status {
                    reason: None,
                    message: Some(message),
                }),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: GroupVersionKind,
    pub name: String,
    pub namespace: String,
    pub operation: String,
    pub object: serde_json::Value,
    pub old_object: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Status>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The engine's answer to one admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: String,
}

impl Verdict {
    pub fn allowed(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_delete_review() {
        let body = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1beta1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "name": "web-1",
                "namespace": "default",
                "operation": "DELETE",
                "oldObject": {"metadata": {"name": "web-1", "namespace": "default"}}
            }
        });

        let review: AdmissionReview = serde_json::from_value(body).unwrap();
        let request = review.request.unwrap();
        assert_eq!(request.uid, "705ab4f5-6393-11e8-b7cc-42010a800002");
        assert_eq!(request.kind.kind, "Pod");
        assert_eq!(request.operation, "DELETE");
        assert!(request.old_object.is_object());
    }

    #[test]
    fn answer_encodes_expected_shape() {
        let review = AdmissionReview::answer("uid-1", Verdict::denied("FAILURE: KIND[Service]"));
        let value = serde_json::to_value(&review).unwrap();
        assert_eq!(value["response"]["uid"], "uid-1");
        assert_eq!(value["response"]["allowed"], false);
        assert_eq!(value["response"]["result"]["reason"], "FAILURE: KIND[Service]");
        assert!(value.get("request").is_none());
    }
}
