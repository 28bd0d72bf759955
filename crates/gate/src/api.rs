//! HTTP API: admission webhook, health check and Prometheus metrics

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use gate_lib::{AdmissionReview, GateMetrics, HealthzResponse, SmoothEngine, StoreHealth};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SmoothEngine>,
    pub health: StoreHealth,
}

impl AppState {
    pub fn new(engine: Arc<SmoothEngine>, health: StoreHealth) -> Self {
        Self { engine, health }
    }
}

/// Admission webhook. Malformed transport gets an HTTP error; a malformed
/// review body gets a well-formed review carrying the decode error, so the
/// API server can surface it instead of a blind webhook failure.
async fn admit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let json_content = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);
    if !json_content {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json").into_response();
    }
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty admission review body").into_response();
    }

    let review: AdmissionReview = match serde_json::from_str(&body) {
        Ok(review) => review,
        Err(err) => {
            return Json(AdmissionReview::decode_failure(err.to_string())).into_response();
        }
    };
    let Some(request) = review.request else {
        return Json(AdmissionReview::decode_failure(
            "review carried no request".to_string(),
        ))
        .into_response();
    };

    let verdict = state.engine.decide(&request).await;
    GateMetrics::new().record_decision(verdict.allowed);
    Json(AdmissionReview::answer(&request.uid, verdict)).into_response()
}

/// Health check response - 200 while the coordination store answers pings
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.health.is_up() {
        (StatusCode::OK, Json(HealthzResponse::up()))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthzResponse::down()))
    }
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admission/smooth", post(admit))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
