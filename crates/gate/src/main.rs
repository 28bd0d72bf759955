//! Admitee Gate - app-aware pod deletion gatekeeper
//!
//! This binary serves the validating admission webhook that intercepts pod
//! DELETE requests, and runs the background sweeps that finish approved
//! deletions asynchronously.

use anyhow::Result;
use gate_lib::{
    cluster::{ClusterApi, KubeCluster},
    health::run_store_probe,
    store::CoordinationStore,
    DeleteSweep, DrainSweep, GateMetrics, RedisStore, SmoothEngine, StoreHealth,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting admitee-gate");

    // Load configuration
    let config = config::GateConfig::load()?;
    info!(api_port = config.api_port, "Gate configured");

    // Connect the coordination store and the cluster API
    let store: Arc<dyn CoordinationStore> =
        Arc::new(RedisStore::connect(&config.redis_url).await?);
    let client = kube::Client::try_default().await?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(client));

    // Register metrics before the first scrape
    let _ = GateMetrics::new();

    let engine = Arc::new(SmoothEngine::new(store.clone(), cluster.clone())?);
    let health = StoreHealth::new();

    // Background workers share one shutdown channel
    let (shutdown_tx, _) = broadcast::channel(1);
    let _ = tokio::spawn(run_store_probe(
        store.clone(),
        health.clone(),
        shutdown_tx.subscribe(),
    ));
    let _ = tokio::spawn(
        DrainSweep::new(store.clone(), cluster.clone()).run(shutdown_tx.subscribe()),
    );
    let _ = tokio::spawn(
        DeleteSweep::new(store.clone(), cluster.clone()).run(shutdown_tx.subscribe()),
    );

    // Start the webhook server
    let app_state = Arc::new(api::AppState::new(engine, health));
    let _ = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());

    Ok(())
}
