//! Coordination-store liveness
//!
//! A periodic ping keeps a shared flag current; `/healthz` reports it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::metrics::GateMetrics;
use crate::store::CoordinationStore;

const PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Shared liveness flag. Starts `down` until the first successful ping.
#[derive(Clone, Default)]
pub struct StoreHealth {
    up: Arc<AtomicBool>,
}

impl StoreHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    pub fn set(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }
}

/// Liveness payload served on `/healthz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthzResponse {
    pub status: String,
}

impl HealthzResponse {
    pub fn up() -> Self {
        Self {
            status: "up".to_string(),
        }
    }

    pub fn down() -> Self {
        Self {
            status: "down".to_string(),
        }
    }
}

/// Ping the store every 10 seconds until shutdown.
pub async fn run_store_probe(
    store: Arc<dyn CoordinationStore>,
    health: StoreHealth,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(interval_secs = PROBE_INTERVAL.as_secs(), "Starting store liveness probe");
    let metrics = GateMetrics::new();
    let mut ticker = tokio::time::interval(PROBE_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let up = match store.ping().await {
                    Ok(()) => true,
                    Err(error) => {
                        warn!(%error, "Coordination store ping failed");
                        false
                    }
                };
                health.set(up);
                metrics.set_store_up(up);
            }
            _ = shutdown.recv() => {
                info!("Shutting down store liveness probe");
                break;
            }
        }
    }
}
