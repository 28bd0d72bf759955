//! Gate configuration

use anyhow::Result;
use serde::Deserialize;

/// Gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Webhook/health/metrics listen port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Coordination store (Redis) connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

fn default_api_port() -> u16 {
    8443
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl GateConfig {
    /// Load configuration from `ADMITEE_`-prefixed environment variables.
    /// Malformed values are a startup error, not a silent fallback.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ADMITEE").try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test covers both paths: the environment is process-global, so a
    // parallel sibling test would race the variable.
    #[test]
    fn load_applies_defaults_and_rejects_malformed_values() {
        let config = GateConfig::load().unwrap();
        assert_eq!(config.api_port, 8443);
        assert!(config.redis_url.starts_with("redis://"));

        std::env::set_var("ADMITEE_API_PORT", "not-a-port");
        let result = GateConfig::load();
        std::env::remove_var("ADMITEE_API_PORT");
        assert!(result.is_err());

        std::env::set_var("ADMITEE_API_PORT", "9443");
        let config = GateConfig::load();
        std::env::remove_var("ADMITEE_API_PORT");
        assert_eq!(config.unwrap().api_port, 9443);
    }
}
