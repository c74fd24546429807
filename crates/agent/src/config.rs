//! Agent configuration

use anyhow::Result;
use serde::Deserialize;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name for log correlation
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/ingest
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Resource arbiter reallocation interval in seconds
    #[serde(default = "default_reallocation_interval")]
    pub reallocation_interval_secs: u64,

    /// Correlation decay interval in seconds
    #[serde(default = "default_decay_interval")]
    pub correlation_decay_secs: u64,

    /// Novelty stale-entry sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub novelty_sweep_secs: u64,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_reallocation_interval() -> u64 {
    5
}

fn default_decay_interval() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("ADAPTIVE"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| AgentConfig {
            node_name: default_node_name(),
            api_port: default_api_port(),
            reallocation_interval_secs: default_reallocation_interval(),
            correlation_decay_secs: default_decay_interval(),
            novelty_sweep_secs: default_sweep_interval(),
        }))
    }
}
