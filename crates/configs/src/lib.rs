use std::env;

use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub evm: EvmConfig,
    pub substrate: SubstrateConfig,
    pub tracing: TracingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize)]
pub struct TracingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Account-model fork backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmConfig {
    /// JSON-RPC endpoint of the anvil fork the engine drives.
    pub fork_url: String,
    /// Upstream RPC used for live fee data; the fork is the fallback.
    pub upstream_rpc_url: Option<String>,
    /// Remote chain the fork was created from, passed to `anvil_reset`.
    pub fork_source_url: Option<String>,
    /// Block number the fork was created at, passed to `anvil_reset`.
    pub fork_block: Option<u64>,
    /// Override for the native currency symbol (defaults to "ETH").
    pub native_symbol: Option<String>,
}

/// Runtime-module fork backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SubstrateConfig {
    /// WebSocket endpoint of the chopsticks fork the engine drives.
    pub endpoint: String,
    /// Override for the native token symbol when the chain properties
    /// omit one.
    pub native_symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name(&run_mode).required(false))
            .add_source(File::with_name("local").required(false))
            .add_source(Environment::with_prefix("app").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
