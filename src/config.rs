pub mod gateway;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use gateway::GatewayConfig;

/// Process-level settings: where to find the gateway definition and how to expose it.
#[derive(Debug, Clone, Deserialize)]
pub struct RetransmitConfig {
    #[serde(default = "default_gateway_config_path")]
    pub gateway_config_path: String,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        Self {
            gateway_config_path: default_gateway_config_path(),
            listen: None,
            instance_id: None,
            log_filter: None,
        }
    }
}

fn default_gateway_config_path() -> String {
    "config/gateway.yaml".to_string()
}

impl RetransmitConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("RETRANSMIT").separator("__"))
            .build()?
            .try_deserialize()
    }
}
