use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use upload_bridge::BridgeConfig;

const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";

/// Settings of the hosting server, usually read from a JSON file.
///
/// ```json
/// { "address": "0.0.0.0:8080", "bridge": { "upload_timeout_ms": 15000, "base_path": "/app" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub bridge: BridgeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: DEFAULT_ADDRESS.to_owned(), bridge: BridgeConfig::default() }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("invalid config file: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}
