//! Application Configuration
//!
//! Settings shared by the synthesizer, the registry and the controller,
//! loaded from `<config dir>/mdla/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// File name of the generated core config inside the data directory
pub(crate) const CORE_CONFIG_FILE: &str = "core_config.json";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local SOCKS listener port
    pub socks_port: u16,
    /// Core log level (debug, info, warning, error, none)
    pub log_level: String,
    /// geoip sets routed around the proxy
    pub direct_geoip: Vec<String>,
    /// Subscription fetch timeout
    pub fetch_timeout_secs: u64,
    /// Telemetry poll cadence
    pub poll_interval_ms: u64,
    /// Proxy core executable
    pub core_binary: String,
    /// Interface whose byte counters feed telemetry
    pub tun_interface: String,
    /// Store and generated core config location
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            socks_port: 10808,
            log_level: "warning".to_string(),
            direct_geoip: vec!["private".to_string(), "cn".to_string()],
            fetch_timeout_secs: 30,
            poll_interval_ms: 1000,
            core_binary: "xray".to_string(),
            tun_interface: "tun0".to_string(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mdla")
}

impl AppConfig {
    /// `<config dir>/mdla/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mdla").join("config.toml"))
    }

    /// Parse and validate TOML
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub async fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or invalid
    pub async fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Self::default();
        }

        match Self::from_toml_file(path).await {
            Ok(config) => {
                info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Ignoring config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socks_port == 0 {
            return Err(ConfigError::InvalidConfig("socks_port must be non-zero".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig("fetch_timeout_secs must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig("poll_interval_ms must be non-zero".into()));
        }
        if self.core_binary.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("core_binary is empty".into()));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Persisted subscriptions and servers
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("servers.json")
    }

    /// Generated core config handed to the proxy process
    pub fn core_config_path(&self) -> PathBuf {
        self.data_dir.join(CORE_CONFIG_FILE)
    }
}
