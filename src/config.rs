//! Service configuration
//!
//! Loaded from a TOML file. Every section and field has a default, so a partial
//! file or no file at all still yields a usable configuration.

use crate::topic::TopicScheme;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "streetlights";
const CONFIG_FILE: &str = "config.toml";

const USERNAME_ENV: &str = "STREETLIGHTS_BROKER_USERNAME";
const PASSWORD_ENV: &str = "STREETLIGHTS_BROKER_PASSWORD";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Credentials are only sent when both username and password are set
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
    /// MQTT filter subscribed on connect; the topics are dot-separated, so `#`
    pub subscribe_filter: String,
    pub qos: u8,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "streetlights".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 5,
            subscribe_filter: "#".to_string(),
            qos: 1,
        }
    }
}

impl BrokerConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            return None;
        }
        Some((&self.username, &self.password))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Commands processed concurrently
    pub workers: usize,
    pub publish_timeout_ms: u64,
    /// Buffer size of the inbound message queue
    pub channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            publish_timeout_ms: 5000,
            channel_capacity: 100,
        }
    }
}

impl ServiceConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub topics: TopicScheme,
    pub service: ServiceConfig,
}

impl AppConfig {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads the configuration at `path` and applies environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content, path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `path` if given, otherwise the user config file if present, otherwise defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                info!("No configuration file found, using defaults");
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var(USERNAME_ENV) {
            self.broker.username = username;
        }
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            self.broker.password = password;
        }
    }
}

/// `<config dir>/streetlights/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    Some(path)
}
