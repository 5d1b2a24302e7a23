//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via EASYCHAT_CONFIG or --config)
//! 3. Environment variables

use crate::connection::ConnectionConfig;
use easychat_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Name resolution configuration.
    pub resolve: ResolveConfig,
}

impl ClientConfig {
    /// Loads configuration from `path` (or EASYCHAT_CONFIG when `path` is
    /// `None`), then applies environment variable overrides.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let env_path = std::env::var("EASYCHAT_CONFIG").ok().map(PathBuf::from);
        if let Some(path) = path.map(Path::to_path_buf).or(env_path) {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `var`, which maps a variable name to its value.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&var);
        self.resolve.apply_overrides(&var);
    }

    /// Builds the connection settings, validating the server address.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let (host, port) = self.network.host_port()?;
        if self.resolve.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "resolve.poll_interval_ms must be positive".to_string(),
            ));
        }

        Ok(ConnectionConfig::new(host, port)
            .with_connect_timeout(self.network.connect_timeout())
            .with_request_timeout(self.network.request_timeout())
            .with_resolve_timeout(self.resolve.timeout())
            .with_poll_interval(self.resolve.poll_interval()))
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address as `host:port`. The port defaults to 8888.
    pub server: String,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Reply timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server: format!("127.0.0.1:{}", DEFAULT_PORT),
            connect_timeout_secs: 10,
            request_timeout_secs: 5,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(server) = var("EASYCHAT_SERVER") {
            self.server = server;
        }

        if let Some(timeout) = var("EASYCHAT_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Some(timeout) = var("EASYCHAT_REQUEST_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.request_timeout_secs = secs;
            }
        }
    }

    /// Splits the server address into host and port.
    pub fn host_port(&self) -> Result<(String, u16), ConfigError> {
        let server = self.server.trim();
        if server.is_empty() {
            return Err(ConfigError::ValidationError(
                "network.server is empty".to_string(),
            ));
        }

        match server.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    ConfigError::ValidationError(format!("invalid port in '{}'", server))
                })?;
                Ok((host.to_string(), port))
            }
            None => Ok((server.to_string(), DEFAULT_PORT)),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Name resolution configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveConfig {
    /// How long a network lookup may take, in milliseconds.
    pub timeout_ms: u64,
    /// Directory poll interval while a lookup is pending, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            poll_interval_ms: 100,
        }
    }
}

impl ResolveConfig {
    fn apply_overrides(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if let Some(timeout) = var("EASYCHAT_RESOLVE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.timeout_ms = ms;
            }
        }

        if let Some(interval) = var("EASYCHAT_POLL_INTERVAL_MS") {
            if let Ok(ms) = interval.parse() {
                self.poll_interval_ms = ms;
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {1}", path = .0.display())]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{path}': {1}", path = .0.display())]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}
