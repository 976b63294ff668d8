//! Configuration loading for relayprobe-relay.
//!
//! Settings come from an optional TOML file, then environment variables
//! override individual values:
//!
//! | Variable          | Setting                  | Default         |
//! |-------------------|--------------------------|-----------------|
//! | `HOST`            | `server.host`            | `0.0.0.0`       |
//! | `PORT`            | `server.port`            | `8765`          |
//! | `STORAGE_ENABLED` | `storage.enabled`        | `true`          |
//! | `STORAGE_PATH`    | `storage.path`           | `relay-data.db` |
//! | `MAX_CONNECTIONS` | `limits.max_connections` | `100`           |

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the TOML config file.
pub const CONFIG_ENV: &str = "RELAY_CONFIG";

/// Root configuration for relayprobe-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Connection and message limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind (default: 0.0.0.0).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port serving both `/health` and `/ws` (default: 8765).
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Persist nodes to SQLite; in-memory only when false (default: true).
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,
    /// Path to the SQLite database file.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// Connection and message limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent WebSocket connections (default: 100).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum frames per connection per minute (default: 6000).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum frames per second across all connections (default: 1000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

fn default_storage_enabled() -> bool {
    true
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("relay-data.db")
}

fn default_max_connections() -> usize {
    100
}

fn default_messages_per_minute() -> u32 {
    6000
}

fn default_global_requests_per_second() -> u32 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            path: default_storage_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the effective configuration: `file` (or defaults), then the
    /// process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override settings from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(enabled) = lookup("STORAGE_ENABLED") {
            self.storage.enabled = parse_bool("STORAGE_ENABLED", &enabled)?;
        }
        if let Some(path) = lookup("STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(max) = lookup("MAX_CONNECTIONS") {
            self.limits.max_connections = parse_env("MAX_CONNECTIONS", &max)?;
        }
        Ok(())
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_connections == 0 {
            return Err(ConfigError::Invalid("limits.max_connections must be > 0".into()));
        }
        if self.limits.messages_per_minute == 0 {
            return Err(ConfigError::Invalid("limits.messages_per_minute must be > 0".into()));
        }
        if self.limits.global_requests_per_second == 0 {
            return Err(ConfigError::Invalid(
                "limits.global_requests_per_second must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_env<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// An environment variable held an unusable value.
    #[error("invalid {name}={value:?}: {reason}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },
    /// A setting is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
