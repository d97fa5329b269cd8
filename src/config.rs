//! Application Configuration
//!
//! This module provides configuration management for the gateway,
//! supporting YAML configuration files with sensible defaults. The
//! configuration is loaded once at startup and never changes afterwards.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::autocontainer::{ContainerFormat, FormatError};
pub use crate::storage::config::StorageBackend;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "GATEWAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("cannot parse {path}: {source}")]
    Parse { path: String, source: serde_yaml::Error },
    #[error("invalid autocontainer base {0}, expected 2 to 36")]
    InvalidBase(u32),
    #[error("invalid autocontainer format: {0}")]
    InvalidFormat(#[from] FormatError),
    #[error("invalid storage setting: {0}")]
    InvalidStorage(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage backend configuration
    pub storage: StorageConfig,
    /// Container derivation
    pub autocontainer: AutocontainerConfig,
    /// Deadlines applied to blocking operations
    pub timeouts: TimeoutConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9710,
            workers: 4,
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,
    /// Base path of the local backend
    pub base_path: String,
    /// Scratch directory of the local backend
    pub temp_path: String,
    /// Size of a metachunk in bytes
    pub chunk_size: u64,
    /// Copies of each metachunk
    pub replicas: u32,
    /// Storage policy used when the container has none
    pub default_policy: Option<String>,
    /// Largest object accepted by PUT, in bytes
    pub max_object_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            base_path: "./data/storage".to_string(),
            temp_path: "./data/temp".to_string(),
            chunk_size: 10 * 1024 * 1024,
            replicas: 1,
            default_policy: None,
            max_object_size: 5 * 1024 * 1024 * 1024,
        }
    }
}

/// Container derivation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutocontainerConfig {
    pub enabled: bool,
    /// Account used for every request; the whole path is then the object name
    pub default_account: Option<String>,
    /// Start of the path window
    pub offset: usize,
    /// Length of the path window, up to the end of the path when unset
    pub size: Option<usize>,
    #[serde(deserialize_with = "deserialize_mask")]
    pub mask: u64,
    /// Radix used to parse the path digits
    pub base: u32,
    /// printf-style template of container names
    pub format: String,
}

impl Default for AutocontainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_account: None,
            offset: 0,
            size: None,
            mask: 0xFFFF_FFFF_FF00_00FF,
            base: 16,
            format: "%016X".to_string(),
        }
    }
}

/// Deadlines, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Every call to the storage backend
    pub backend_ms: u64,
    /// Waiting for the next piece of a client body
    pub client_read_ms: u64,
    /// Every write to a chunk
    pub chunk_write_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            backend_ms: 30_000,
            client_read_ms: 60_000,
            chunk_write_ms: 30_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log configuration file
    pub config_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

/// Accept masks as hex strings (`"0xFFFF0000"`, `"FFFF0000"`) or integers.
fn deserialize_mask<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mask {
        Int(u64),
        Text(String),
    }

    match Mask::deserialize(deserializer)? {
        Mask::Int(value) => Ok(value),
        Mask::Text(text) => parse_mask(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_mask(text: &str) -> Result<u64, String> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(&digits.replace('_', ""), 16).map_err(|e| format!("invalid mask '{}': {}", text, e))
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(String),
    /// The named file does not exist
    Defaults(String),
}

impl AppConfig {
    /// Load configuration from the file named by `GATEWAY_CONFIG`, or from
    /// `config.yaml`; use defaults if neither exists. Runs before logging is
    /// set up, so the caller reports the source.
    pub fn load() -> Result<(Self, ConfigSource), ConfigError> {
        let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        if Path::new(&config_path).exists() {
            let config = Self::load_from(&config_path)?;
            Ok((config, ConfigSource::File(config_path)))
        } else {
            let mut config = Self::default();
            config.apply_env();
            config.validate()?;
            Ok((config, ConfigSource::Defaults(config_path)))
        }
    }

    /// Load and validate a configuration file
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
        let mut config = Self::from_yaml(&content).map_err(|source| ConfigError::Parse { path: path.to_string(), source })?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Environment overrides
    fn apply_env(&mut self) {
        if let Some(backend) = StorageBackend::from_env() {
            self.storage.backend = backend;
        }
    }

    /// Reject settings that would only fail once requests come in
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=36).contains(&self.autocontainer.base) {
            return Err(ConfigError::InvalidBase(self.autocontainer.base));
        }
        self.autocontainer.format.parse::<ContainerFormat>()?;
        if self.storage.chunk_size == 0 {
            return Err(ConfigError::InvalidStorage("chunk_size must be positive".to_string()));
        }
        if self.storage.replicas == 0 {
            return Err(ConfigError::InvalidStorage("replicas must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.autocontainer.mask, 0xFFFFFFFFFF0000FF);
        assert_eq!(config.autocontainer.base, 16);
        assert_eq!(config.autocontainer.offset, 0);
        assert_eq!(config.autocontainer.size, None);
        assert_eq!(config.autocontainer.format, "%016X");
        assert!(config.autocontainer.default_account.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml(
            r#"
autocontainer:
  default_account: AUTH_demo
  offset: 2
  size: 8
  mask: "0x00000000FFFFFFFF"
timeouts:
  client_read_ms: 500
"#,
        )
        .unwrap();
        assert_eq!(config.autocontainer.default_account.as_deref(), Some("AUTH_demo"));
        assert_eq!(config.autocontainer.offset, 2);
        assert_eq!(config.autocontainer.size, Some(8));
        assert_eq!(config.autocontainer.mask, 0xFFFFFFFF);
        assert_eq!(config.autocontainer.base, 16);
        assert_eq!(config.timeouts.client_read_ms, 500);
        assert_eq!(config.timeouts.backend_ms, 30_000);
        assert_eq!(config.server.port, 9710);
    }

    #[test]
    fn test_mask_forms() {
        assert_eq!(parse_mask("0xFF").unwrap(), 255);
        assert_eq!(parse_mask("ff").unwrap(), 255);
        assert_eq!(parse_mask("0xFFFF_FFFF_FF00_00FF").unwrap(), 0xFFFFFFFFFF0000FF);
        assert!(parse_mask("0xZZ").is_err());

        let config = AppConfig::from_yaml("autocontainer:\n  mask: 4095\n").unwrap();
        assert_eq!(config.autocontainer.mask, 4095);
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.autocontainer.base = 1;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBase(1))));

        let mut config = AppConfig::default();
        config.autocontainer.format = "container".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFormat(_))));

        let mut config = AppConfig::default();
        config.storage.chunk_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStorage(_))));
    }

    #[test]
    #[serial]
    fn test_load_from_env_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "storage:\n  backend: Mock\nserver:\n  port: 8080").unwrap();
        std::env::set_var(CONFIG_ENV, file.path());
        let config = AppConfig::load();
        std::env::remove_var(CONFIG_ENV);

        let (config, source) = config.unwrap();
        assert_eq!(source, ConfigSource::File(file.path().display().to_string()));
        assert_eq!(config.storage.backend, StorageBackend::Mock);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml").display().to_string();
        std::env::set_var(CONFIG_ENV, &missing);
        let loaded = AppConfig::load();
        std::env::remove_var(CONFIG_ENV);

        let (config, source) = loaded.unwrap();
        assert_eq!(source, ConfigSource::Defaults(missing));
        assert_eq!(config.server.port, 9710);
    }

    #[test]
    #[serial]
    fn test_load_rejects_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "autocontainer:\n  base: 99").unwrap();
        std::env::set_var(CONFIG_ENV, file.path());
        let config = AppConfig::load();
        std::env::remove_var(CONFIG_ENV);

        assert!(matches!(config, Err(ConfigError::InvalidBase(99))));
    }
}
