//! Configuration management for the SPDY client

mod client;
pub mod serde_utils;

pub use client::{ClientConfig, SessionOptions};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spdy-replay")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(ConfigError::Invalid(format!("Failed to read config: {}", e))),
    };

    Ok(toml::from_str(&content)?)
}

/// Save configuration to a file, creating parent directories
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))
}

/// Load the client configuration, falling back to defaults when the file
/// does not exist
pub fn load_client_config(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let config = match load_config::<ClientConfig>(&path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => ClientConfig::default(),
        Err(e) => return Err(e),
    };
    config.validate()?;
    Ok(config)
}
