//! Configuration management for the tile server.
//!
//! Defaults aim for a working local setup: disk storage under `./data`, the
//! stub generator (no model endpoint required), and eager pyramid
//! regeneration for every map.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Generation backend configuration
    pub generation: GenerationConfig,

    /// Pyramid regeneration policy
    pub pyramid: PyramidConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: SocketAddr,
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Durable flat-file storage under `data_dir`.
    Disk,
    /// In-memory storage; state is lost on restart. Useful for tests and
    /// throwaway instances.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,

    /// Data directory path (disk backend)
    pub data_dir: PathBuf,
}

/// Generation backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// Deterministic local tiles derived from the seed; no model service.
    Stub,
    /// External image model service speaking the grid-generation protocol.
    Http,
}

/// Generation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Which backend produces tile pixels
    pub backend: GeneratorKind,

    /// Base URL of the image model service (http backend)
    pub endpoint: String,

    /// Upstream request timeout in seconds
    pub request_timeout_secs: u64,

    /// How long a PENDING record holds its claim before a new request may
    /// re-claim the cell (recovers cells stuck by a crashed job)
    pub pending_lease_secs: u64,

    /// Style name forwarded to the model with every prompt
    pub style: String,

    /// Negative prompt forwarded to the model
    pub negative_prompt: String,
}

/// Pyramid regeneration policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Maps whose parent pyramid is never regenerated automatically.
    /// Used for large preset pyramids that are rebuilt offline instead.
    pub lazy_maps: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".parse().expect("default bind address"),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Disk,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorKind::Stub,
            endpoint: String::new(),
            request_timeout_secs: 105,
            pending_lease_secs: 600,
            style: "default-style".to_string(),
            negative_prompt: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default file (if present) and environment
    /// variables.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(file_config) = Self::from_file("infinimap.toml") {
            config = file_config;
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(addr) = env::var("IM_HTTP_ADDR") {
            self.server.http_addr = addr
                .parse()
                .map_err(|e| Error::config(format!("Invalid HTTP address: {}", e)))?;
        }

        if let Ok(data_dir) = env::var("IM_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = env::var("IM_STORAGE_BACKEND") {
            self.storage.backend = match backend.as_str() {
                "disk" => StorageBackend::Disk,
                "memory" => StorageBackend::Memory,
                other => {
                    return Err(Error::config(format!(
                        "Invalid storage backend: {}. Valid options: disk, memory",
                        other
                    )))
                }
            };
        }

        if let Ok(endpoint) = env::var("IM_GENERATION_ENDPOINT") {
            self.generation.endpoint = endpoint;
            self.generation.backend = GeneratorKind::Http;
        }

        if let Ok(level) = env::var("IM_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        if self.generation.backend == GeneratorKind::Http && self.generation.endpoint.is_empty() {
            return Err(Error::config(
                "generation.backend = \"http\" requires generation.endpoint",
            ));
        }

        if self.generation.pending_lease_secs < 10 {
            return Err(Error::config(
                "generation.pending_lease_secs must be at least 10",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_http_backend_requires_endpoint() {
        let mut config = Config::default();
        config.generation.backend = GeneratorKind::Http;
        assert!(config.validate().is_err());

        config.generation.endpoint = "http://127.0.0.1:8000".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.http_addr, config.server.http_addr);
        assert_eq!(parsed.storage.backend, StorageBackend::Disk);
    }
}
