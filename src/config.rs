//! Engine and server configuration
//!
//! Settings come from an optional YAML file and are then overridden by
//! `GRAPHCORE_*` environment variables. Every field has a default, so an
//! empty file (or none) yields a working in-memory setup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    Env { name: String, value: String },
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Rocksdb {
        path: PathBuf,
    },
}

/// Query engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    /// Database name used in element IDs
    pub database: String,
    /// Upper bound for unbounded variable length patterns
    pub max_traversal_depth: u32,
    /// Parsed statements kept; 0 disables the cache
    pub parse_cache_capacity: usize,
    /// Read-only results kept; 0 disables the cache
    pub result_cache_capacity: usize,
    pub result_cache_ttl_secs: u64,
    /// Deadline applied when the caller passes none
    pub query_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::Memory,
            database: "neo4j".to_string(),
            max_traversal_depth: 15,
            parse_cache_capacity: 1024,
            result_cache_capacity: 256,
            result_cache_ttl_secs: 60,
            query_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_secs)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7474,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Reads `path` if given, then applies environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Applies `GRAPHCORE_*` overrides read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::Env {
                name: name.to_string(),
                value,
            })
        }

        if let Some(v) = lookup("GRAPHCORE_ADDRESS") {
            self.server.address = v;
        }
        if let Some(v) = lookup("GRAPHCORE_PORT") {
            self.server.port = parse("GRAPHCORE_PORT", v)?;
        }
        if let Some(v) = lookup("GRAPHCORE_DATABASE") {
            self.engine.database = v;
        }
        if let Some(v) = lookup("GRAPHCORE_STORAGE") {
            self.engine.storage = match v.to_ascii_lowercase().as_str() {
                "memory" => StorageConfig::Memory,
                "rocksdb" => StorageConfig::Rocksdb {
                    path: match &self.engine.storage {
                        StorageConfig::Rocksdb { path } => path.clone(),
                        StorageConfig::Memory => PathBuf::from("./graphcore_data"),
                    },
                },
                _ => {
                    return Err(ConfigError::Env {
                        name: "GRAPHCORE_STORAGE".to_string(),
                        value: v,
                    })
                }
            };
        }
        if let Some(v) = lookup("GRAPHCORE_DATA_PATH") {
            self.engine.storage = StorageConfig::Rocksdb { path: PathBuf::from(v) };
        }
        if let Some(v) = lookup("GRAPHCORE_MAX_TRAVERSAL_DEPTH") {
            self.engine.max_traversal_depth = parse("GRAPHCORE_MAX_TRAVERSAL_DEPTH", v)?;
        }
        if let Some(v) = lookup("GRAPHCORE_PARSE_CACHE_CAPACITY") {
            self.engine.parse_cache_capacity = parse("GRAPHCORE_PARSE_CACHE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("GRAPHCORE_RESULT_CACHE_CAPACITY") {
            self.engine.result_cache_capacity = parse("GRAPHCORE_RESULT_CACHE_CAPACITY", v)?;
        }
        if let Some(v) = lookup("GRAPHCORE_RESULT_CACHE_TTL_SECS") {
            self.engine.result_cache_ttl_secs = parse("GRAPHCORE_RESULT_CACHE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("GRAPHCORE_QUERY_TIMEOUT_MS") {
            self.engine.query_timeout_ms = Some(parse("GRAPHCORE_QUERY_TIMEOUT_MS", v)?);
        }
        Ok(())
    }
}
