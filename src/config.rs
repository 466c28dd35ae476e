// src/config.rs

//! Manages relay configuration: loading, defaults and validation.

use crate::core::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::core::relation::DEFAULT_RELATION_BYTES;
use crate::core::transfer::DEFAULT_CHUNK_SIZE;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9898
}

/// Where and how files are stashed for offline receivers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FilesConfig {
    /// Directory holding store-and-forward files. Created on demand.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// Bytes copied per read/write step of a transfer.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest accepted file offer in bytes. `0` means no limit.
    #[serde(default)]
    pub max_file_size: u64,
}

fn default_storage_path() -> String {
    "chatrelay_data/files".to_string()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            chunk_size: default_chunk_size(),
            max_file_size: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CredentialsConfig {
    /// Store changed passwords as Argon2 hashes instead of as given.
    #[serde(default)]
    pub hash_new_passwords: bool,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_login_timeout", with = "humantime_serde")]
    login_timeout: Duration,
    #[serde(default = "default_read_buffer_size")]
    read_buffer_size: usize,
    #[serde(default = "default_max_frame_size")]
    max_frame_size: usize,
    #[serde(default = "default_relation_bytes")]
    relation_bytes: usize,
    #[serde(default)]
    accounts_file: Option<String>,
    #[serde(default)]
    files: FilesConfig,
    #[serde(default)]
    credentials: CredentialsConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8888
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}
fn default_login_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_read_buffer_size() -> usize {
    4096
}
fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_relation_bytes() -> usize {
    DEFAULT_RELATION_BYTES
}

/// Represents the final, validated relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    /// How long a new connection may take to send its login message.
    #[serde(with = "humantime_serde")]
    pub login_timeout: Duration,
    /// Initial capacity of each connection's read buffer.
    pub read_buffer_size: usize,
    /// Largest JSON message accepted before the connection is dropped.
    pub max_frame_size: usize,
    /// Byte length of relation vectors for newly registered accounts.
    pub relation_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accounts_file: Option<String>,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// The file this configuration was loaded from, if any.
    #[serde(skip)]
    pub source_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            login_timeout: default_login_timeout(),
            read_buffer_size: default_read_buffer_size(),
            max_frame_size: default_max_frame_size(),
            relation_bytes: default_relation_bytes(),
            accounts_file: None,
            files: FilesConfig::default(),
            credentials: CredentialsConfig::default(),
            metrics: MetricsConfig::default(),
            source_path: None,
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let mut config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))?;
        config.source_path = Some(path.to_string());
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            login_timeout: raw_config.login_timeout,
            read_buffer_size: raw_config.read_buffer_size,
            max_frame_size: raw_config.max_frame_size,
            relation_bytes: raw_config.relation_bytes,
            accounts_file: raw_config.accounts_file,
            files: raw_config.files,
            credentials: raw_config.credentials,
            metrics: raw_config.metrics,
            source_path: None,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.login_timeout.is_zero() {
            return Err(anyhow!("login_timeout cannot be 0"));
        }
        if self.read_buffer_size == 0 {
            return Err(anyhow!("read_buffer_size cannot be 0"));
        }
        if self.max_frame_size == 0 {
            return Err(anyhow!("max_frame_size cannot be 0"));
        }
        if self.relation_bytes == 0 {
            return Err(anyhow!("relation_bytes cannot be 0"));
        }
        if self.files.chunk_size == 0 {
            return Err(anyhow!("files.chunk_size cannot be 0"));
        }
        if self.files.storage_path.trim().is_empty() {
            return Err(anyhow!("files.storage_path cannot be empty"));
        }
        if self.read_buffer_size > self.max_frame_size {
            warn!(
                "read_buffer_size ({}) is larger than max_frame_size ({}).",
                self.read_buffer_size, self.max_frame_size
            );
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
