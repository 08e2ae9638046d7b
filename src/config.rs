//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use crate::security::RateLimitConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity.
    pub server: ServerConfig,
    /// Network listen configuration.
    pub listen: ListenConfig,
    /// Token validation.
    pub auth: AuthConfig,
    /// Engine limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// History persistence.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Background task intervals.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name stamped on server-originated messages (e.g., "campusd-1").
    pub name: String,
    /// Port for the Prometheus /metrics endpoint. Disabled when absent.
    pub metrics_port: Option<u16>,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind the WebSocket listener to (e.g., "0.0.0.0:8080").
    pub address: SocketAddr,
}

/// Token validation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared secret for HMAC token signatures.
    pub token_secret: String,
}

/// Engine limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// In-memory history entries kept per room after a flush.
    pub history_cache_entries: usize,
    /// Maximum entries returned per history page.
    pub history_page_size: usize,
    /// Per-client rate limiting.
    pub rate: RateLimitConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            history_cache_entries: 200,
            history_page_size: 50,
            rate: RateLimitConfig::default(),
        }
    }
}

/// History persistence configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Durable backend. `redb` persists to `path`; `memory` keeps logs
    /// in-process only.
    pub backend: HistoryBackend,
    /// Path to the redb database file.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    Redb,
    Memory,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::Redb,
            path: "campusd-history.redb".to_string(),
        }
    }
}

/// Background task intervals.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between periodic history flushes.
    pub flush_interval_secs: u64,
    /// Seconds between zombie connection sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 600,
            sweep_interval_secs: 180,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
