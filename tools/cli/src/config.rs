//! On-disk configuration for the `repsync` binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use repsync_cache::CacheConfig;
use repsync_sync::{EndpointConfig, SyncConfig};

/// Everything the binary needs to wire the engine together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file backing the mutation queue.
    pub database_path: PathBuf,
    /// Root directory of the response cache.
    pub cache_dir: PathBuf,
    /// Per-request network timeout.
    pub request_timeout: Duration,
    pub endpoint: EndpointConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let dir = data_dir();
        Self {
            database_path: dir.join("queue.db"),
            cache_dir: dir.join("cache"),
            request_timeout: Duration::from_secs(30),
            endpoint: EndpointConfig::default(),
            sync: SyncConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))
    }
}

/// Per-user data directory for repsync.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repsync")
}

pub fn default_config_path() -> PathBuf {
    data_dir().join("config.json")
}
