//! Configuration for the server

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{
    backup::BackupConfig,
    http::{HttpConfig, RateLimitConfig},
    sweep::SweepConfig,
};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "RELIC_DATA_DIR";

/// Default upload limit, 100 MiB.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Server configuration
///
/// The config is usually loaded from a file with [`Self::load`].
///
/// The struct also implements [`Default`] which creates a config suitable for local development
/// and testing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Config for the HTTP server.
    pub http: HttpConfig,
    /// Where and how payloads and metadata are stored.
    pub storage: StorageConfig,
    /// Request size limits.
    pub limits: LimitsConfig,
    /// Per IP rate limits.
    pub rate_limit: RateLimitConfig,
    /// Client keys with admin rights.
    pub admin_client_ids: Vec<String>,
    /// Metadata backups.
    pub backup: BackupConfig,
    /// Expiry sweeping.
    pub sweep: SweepConfig,
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Upper bound for a single blob store call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Data directory. Defaults to `$RELIC_DATA_DIR`, then the platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            data_dir: None,
        }
    }
}

/// Size limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted payload in bytes.
    pub max_upload_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

impl Config {
    /// Load the config from a file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Config> {
        let s = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read {}", path.as_ref().to_string_lossy()))?;
        let config: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse {}", path.as_ref().to_string_lossy()))?;
        Ok(config)
    }

    /// Get the data directory.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(dir.clone());
        }
        let dir = if let Some(val) = env::var_os(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            let path = dirs_next::data_dir().ok_or_else(|| {
                anyhow!("operating environment provides no directory for application data")
            })?;
            path.join("relic")
        };
        Ok(dir)
    }

    /// Get the path to the metadata database file.
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("relics-1.db"))
    }

    /// Get the root directory of the blob store.
    pub fn blobs_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("blobs"))
    }
}
