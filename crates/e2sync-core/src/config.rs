use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{E2syncError, E2syncResult};

/// Top-level configuration (loaded from e2sync.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct E2syncConfig {
    pub upload: UploadConfig,
    pub crypto: CryptoConfig,
}

impl E2syncConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> E2syncResult<Self> {
        if !path.exists() {
            warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| E2syncError::Config(format!("reading config {}: {e}", path.display())))?;
        Self::from_toml(&content)
            .map_err(|e| E2syncError::Config(format!("parsing config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Encrypted upload workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Delay between folder lock attempts in seconds (default: 5)
    pub lock_retry_delay_secs: u64,
    /// Give up locking once this many seconds passed since the first attempt (default: 300)
    pub lock_retry_ceiling_secs: u64,
    /// Directory for ciphertext files awaiting upload (default: system temp dir)
    pub temp_dir: Option<PathBuf>,
}

impl UploadConfig {
    pub fn lock_retry_delay(&self) -> Duration {
        Duration::from_secs(self.lock_retry_delay_secs)
    }

    pub fn lock_retry_ceiling(&self) -> Duration {
        Duration::from_secs(self.lock_retry_ceiling_secs)
    }

    /// Effective directory the ciphertext is written to.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            lock_retry_delay_secs: 5,
            lock_retry_ceiling_secs: 5 * 60,
            temp_dir: None,
        }
    }
}

/// Master key derivation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}
