use std::path::PathBuf;

use e2sync_core::config::{CryptoConfig, E2syncConfig, UploadConfig};
use e2sync_crypto::KdfParams;

use crate::lock::LockPolicy;

/// Resolved settings for one encrypted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub lock: LockPolicy,
    /// Directory the ciphertext is written to before the plain upload
    pub temp_dir: PathBuf,
}

impl UploadSettings {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            lock: LockPolicy::from(config),
            temp_dir: config.temp_dir(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl From<&E2syncConfig> for UploadSettings {
    fn from(config: &E2syncConfig) -> Self {
        Self::from_config(&config.upload)
    }
}

/// Argon2id parameters for deriving the master key.
pub fn kdf_params(config: &CryptoConfig) -> KdfParams {
    KdfParams {
        mem_cost_kib: config.argon2_mem_cost_kib,
        time_cost: config.argon2_time_cost,
        parallelism: config.argon2_parallelism,
    }
}
