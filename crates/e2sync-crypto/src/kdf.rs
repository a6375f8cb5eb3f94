//! Account master key
//!
//! ```text
//! passphrase + 16-byte salt ──Argon2id──→ MasterKey (256-bit)
//!                                            └── wraps every folder's metadata keys
//! ```
//!
//! The salt is public and stored with the account; only the passphrase is secret.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::KEY_SIZE;

/// Size of the Argon2id salt stored next to the account
pub const SALT_SIZE: usize = 16;

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Import a key held elsewhere (keychain, server-side key store).
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            anyhow::anyhow!("master key must be {KEY_SIZE} bytes, got {}", bytes.len())
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Argon2id cost settings, filled from the `[crypto]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub mem_cost_kib: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 passes, 4 lanes
    fn default() -> Self {
        Self {
            mem_cost_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Fresh random salt for a new account.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> anyhow::Result<MasterKey> {
    let cost = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| anyhow::anyhow!("argon2id parameters rejected: {e}"))?;

    let mut derived = Zeroizing::new([0u8; KEY_SIZE]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, cost)
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut derived[..])
        .map_err(|e| anyhow::anyhow!("master key derivation failed: {e}"))?;

    Ok(MasterKey::from_bytes(*derived))
}
