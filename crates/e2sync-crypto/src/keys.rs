//! Metadata keys and XChaCha20-Poly1305 sealing
//!
//! Sealed format (binary): `[24 bytes: random nonce][ciphertext][16 bytes: Poly1305 tag]`

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::kdf::MasterKey;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Folder-scoped key sealing the private part of each file record.
///
/// Stored in the manifest only in wrapped form, under its numeric index.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MetadataKey {
    bytes: [u8; KEY_SIZE],
}

impl MetadataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MetadataKey([REDACTED])")
    }
}

pub fn generate_metadata_key() -> MetadataKey {
    let mut key = MetadataKey {
        bytes: [0u8; KEY_SIZE],
    };
    rand::thread_rng().fill_bytes(&mut key.bytes);
    key
}

/// Seal a metadata key for storage in the manifest's `metadataKeys`.
pub fn wrap_key(master: &MasterKey, key: &MetadataKey) -> anyhow::Result<Vec<u8>> {
    seal(master.as_bytes(), key.as_bytes())
        .map_err(|e| anyhow::anyhow!("wrapping metadata key: {e}"))
}

pub fn unwrap_key(master: &MasterKey, wrapped: &[u8]) -> anyhow::Result<MetadataKey> {
    const WRAPPED_LEN: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;
    if wrapped.len() != WRAPPED_LEN {
        anyhow::bail!(
            "wrapped metadata key is {} bytes, expected {WRAPPED_LEN}",
            wrapped.len()
        );
    }

    let plaintext = Zeroizing::new(
        open(master.as_bytes(), wrapped)
            .map_err(|_| anyhow::anyhow!("metadata key does not open with this master key"))?,
    );
    if plaintext.len() != KEY_SIZE {
        anyhow::bail!("unwrapped metadata key is {} bytes", plaintext.len());
    }
    let mut key = MetadataKey {
        bytes: [0u8; KEY_SIZE],
    };
    key.bytes.copy_from_slice(&plaintext);
    Ok(key)
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub(crate) fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("sealing failed: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt output of [`seal`].
pub(crate) fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> anyhow::Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        anyhow::bail!(
            "sealed data too short: {} bytes (minimum {})",
            sealed.len(),
            NONCE_SIZE + TAG_SIZE
        );
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("unsealing failed: wrong key or corrupted data"))
}
