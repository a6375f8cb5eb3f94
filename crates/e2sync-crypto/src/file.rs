//! Whole-file AES-128-GCM encryption
//!
//! Ciphertext file format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The key and the 16-byte IV are stored in the folder manifest, not in the
//! file. The tag is both appended and returned so the manifest can record it.
//!
//! GCM produces one tag over the whole file, and the AEAD interface here
//! works on a single buffer: both directions hold the complete file in
//! memory.

use std::io::{Read, Write};

use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes128,
    AesGcm, Nonce, Tag,
};
use anyhow::Context;
use zeroize::Zeroizing;

use crate::{FILE_IV_SIZE, FILE_KEY_SIZE, TAG_SIZE};

/// AES-128-GCM with a 128-bit nonce
type FileCipher = AesGcm<Aes128, U16>;

fn file_cipher(key: &[u8], iv: &[u8]) -> anyhow::Result<FileCipher> {
    if key.len() != FILE_KEY_SIZE {
        anyhow::bail!(
            "file key must be {FILE_KEY_SIZE} bytes, got {}",
            key.len()
        );
    }
    if iv.len() != FILE_IV_SIZE {
        anyhow::bail!(
            "initialization vector must be {FILE_IV_SIZE} bytes, got {}",
            iv.len()
        );
    }
    FileCipher::new_from_slice(key).map_err(|e| anyhow::anyhow!("file cipher init: {e}"))
}

/// Encrypt everything readable from `input` into `output`.
///
/// `input` is read to the end before anything is written, so memory use
/// grows with the file size. Returns the authentication tag. Fails only on invalid key/IV sizes or
/// local I/O errors.
pub fn file_encrypt<R: Read, W: Write>(
    key: &[u8],
    iv: &[u8],
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<Vec<u8>> {
    let cipher = file_cipher(key, iv)?;

    let mut buffer = Vec::new();
    input
        .read_to_end(&mut buffer)
        .context("reading plaintext")?;

    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(iv), b"", &mut buffer)
        .map_err(|e| anyhow::anyhow!("file encryption failed: {e}"))?;

    output.write_all(&buffer).context("writing ciphertext")?;
    output.write_all(&tag).context("writing authentication tag")?;
    output.flush().context("flushing ciphertext")?;

    Ok(tag.to_vec())
}

/// Decrypt a ciphertext stream produced by [`file_encrypt`] into `output`.
///
/// The trailing tag must match `expected_tag`, the tag recorded in the manifest.
pub fn file_decrypt<R: Read, W: Write>(
    key: &[u8],
    iv: &[u8],
    expected_tag: &[u8],
    input: &mut R,
    output: &mut W,
) -> anyhow::Result<()> {
    let cipher = file_cipher(key, iv)?;

    let mut buffer = Vec::new();
    input
        .read_to_end(&mut buffer)
        .context("reading ciphertext")?;

    if buffer.len() < TAG_SIZE {
        anyhow::bail!(
            "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
            buffer.len()
        );
    }
    let tag_bytes = buffer.split_off(buffer.len() - TAG_SIZE);
    if tag_bytes != expected_tag {
        anyhow::bail!("authentication tag does not match the manifest");
    }

    let mut plaintext = Zeroizing::new(buffer);
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(iv),
            b"",
            plaintext.as_mut_slice(),
            Tag::<U16>::from_slice(&tag_bytes),
        )
        .map_err(|_| anyhow::anyhow!("file decryption failed: wrong key or corrupted data"))?;

    output.write_all(&plaintext).context("writing plaintext")?;
    output.flush().context("flushing plaintext")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::generate_random;

    fn encrypt_bytes(key: &[u8], iv: &[u8], plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut out = Vec::new();
        let tag = file_encrypt(key, iv, &mut &plaintext[..], &mut out).unwrap();
        (out, tag)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_random(FILE_KEY_SIZE);
        let iv = generate_random(FILE_IV_SIZE);
        let plaintext = b"quarterly numbers, do not share";

        let (ciphertext, tag) = encrypt_bytes(&key, &iv, plaintext);
        assert_eq!(tag.len(), TAG_SIZE);

        let mut decrypted = Vec::new();
        file_decrypt(&key, &iv, &tag, &mut ciphertext.as_slice(), &mut decrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = generate_random(FILE_KEY_SIZE);
        let iv = generate_random(FILE_IV_SIZE);

        let (ciphertext, tag) = encrypt_bytes(&key, &iv, &[0u8; 1000]);

        // ciphertext (1000) + tag (16)
        assert_eq!(ciphertext.len(), 1000 + TAG_SIZE);
        assert_eq!(&ciphertext[1000..], tag.as_slice());
    }

    #[test]
    fn test_empty_file() {
        let key = generate_random(FILE_KEY_SIZE);
        let iv = generate_random(FILE_IV_SIZE);

        let (ciphertext, tag) = encrypt_bytes(&key, &iv, b"");
        assert_eq!(ciphertext.len(), TAG_SIZE);

        let mut decrypted = Vec::new();
        file_decrypt(&key, &iv, &tag, &mut ciphertext.as_slice(), &mut decrypted).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let iv = generate_random(FILE_IV_SIZE);
        let (ciphertext, tag) =
            encrypt_bytes(&generate_random(FILE_KEY_SIZE), &iv, b"secret");

        let mut out = Vec::new();
        let result = file_decrypt(
            &generate_random(FILE_KEY_SIZE),
            &iv,
            &tag,
            &mut ciphertext.as_slice(),
            &mut out,
        );
        assert!(result.is_err());
        assert!(out.is_empty(), "no plaintext may be written on failure");
    }

    #[test]
    fn test_tag_mismatch_fails() {
        let key = generate_random(FILE_KEY_SIZE);
        let iv = generate_random(FILE_IV_SIZE);
        let (ciphertext, _) = encrypt_bytes(&key, &iv, b"secret");

        let result = file_decrypt(
            &key,
            &iv,
            &[0u8; TAG_SIZE],
            &mut ciphertext.as_slice(),
            &mut Vec::<u8>::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_random(FILE_KEY_SIZE);
        let iv = generate_random(FILE_IV_SIZE);
        let (mut ciphertext, tag) = encrypt_bytes(&key, &iv, b"secret data");
        ciphertext[0] ^= 0xFF;

        let result = file_decrypt(
            &key,
            &iv,
            &tag,
            &mut ciphertext.as_slice(),
            &mut Vec::<u8>::new(),
        );
        assert!(result.is_err(), "tampered ciphertext must fail");
    }

    #[test]
    fn test_encrypt_consumes_chained_input() {
        let key = generate_random(FILE_KEY_SIZE);
        let iv = generate_random(FILE_IV_SIZE);
        let head = vec![0xA5u8; 70_000];
        let tail = b"trailer";

        let mut input = head.as_slice().chain(&tail[..]);
        let mut ciphertext = Vec::new();
        let tag = file_encrypt(&key, &iv, &mut input, &mut ciphertext).unwrap();
        assert_eq!(ciphertext.len(), head.len() + tail.len() + TAG_SIZE);

        let mut decrypted = Vec::new();
        file_decrypt(&key, &iv, &tag, &mut ciphertext.as_slice(), &mut decrypted).unwrap();
        assert_eq!(&decrypted[..head.len()], head.as_slice());
        assert_eq!(&decrypted[head.len()..], tail);
    }

    #[test]
    fn test_rejects_bad_key_size() {
        let mut sink = Vec::<u8>::new();
        let result = file_encrypt(&[0u8; 32], &[0u8; FILE_IV_SIZE], &mut &b"x"[..], &mut sink);
        assert!(result.is_err());
        let result = file_encrypt(&[0u8; FILE_KEY_SIZE], &[0u8; 12], &mut &b"x"[..], &mut sink);
        assert!(result.is_err());
    }
}
