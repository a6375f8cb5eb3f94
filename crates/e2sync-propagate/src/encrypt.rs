//! Local encryption step: manifest update plus ciphertext on disk
//!
//! ```text
//! manifest bytes ──decode──→ FolderMetadata ──find(file name)──→ record
//!                                                      │ fresh key + IV
//! plaintext file ──AES-128-GCM──→ <temp_dir>/<encryptedFilename> (+ tag)
//!                                                      │
//!                              record.tag = tag, insert/replace, encode
//! ```
//!
//! The ciphertext is built in an anonymous temp file and only moved to its
//! final name once the updated manifest encoded, so a failed encryption
//! leaves nothing behind. Once persisted, the file belongs to the driver,
//! which removes it again if the metadata push fails.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use e2sync_core::UploadContext;
use e2sync_crypto::{
    detect_mimetype, file_encrypt, generate_random, generate_random_string,
    is_valid_encrypted_filename, EncryptedFileRecord, FolderMetadata, MasterKey, ENCRYPTED_FILENAME_LEN, FILE_IV_SIZE, FILE_KEY_SIZE,
};
use tempfile::NamedTempFile;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Step, UploadError, UploadErrorKind};

/// Metadata key index given to a file's first record; encoding fails when
/// the manifest carries no key under it
const INITIAL_METADATA_KEY: u32 = 1;

/// Result of a successful encryption step.
#[derive(Debug, Clone)]
pub struct EncryptionOutput {
    /// The record as stored in the updated manifest
    pub record: EncryptedFileRecord,
    /// Encoded manifest for the metadata update request
    pub metadata: Vec<u8>,
    pub ciphertext_path: PathBuf,
    pub size: u64,
}

fn local_io(e: anyhow::Error) -> UploadError {
    UploadError::new(Step::Encrypting, UploadErrorKind::LocalIo(e))
}

fn metadata_error(e: anyhow::Error) -> UploadError {
    UploadError::new(Step::Encrypting, UploadErrorKind::Metadata(e))
}

/// Encrypt the context's file into `temp_dir` and register it in `document`.
///
/// Blocking: runs file I/O and the cipher on the calling thread.
pub fn encrypt_for_upload(
    ctx: &UploadContext,
    document: &[u8],
    master_key: &MasterKey,
    temp_dir: &Path,
) -> Result<EncryptionOutput, UploadError> {
    let mut metadata = FolderMetadata::decode(document, master_key)
        .context("decoding folder metadata")
        .map_err(metadata_error)?;

    let plaintext_path = ctx.absolute_local_path();
    let file_name = ctx.file_name();

    let mut record = match metadata.find_by_original_filename(file_name) {
        Some(existing) => existing.clone(),
        None => EncryptedFileRecord {
            original_filename: file_name.to_string(),
            encrypted_filename: generate_random_string(ENCRYPTED_FILENAME_LEN),
            mimetype: detect_mimetype(&plaintext_path),
            file_version: 1,
            metadata_key: INITIAL_METADATA_KEY,
            ..Default::default()
        },
    };
    if !is_valid_encrypted_filename(&record.encrypted_filename) {
        return Err(metadata_error(anyhow::anyhow!(
            "refusing encrypted file name {:?}",
            record.encrypted_filename
        )));
    }
    debug!(
        encrypted_filename = %record.encrypted_filename,
        file_version = record.file_version,
        "encrypting file for upload"
    );

    // Key and IV are rotated on every upload, including re-uploads.
    record.encryption_key = Zeroizing::new(generate_random(FILE_KEY_SIZE));
    record.initialization_vector = generate_random(FILE_IV_SIZE);

    let mut input = File::open(&plaintext_path)
        .with_context(|| format!("opening {}", plaintext_path.display()))
        .map_err(local_io)?;
    let mut staged = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("creating temp file in {}", temp_dir.display()))
        .map_err(local_io)?;

    record.authentication_tag = file_encrypt(
        &record.encryption_key,
        &record.initialization_vector,
        &mut input,
        staged.as_file_mut(),
    )
    .with_context(|| format!("encrypting {}", plaintext_path.display()))
    .map_err(local_io)?;

    metadata.add_encrypted_file(record.clone());
    let encoded = metadata
        .encode(master_key)
        .context("encoding folder metadata")
        .map_err(metadata_error)?;

    let ciphertext_path = temp_dir.join(&record.encrypted_filename);
    staged
        .persist(&ciphertext_path)
        .with_context(|| format!("moving ciphertext to {}", ciphertext_path.display()))
        .map_err(local_io)?;
    let size = std::fs::metadata(&ciphertext_path)
        .with_context(|| format!("reading size of {}", ciphertext_path.display()))
        .map_err(local_io)?
        .len();

    Ok(EncryptionOutput {
        record,
        metadata: encoded,
        ciphertext_path,
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2sync_crypto::{file_decrypt, TAG_SIZE};
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        temp: TempDir,
        master: MasterKey,
    }

    fn fixture(contents: &[u8]) -> (Fixture, UploadContext) {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("Projects")).unwrap();
        std::fs::write(root.path().join("Projects/report.pdf"), contents).unwrap();
        let ctx = UploadContext::new(root.path(), "/Projects/report.pdf");
        let fixture = Fixture {
            _root: root,
            temp: TempDir::new().unwrap(),
            master: MasterKey::from_bytes([7u8; 32]),
        };
        (fixture, ctx)
    }

    #[test]
    fn test_new_record_and_ciphertext() {
        let (fx, ctx) = fixture(b"quarterly numbers");

        let out = encrypt_for_upload(&ctx, b"", &fx.master, fx.temp.path()).unwrap();

        let record = &out.record;
        assert_eq!(record.original_filename, "report.pdf");
        assert_eq!(record.encrypted_filename.len(), ENCRYPTED_FILENAME_LEN);
        assert_eq!(record.mimetype, "application/pdf");
        assert_eq!(record.file_version, 1);
        assert_eq!(record.metadata_key, 1);
        assert_eq!(record.encryption_key.len(), FILE_KEY_SIZE);
        assert_eq!(record.initialization_vector.len(), FILE_IV_SIZE);
        assert_eq!(record.authentication_tag.len(), TAG_SIZE);

        assert_eq!(
            out.ciphertext_path,
            fx.temp.path().join(&record.encrypted_filename)
        );
        assert_eq!(out.size, (b"quarterly numbers".len() + TAG_SIZE) as u64);

        let mut plaintext = Vec::<u8>::new();
        file_decrypt(
            &record.encryption_key,
            &record.initialization_vector,
            &record.authentication_tag,
            &mut File::open(&out.ciphertext_path).unwrap(),
            &mut plaintext,
        )
        .unwrap();
        assert_eq!(plaintext, b"quarterly numbers");

        let decoded = FolderMetadata::decode(&out.metadata, &fx.master).unwrap();
        assert_eq!(decoded.files(), std::slice::from_ref(record));
    }

    #[test]
    fn test_existing_record_keeps_identity() {
        let (fx, ctx) = fixture(b"v1");
        let first = encrypt_for_upload(&ctx, b"", &fx.master, fx.temp.path()).unwrap();

        std::fs::write(ctx.absolute_local_path(), b"v2 with more text").unwrap();
        let second =
            encrypt_for_upload(&ctx, &first.metadata, &fx.master, fx.temp.path()).unwrap();

        let (a, b) = (&first.record, &second.record);
        assert_eq!(a.original_filename, b.original_filename);
        assert_eq!(a.encrypted_filename, b.encrypted_filename);
        assert_eq!(a.file_version, b.file_version);
        assert_eq!(a.metadata_key, b.metadata_key);
        assert_ne!(a.encryption_key, b.encryption_key);
        assert_ne!(a.initialization_vector, b.initialization_vector);
        assert_ne!(a.authentication_tag, b.authentication_tag);

        let decoded = FolderMetadata::decode(&second.metadata, &fx.master).unwrap();
        assert_eq!(decoded.files().len(), 1);
    }

    #[test]
    fn test_missing_file_is_local_io_and_leaves_nothing() {
        let (fx, ctx) = fixture(b"x");
        let ctx = ctx.with_local_path("Projects/gone.pdf");

        let err = encrypt_for_upload(&ctx, b"", &fx.master, fx.temp.path()).unwrap_err();

        assert_eq!(err.step, Step::Encrypting);
        assert!(matches!(err.kind, UploadErrorKind::LocalIo(_)));
        assert_eq!(std::fs::read_dir(fx.temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_undecodable_manifest_is_metadata_error() {
        let (fx, ctx) = fixture(b"x");

        let err = encrypt_for_upload(&ctx, b"{not json", &fx.master, fx.temp.path()).unwrap_err();

        assert!(matches!(err.kind, UploadErrorKind::Metadata(_)));
        assert_eq!(std::fs::read_dir(fx.temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_manifest_without_initial_key_rejects_new_record() {
        let (fx, ctx) = fixture(b"x");
        let mut json: serde_json::Value =
            serde_json::from_slice(&FolderMetadata::new().encode(&fx.master).unwrap()).unwrap();
        let keys = json["metadata"]["metadataKeys"].as_object_mut().unwrap();
        let wrapped = keys.remove("1").unwrap();
        keys.insert("3".to_string(), wrapped);
        let document = serde_json::to_vec(&json).unwrap();

        let err = encrypt_for_upload(&ctx, &document, &fx.master, fx.temp.path()).unwrap_err();

        assert!(matches!(err.kind, UploadErrorKind::Metadata(_)));
        assert_eq!(std::fs::read_dir(fx.temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_wrong_master_key_is_metadata_error() {
        let (fx, ctx) = fixture(b"x");
        let out = encrypt_for_upload(&ctx, b"", &fx.master, fx.temp.path()).unwrap();

        let other = MasterKey::from_bytes([9u8; 32]);
        let err = encrypt_for_upload(&ctx, &out.metadata, &other, fx.temp.path()).unwrap_err();
        assert!(matches!(err.kind, UploadErrorKind::Metadata(_)));
    }
}
