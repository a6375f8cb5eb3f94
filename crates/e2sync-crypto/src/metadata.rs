//! Folder metadata manifest
//!
//! Every end-to-end encrypted folder carries one JSON manifest on the server:
//! ```text
//! {
//!   "metadata": { "version": 1, "metadataKeys": { "1": b64(wrap(master, metadata_key)) } },
//!   "files": {
//!     "<encryptedFilename>": {
//!       "encrypted": b64(seal(metadata_key, {key, filename, encryptedFilename, mimetype, version})),
//!       "initializationVector": b64(iv),
//!       "authenticationTag": b64(tag),
//!       "metadataKey": 1
//!     }
//!   }
//! }
//! ```
//!
//! The server sees only the opaque encrypted names, IVs and tags. Original
//! names, content keys and mimetypes are sealed with the folder's metadata key.
//! The encrypted name is sealed as well and must match its `files` key, so a
//! server cannot move a record under another name. Records keep their order
//! through a decode/encode cycle.

use std::collections::{BTreeMap, HashSet};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::kdf::MasterKey;
use crate::keys::{generate_metadata_key, open, seal, unwrap_key, wrap_key, MetadataKey};
use crate::ENCRYPTED_FILENAME_LEN;

/// Manifest format version
pub const METADATA_VERSION: u32 = 1;

/// One file entry of a folder manifest.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EncryptedFileRecord {
    pub original_filename: String,
    /// Server-visible opaque name, see [`is_valid_encrypted_filename`]
    pub encrypted_filename: String,
    pub mimetype: String,
    pub encryption_key: Zeroizing<Vec<u8>>,
    pub initialization_vector: Vec<u8>,
    pub authentication_tag: Vec<u8>,
    pub file_version: u32,
    /// Index of the metadata key sealing this record
    pub metadata_key: u32,
}

/// Whether `name` has the shape of a generated encrypted file name.
///
/// The name becomes a local temp file name and a remote path component, so
/// only exactly [`ENCRYPTED_FILENAME_LEN`] ASCII alphanumerics are accepted.
pub fn is_valid_encrypted_filename(name: &str) -> bool {
    name.len() == ENCRYPTED_FILENAME_LEN && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn check_encrypted_filename(name: &str) -> anyhow::Result<()> {
    if !is_valid_encrypted_filename(name) {
        anyhow::bail!("invalid encrypted file name {name:?}");
    }
    Ok(())
}

impl std::fmt::Debug for EncryptedFileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileRecord")
            .field("original_filename", &self.original_filename)
            .field("encrypted_filename", &self.encrypted_filename)
            .field("mimetype", &self.mimetype)
            .field("encryption_key", &"[REDACTED]")
            .field("file_version", &self.file_version)
            .field("metadata_key", &self.metadata_key)
            .finish_non_exhaustive()
    }
}

/// Decoded folder manifest: folder-scoped keys plus the ordered file records.
#[derive(Debug, Clone)]
pub struct FolderMetadata {
    version: u32,
    metadata_keys: BTreeMap<u32, MetadataKey>,
    files: Vec<EncryptedFileRecord>,
}

impl Default for FolderMetadata {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderMetadata {
    /// An empty manifest for a folder that has never held encrypted files.
    pub fn new() -> Self {
        let mut metadata_keys = BTreeMap::new();
        metadata_keys.insert(1, generate_metadata_key());
        Self {
            version: METADATA_VERSION,
            metadata_keys,
            files: Vec::new(),
        }
    }

    /// Decode a manifest as fetched from the server.
    ///
    /// An empty body, `null`, `{}` or a document without folder settings is
    /// a folder that has no manifest yet and yields [`FolderMetadata::new`].
    pub fn decode(data: &[u8], master_key: &MasterKey) -> anyhow::Result<Self> {
        let data = data.trim_ascii();
        if data.is_empty() {
            return Ok(Self::new());
        }

        let wire: Option<WireManifest> =
            serde_json::from_slice(data).context("parsing folder metadata")?;
        let Some(wire) = wire else {
            return Ok(Self::new());
        };
        let Some(settings) = wire.metadata else {
            if !wire.files.is_empty() {
                anyhow::bail!(
                    "folder metadata lists {} files but carries no metadata keys",
                    wire.files.len()
                );
            }
            return Ok(Self::new());
        };

        if settings.version != METADATA_VERSION {
            anyhow::bail!(
                "unsupported folder metadata version {} (expected {METADATA_VERSION})",
                settings.version
            );
        }

        let mut metadata_keys = BTreeMap::new();
        for (index, wrapped) in &settings.metadata_keys {
            let wrapped = base64_decode(wrapped)
                .with_context(|| format!("decoding metadata key {index}"))?;
            let key = unwrap_key(master_key, &wrapped)
                .with_context(|| format!("unwrapping metadata key {index}"))?;
            metadata_keys.insert(*index, key);
        }
        if metadata_keys.is_empty() {
            anyhow::bail!("folder metadata carries no metadata keys");
        }

        let mut files = Vec::with_capacity(wire.files.len());
        let mut seen = HashSet::with_capacity(wire.files.len());
        for (encrypted_filename, entry) in wire.files {
            check_encrypted_filename(&encrypted_filename)?;
            if !seen.insert(encrypted_filename.clone()) {
                anyhow::bail!("file {encrypted_filename} is listed twice");
            }
            let key = metadata_keys.get(&entry.metadata_key).ok_or_else(|| {
                anyhow::anyhow!(
                    "file {encrypted_filename} references unknown metadata key {}",
                    entry.metadata_key
                )
            })?;
            let sealed = base64_decode(&entry.encrypted)
                .with_context(|| format!("decoding record of {encrypted_filename}"))?;
            let private = Zeroizing::new(
                open(key.as_bytes(), &sealed)
                    .with_context(|| format!("unsealing record of {encrypted_filename}"))?,
            );
            let private: WirePrivate = serde_json::from_slice(&private)
                .with_context(|| format!("parsing record of {encrypted_filename}"))?;
            if private.encrypted_filename != encrypted_filename {
                anyhow::bail!(
                    "record listed as {encrypted_filename} was sealed for {:?}",
                    private.encrypted_filename
                );
            }

            files.push(EncryptedFileRecord {
                original_filename: private.filename,
                encrypted_filename,
                mimetype: private.mimetype,
                encryption_key: Zeroizing::new(base64_decode(&private.key)?),
                initialization_vector: base64_decode(&entry.initialization_vector)?,
                authentication_tag: base64_decode(&entry.authentication_tag)?,
                file_version: private.version,
                metadata_key: entry.metadata_key,
            });
        }

        Ok(Self {
            version: settings.version,
            metadata_keys,
            files,
        })
    }

    /// Encode for the metadata update request.
    pub fn encode(&self, master_key: &MasterKey) -> anyhow::Result<Vec<u8>> {
        let mut metadata_keys = BTreeMap::new();
        for (index, key) in &self.metadata_keys {
            metadata_keys.insert(*index, base64_encode(&wrap_key(master_key, key)?));
        }

        let mut files = Vec::with_capacity(self.files.len());
        for record in &self.files {
            check_encrypted_filename(&record.encrypted_filename)?;
            let key = self.metadata_keys.get(&record.metadata_key).ok_or_else(|| {
                anyhow::anyhow!(
                    "file {} references unknown metadata key {}",
                    record.encrypted_filename,
                    record.metadata_key
                )
            })?;
            let private = Zeroizing::new(
                serde_json::to_vec(&WirePrivate {
                    key: base64_encode(&record.encryption_key),
                    filename: record.original_filename.clone(),
                    encrypted_filename: record.encrypted_filename.clone(),
                    mimetype: record.mimetype.clone(),
                    version: record.file_version,
                })
                .context("serializing file record")?,
            );
            files.push((
                record.encrypted_filename.clone(),
                WireFile {
                    encrypted: base64_encode(&seal(key.as_bytes(), &private)?),
                    initialization_vector: base64_encode(&record.initialization_vector),
                    authentication_tag: base64_encode(&record.authentication_tag),
                    metadata_key: record.metadata_key,
                },
            ));
        }

        let wire = WireManifest {
            metadata: Some(WireSettings {
                version: self.version,
                metadata_keys,
            }),
            files,
        };
        serde_json::to_vec(&wire).context("serializing folder metadata")
    }

    pub fn files(&self) -> &[EncryptedFileRecord] {
        &self.files
    }

    /// Linear search for the record of a plaintext file name.
    pub fn find_by_original_filename(&self, name: &str) -> Option<&EncryptedFileRecord> {
        self.files.iter().find(|f| f.original_filename == name)
    }

    /// Insert a record, replacing any record with the same encrypted name.
    pub fn add_encrypted_file(&mut self, record: EncryptedFileRecord) {
        match self
            .files
            .iter_mut()
            .find(|f| f.encrypted_filename == record.encrypted_filename)
        {
            Some(existing) => *existing = record,
            None => self.files.push(record),
        }
    }

    /// Index of the newest metadata key.
    pub fn current_metadata_key(&self) -> u32 {
        self.metadata_keys.keys().next_back().copied().unwrap_or(1)
    }
}

// ── Wire format ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<WireSettings>,
    #[serde(default, with = "ordered_files")]
    files: Vec<(String, WireFile)>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSettings {
    version: u32,
    metadata_keys: BTreeMap<u32, String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    encrypted: String,
    initialization_vector: String,
    authentication_tag: String,
    metadata_key: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePrivate {
    key: String,
    filename: String,
    encrypted_filename: String,
    mimetype: String,
    version: u32,
}

/// The `files` object as a list of entries in document order.
mod ordered_files {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    use super::WireFile;

    pub fn serialize<S: Serializer>(
        files: &[(String, WireFile)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(files.iter().map(|(name, entry)| (name, entry)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, WireFile)>, D::Error> {
        struct FilesVisitor;

        impl<'de> Visitor<'de> for FilesVisitor {
            type Value = Vec<(String, WireFile)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of encrypted file entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut files = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    files.push(entry);
                }
                Ok(files)
            }
        }

        deserializer.deserialize_map(FilesVisitor)
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

fn base64_decode(s: &str) -> anyhow::Result<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(s)
        .map_err(|e| anyhow::anyhow!("base64 decode: {e}"))
}
