use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Per-upload input handed to the encrypted propagation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadContext {
    /// Local sync root directory
    pub local_root: PathBuf,
    /// Path of the file relative to `local_root`
    pub local_path: PathBuf,
    /// Remote path of the file relative to the account root (e.g. `/Projects/report.pdf`)
    pub remote_path: String,
}

impl UploadContext {
    /// Build a context where the local relative path mirrors the remote path.
    pub fn new(local_root: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        let remote_path = remote_path.into();
        let local_path = PathBuf::from(remote_path.trim_start_matches('/'));
        Self {
            local_root: local_root.into(),
            local_path,
            remote_path,
        }
    }

    /// Override the local relative path when it differs from the remote one.
    pub fn with_local_path(mut self, local_path: impl Into<PathBuf>) -> Self {
        self.local_path = local_path.into();
        self
    }

    /// Absolute path of the plaintext file on disk.
    pub fn absolute_local_path(&self) -> PathBuf {
        self.local_root.join(&self.local_path)
    }

    /// Base name of the file being uploaded.
    pub fn file_name(&self) -> &str {
        self.remote_path
            .rsplit('/')
            .next()
            .unwrap_or(self.remote_path.as_str())
    }

    /// Remote directory containing the file, without a trailing slash.
    ///
    /// Empty for files directly under the account root.
    pub fn remote_folder(&self) -> &str {
        match self.remote_path.rfind('/') {
            Some(idx) => &self.remote_path[..idx],
            None => "",
        }
    }

    /// Folder path used when querying the server about the parent folder.
    pub fn remote_folder_query(&self) -> &str {
        match self.remote_folder() {
            "" => "/",
            folder => folder,
        }
    }
}

/// Server-assigned opaque folder identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderId(String);

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FolderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque credential proving ownership of a folder lock. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockToken").field(&"[REDACTED]").finish()
    }
}

/// Ciphertext handed to the plain upload pipeline once metadata is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedUpload {
    /// Absolute path of the ciphertext file in the temp directory
    pub ciphertext_path: PathBuf,
    /// Remote destination: original remote directory + encrypted filename
    pub remote_path: String,
    /// Ciphertext size in bytes
    pub size: u64,
}

impl FinalizedUpload {
    pub fn ciphertext_path(&self) -> &Path {
        &self.ciphertext_path
    }
}
