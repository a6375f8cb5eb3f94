//! Remote folder protocol: the server operations the workflow depends on.
//!
//! Transport and wire encoding live behind [`FolderProtocol`]. Each request
//! is awaited by the step that issued it, so responses correlate with their
//! request through the continuation rather than a shared sender object.

use std::collections::HashMap;

use async_trait::async_trait;
use e2sync_core::{FolderId, LockToken};
use thiserror::Error;

/// WebDAV properties requested when resolving a folder's id
pub const LISTING_PROPERTIES: [&str; 2] = ["resourcetype", "http://owncloud.org/ns:fileid"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("server returned HTTP {status}")]
    Http { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProtocolError {
    /// HTTP-style status code carried by the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProtocolError::Http { status } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionStatus {
    pub folder: String,
    pub encrypted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub file_id: FolderId,
    pub is_collection: bool,
}

/// PROPFIND-style listing: matched paths in server order plus their properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderListing {
    pub paths: Vec<String>,
    pub infos: HashMap<String, FolderInfo>,
}

impl FolderListing {
    /// Id of the listed entry whose path is `folder`.
    ///
    /// Paths compare without leading or trailing slashes.
    pub fn folder_id_for(&self, folder: &str) -> Option<&FolderId> {
        let wanted = normalize_path(folder);
        self.paths
            .iter()
            .find(|p| normalize_path(p) == wanted)
            .and_then(|p| self.infos.get(p))
            .map(|info| &info.file_id)
            .filter(|id| !id.is_empty())
    }
}

pub(crate) fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    pub folder_id: FolderId,
    pub token: LockToken,
}

/// Raw manifest as returned by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDocument {
    pub json: serde_json::Value,
    pub status: u16,
}

#[async_trait]
pub trait FolderProtocol: Send + Sync {
    /// Whether the remote folder has end-to-end encryption enabled.
    async fn encryption_status(&self, folder: &str) -> Result<EncryptionStatus, ProtocolError>;

    /// List `folder` with the given properties.
    async fn list_folder(
        &self,
        folder: &str,
        properties: &[&str],
    ) -> Result<FolderListing, ProtocolError>;

    /// Take the folder's metadata lock.
    async fn lock_folder(&self, folder_id: &FolderId) -> Result<LockGrant, ProtocolError>;

    /// Fetch the folder's manifest.
    async fn fetch_metadata(&self, folder_id: &FolderId)
        -> Result<MetadataDocument, ProtocolError>;

    /// Replace the folder's manifest. Requires the lock token.
    async fn update_metadata(
        &self,
        folder_id: &FolderId,
        metadata: &[u8],
        token: &LockToken,
    ) -> Result<FolderId, ProtocolError>;

    /// Release the folder's metadata lock.
    async fn unlock_folder(
        &self,
        folder_id: &FolderId,
        token: &LockToken,
    ) -> Result<FolderId, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn listing(entries: &[(&str, &str)]) -> FolderListing {
        let mut listing = FolderListing::default();
        for (path, id) in entries {
            listing.paths.push(path.to_string());
            listing.infos.insert(
                path.to_string(),
                FolderInfo {
                    file_id: FolderId::from(*id),
                    is_collection: true,
                },
            );
        }
        listing
    }

    #[test]
    fn test_folder_id_matches_queried_path() {
        let listing = listing(&[("/Projects/", "42"), ("/Projects/Drafts/", "43")]);
        assert_eq!(listing.folder_id_for("/Projects"), Some(&FolderId::from("42")));
        assert_eq!(
            listing.folder_id_for("Projects/Drafts"),
            Some(&FolderId::from("43"))
        );
    }

    #[test]
    fn test_folder_id_not_first_entry() {
        let listing = listing(&[("/Projects/Drafts", "43"), ("/Projects", "42")]);
        assert_eq!(listing.folder_id_for("/Projects"), Some(&FolderId::from("42")));
    }

    #[test]
    fn test_folder_id_missing() {
        let listing = listing(&[("/Other", "7"), ("/Empty", "")]);
        assert_eq!(listing.folder_id_for("/Projects"), None);
        assert_eq!(listing.folder_id_for("/Empty"), None);
    }

    #[test]
    fn test_error_status() {
        assert_eq!(ProtocolError::Http { status: 423 }.status(), Some(423));
        assert_eq!(ProtocolError::Transport("reset".into()).status(), None);
    }

    proptest! {
        #[test]
        fn folder_id_ignores_surrounding_slashes(
            name in "[A-Za-z0-9]{1,12}(/[A-Za-z0-9]{1,12}){0,3}",
            lead in 0usize..3,
            trail in 0usize..3,
        ) {
            let listed = format!("{}{}{}", "/".repeat(lead), name, "/".repeat(trail));
            let listing = listing(&[(listed.as_str(), "9")]);
            let wanted = format!("/{name}");
            prop_assert_eq!(listing.folder_id_for(&wanted), Some(&FolderId::from("9")));
        }
    }
}
