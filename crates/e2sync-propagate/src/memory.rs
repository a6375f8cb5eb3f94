//! In-memory folder server
//!
//! Implements [`FolderProtocol`] with the server-side lock semantics of a
//! real end-to-end encryption API: one lock holder per folder (423 while
//! locked), metadata updates and unlocks only with the holder's token (403
//! otherwise). Every call is recorded in order; failures can be scripted.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use e2sync_core::{FolderId, LockToken};
use tracing::debug;

use crate::protocol::{
    normalize_path, EncryptionStatus, FolderInfo, FolderListing, FolderProtocol, LockGrant,
    MetadataDocument, ProtocolError,
};

/// A protocol operation, as recorded by [`MemoryFolderServer::calls`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolCall {
    EncryptionStatus(String),
    ListFolder(String),
    Lock(FolderId),
    FetchMetadata(FolderId),
    UpdateMetadata(FolderId),
    Unlock(FolderId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EncryptionStatus,
    ListFolder,
    Lock,
    FetchMetadata,
    UpdateMetadata,
    Unlock,
}

/// A lock response that reports success without granting the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadGrant {
    /// Token issued for a different folder id
    WrongFolder,
    /// Right folder, empty token
    EmptyToken,
}

type LockHook = Arc<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
pub struct MemoryFolderServer {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Normalized path → folder
    folders: BTreeMap<String, MemoryFolder>,
    calls: Vec<ProtocolCall>,
    failures: HashMap<Operation, ProtocolError>,
    /// Remaining scripted lock failures and their status
    lock_failures: usize,
    lock_failure_status: u16,
    bad_grants: usize,
    bad_grant: Option<BadGrant>,
    lock_attempts: usize,
    lock_hook: Option<LockHook>,
    next_id: u64,
    next_token: u64,
}

#[derive(Debug, Clone)]
struct MemoryFolder {
    path: String,
    id: FolderId,
    encrypted: bool,
    metadata: Option<Vec<u8>>,
    lock: Option<LockToken>,
}

impl std::fmt::Debug for MemoryFolderServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MemoryFolderServer")
            .field("folders", &inner.folders.len())
            .field("calls", &inner.calls.len())
            .finish_non_exhaustive()
    }
}

impl MemoryFolderServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a folder with a generated id.
    pub fn add_folder(&self, path: &str, encrypted: bool) -> FolderId {
        let id = {
            let mut inner = self.lock();
            inner.next_id += 1;
            FolderId::new(format!("{}", 1000 + inner.next_id))
        };
        self.add_folder_with_id(path, id.clone(), encrypted);
        id
    }

    pub fn add_folder_with_id(&self, path: &str, id: FolderId, encrypted: bool) {
        let key = normalize_path(path).to_string();
        self.lock().folders.insert(
            key.clone(),
            MemoryFolder {
                path: format!("/{key}"),
                id,
                encrypted,
                metadata: None,
                lock: None,
            },
        );
    }

    /// Fail the next `count` lock requests with HTTP `status`.
    pub fn fail_locks(&self, count: usize, status: u16) {
        let mut inner = self.lock();
        inner.lock_failures = count;
        inner.lock_failure_status = status;
    }

    /// Answer the next `count` lock requests, after any scripted failures,
    /// with an unusable grant. The folder stays unlocked.
    pub fn bad_grants(&self, count: usize, grant: BadGrant) {
        let mut inner = self.lock();
        inner.bad_grants = count;
        inner.bad_grant = Some(grant);
    }

    /// Fail every request of `operation` with `error`.
    pub fn fail_always(&self, operation: Operation, error: ProtocolError) {
        self.lock().failures.insert(operation, error);
    }

    /// Run `hook` with the attempt number after each lock request is received.
    pub fn on_lock_attempt(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        self.lock().lock_hook = Some(Arc::new(hook));
    }

    /// Simulate another client holding the folder lock.
    pub fn lock_externally(&self, folder_id: &FolderId) -> Option<LockToken> {
        let mut inner = self.lock();
        let token = inner.issue_token();
        let folder = inner.folder_by_id_mut(folder_id)?;
        folder.lock = Some(token.clone());
        Some(token)
    }

    pub fn metadata(&self, folder_id: &FolderId) -> Option<Vec<u8>> {
        self.lock()
            .folder_by_id(folder_id)
            .and_then(|f| f.metadata.clone())
    }

    pub fn set_metadata(&self, folder_id: &FolderId, metadata: Vec<u8>) {
        if let Some(folder) = self.lock().folder_by_id_mut(folder_id) {
            folder.metadata = Some(metadata);
        }
    }

    pub fn is_locked(&self, folder_id: &FolderId) -> bool {
        self.lock()
            .folder_by_id(folder_id)
            .is_some_and(|f| f.lock.is_some())
    }

    pub fn calls(&self) -> Vec<ProtocolCall> {
        self.lock().calls.clone()
    }

    pub fn lock_attempts(&self) -> usize {
        self.lock().lock_attempts
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call` and return the scripted failure for `operation`, if any.
    fn begin(&self, call: ProtocolCall, operation: Operation) -> Result<(), ProtocolError> {
        let mut inner = self.lock();
        debug!(?call, "memory folder server request");
        inner.calls.push(call);
        match inner.failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn grant_lock(&self, folder_id: &FolderId) -> Result<LockGrant, ProtocolError> {
        self.begin(ProtocolCall::Lock(folder_id.clone()), Operation::Lock)?;
        let mut inner = self.lock();
        inner.lock_attempts += 1;
        if inner.lock_failures > 0 {
            inner.lock_failures -= 1;
            return Err(ProtocolError::Http {
                status: inner.lock_failure_status,
            });
        }
        if inner.bad_grants > 0 {
            inner.bad_grants -= 1;
            let bad_grant = inner.bad_grant;
            return Ok(match bad_grant {
                Some(BadGrant::WrongFolder) => LockGrant {
                    folder_id: FolderId::new(format!("{folder_id}-other")),
                    token: inner.issue_token(),
                },
                Some(BadGrant::EmptyToken) | None => LockGrant {
                    folder_id: folder_id.clone(),
                    token: LockToken::new(""),
                },
            });
        }
        let token = inner.issue_token();
        let folder = inner.folder_by_id_mut(folder_id).ok_or(NOT_FOUND)?;
        if folder.lock.is_some() {
            return Err(LOCKED);
        }
        folder.lock = Some(token.clone());
        Ok(LockGrant {
            folder_id: folder_id.clone(),
            token,
        })
    }
}

impl Inner {
    fn folder_by_id(&self, id: &FolderId) -> Option<&MemoryFolder> {
        self.folders.values().find(|f| f.id == *id)
    }

    fn folder_by_id_mut(&mut self, id: &FolderId) -> Option<&mut MemoryFolder> {
        self.folders.values_mut().find(|f| f.id == *id)
    }

    fn issue_token(&mut self) -> LockToken {
        self.next_token += 1;
        LockToken::new(format!("lock-token-{}", self.next_token))
    }
}

const NOT_FOUND: ProtocolError = ProtocolError::Http { status: 404 };
const FORBIDDEN: ProtocolError = ProtocolError::Http { status: 403 };
const LOCKED: ProtocolError = ProtocolError::Http { status: 423 };

#[async_trait]
impl FolderProtocol for MemoryFolderServer {
    async fn encryption_status(&self, folder: &str) -> Result<EncryptionStatus, ProtocolError> {
        self.begin(
            ProtocolCall::EncryptionStatus(folder.to_string()),
            Operation::EncryptionStatus,
        )?;
        let inner = self.lock();
        let entry = inner
            .folders
            .get(normalize_path(folder))
            .ok_or(NOT_FOUND)?;
        Ok(EncryptionStatus {
            folder: entry.path.clone(),
            encrypted: entry.encrypted,
        })
    }

    async fn list_folder(
        &self,
        folder: &str,
        _properties: &[&str],
    ) -> Result<FolderListing, ProtocolError> {
        self.begin(
            ProtocolCall::ListFolder(folder.to_string()),
            Operation::ListFolder,
        )?;
        let inner = self.lock();
        let key = normalize_path(folder);
        let root = inner.folders.get(key).ok_or(NOT_FOUND)?;

        let mut listing = FolderListing::default();
        let children = inner.folders.iter().filter(|(path, _)| {
            path.rsplit_once('/').map_or("", |(parent, _)| parent) == key && !path.is_empty()
        });
        for entry in std::iter::once(root).chain(children.map(|(_, f)| f)) {
            listing.paths.push(entry.path.clone());
            listing.infos.insert(
                entry.path.clone(),
                FolderInfo {
                    file_id: entry.id.clone(),
                    is_collection: true,
                },
            );
        }
        Ok(listing)
    }

    async fn lock_folder(&self, folder_id: &FolderId) -> Result<LockGrant, ProtocolError> {
        let outcome = self.grant_lock(folder_id);

        let (attempt, hook) = {
            let inner = self.lock();
            (inner.lock_attempts, inner.lock_hook.clone())
        };
        if let Some(hook) = hook {
            hook(attempt);
        }
        outcome
    }

    async fn fetch_metadata(
        &self,
        folder_id: &FolderId,
    ) -> Result<MetadataDocument, ProtocolError> {
        self.begin(
            ProtocolCall::FetchMetadata(folder_id.clone()),
            Operation::FetchMetadata,
        )?;
        let inner = self.lock();
        let folder = inner.folder_by_id(folder_id).ok_or(NOT_FOUND)?;
        match &folder.metadata {
            None => Ok(MetadataDocument {
                json: serde_json::Value::Null,
                status: 404,
            }),
            Some(bytes) => {
                let json = serde_json::from_slice(bytes)
                    .map_err(|e| ProtocolError::InvalidResponse(e.to_string()))?;
                Ok(MetadataDocument { json, status: 200 })
            }
        }
    }

    async fn update_metadata(
        &self,
        folder_id: &FolderId,
        metadata: &[u8],
        token: &LockToken,
    ) -> Result<FolderId, ProtocolError> {
        self.begin(
            ProtocolCall::UpdateMetadata(folder_id.clone()),
            Operation::UpdateMetadata,
        )?;
        let mut inner = self.lock();
        let folder = inner.folder_by_id_mut(folder_id).ok_or(NOT_FOUND)?;
        if folder.lock.as_ref() != Some(token) {
            return Err(FORBIDDEN);
        }
        folder.metadata = Some(metadata.to_vec());
        Ok(folder_id.clone())
    }

    async fn unlock_folder(
        &self,
        folder_id: &FolderId,
        token: &LockToken,
    ) -> Result<FolderId, ProtocolError> {
        self.begin(ProtocolCall::Unlock(folder_id.clone()), Operation::Unlock)?;
        let mut inner = self.lock();
        let folder = inner.folder_by_id_mut(folder_id).ok_or(NOT_FOUND)?;
        if folder.lock.as_ref() != Some(token) {
            return Err(FORBIDDEN);
        }
        folder.lock = None;
        Ok(folder_id.clone())
    }
}
