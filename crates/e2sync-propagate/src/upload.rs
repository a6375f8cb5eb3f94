//! Encrypted upload driver
//!
//! Runs the [`machine`](crate::machine) to completion by performing each
//! request it emits, then releases the folder lock if one is held and
//! notifies the listener. A ciphertext written for a run that then fails is
//! deleted before the listener hears about the failure. One `EncryptedUpload` owns the lock state and the
//! manifest of exactly one workflow run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use e2sync_core::{FinalizedUpload, UploadContext};
use e2sync_crypto::MasterKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::encrypt::{encrypt_for_upload, EncryptionOutput};
use crate::error::{Step, UploadError, UploadErrorKind};
use crate::lock::{FolderLockState, LockAcquirer};
use crate::machine::{advance, Request, Response, UploadState};
use crate::protocol::{FolderProtocol, LISTING_PROPERTIES};
use crate::settings::UploadSettings;

/// Terminal result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The folder is not end-to-end encrypted; upload the plaintext as usual.
    NotEncrypted,
    /// Upload this ciphertext in place of the plaintext.
    Finalized(FinalizedUpload),
}

/// Receives exactly one notification per run.
pub trait UploadListener: Send + Sync {
    fn on_finalized(&self, ctx: &UploadContext, upload: &FinalizedUpload);

    fn on_not_encrypted(&self, _ctx: &UploadContext) {}

    fn on_failed(&self, ctx: &UploadContext, error: &UploadError);
}

pub struct EncryptedUpload<'a, P: ?Sized, C = TokioClock> {
    protocol: &'a P,
    ctx: UploadContext,
    master_key: Arc<MasterKey>,
    settings: UploadSettings,
    clock: C,
    cancel: CancellationToken,
    listener: Option<Arc<dyn UploadListener>>,
    lock_state: FolderLockState,
}

impl<'a, P> EncryptedUpload<'a, P, TokioClock>
where
    P: FolderProtocol + ?Sized,
{
    pub fn new(
        protocol: &'a P,
        ctx: UploadContext,
        master_key: Arc<MasterKey>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            protocol,
            ctx,
            master_key,
            settings,
            clock: TokioClock,
            cancel: CancellationToken::new(),
            listener: None,
            lock_state: FolderLockState::default(),
        }
    }
}

impl<'a, P, C> EncryptedUpload<'a, P, C>
where
    P: FolderProtocol + ?Sized,
    C: Clock,
{
    /// Replace the time source used by the lock retry loop.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> EncryptedUpload<'a, P, C2> {
        EncryptedUpload {
            protocol: self.protocol,
            ctx: self.ctx,
            master_key: self.master_key,
            settings: self.settings,
            clock,
            cancel: self.cancel,
            listener: self.listener,
            lock_state: self.lock_state,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn UploadListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Token that abandons a pending lock acquisition when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn context(&self) -> &UploadContext {
        &self.ctx
    }

    pub fn lock_state(&self) -> &FolderLockState {
        &self.lock_state
    }

    /// Drive the workflow to a terminal state.
    pub async fn run(&mut self) -> Result<UploadOutcome, UploadError> {
        info!(remote_path = %self.ctx.remote_path, "starting encrypted upload");

        let mut state = UploadState::Start;
        let mut response = Response::Started;
        let mut ciphertext: Option<PathBuf> = None;
        let result = loop {
            let (next, request) = advance(&self.ctx, state, response);
            debug!(
                remote_path = %self.ctx.remote_path,
                state = next.name(),
                "encrypted upload transition"
            );
            state = next;
            response = match request {
                Request::CheckEncryptionStatus { folder } => {
                    Response::EncryptionStatus(self.protocol.encryption_status(&folder).await)
                }
                Request::ListFolder { folder } => Response::FolderListing(
                    self.protocol
                        .list_folder(&folder, &LISTING_PROPERTIES)
                        .await,
                ),
                Request::AcquireLock { folder_id } => {
                    let acquirer = LockAcquirer::new(
                        self.protocol,
                        &self.clock,
                        &self.settings.lock,
                        &self.cancel,
                    );
                    Response::Lock(acquirer.acquire(&folder_id, &mut self.lock_state).await)
                }
                Request::FetchMetadata { folder_id } => {
                    Response::Metadata(self.protocol.fetch_metadata(&folder_id).await)
                }
                Request::Encrypt { document } => {
                    let encrypted = self.encrypt(document).await;
                    if let Ok(output) = &encrypted {
                        ciphertext = Some(output.ciphertext_path.clone());
                    }
                    Response::Encrypted(encrypted)
                }
                Request::PushMetadata { lock, metadata } => Response::MetadataPushed(
                    self.protocol
                        .update_metadata(&lock.folder_id, &metadata, &lock.token)
                        .await,
                ),
                Request::Finish(result) => break result,
            };
        };

        self.release_lock().await;
        if let (Err(_), Some(path)) = (&result, &ciphertext) {
            discard_ciphertext(path).await;
        }
        self.report(&result);
        result
    }

    async fn encrypt(&self, document: Vec<u8>) -> Result<EncryptionOutput, UploadError> {
        let ctx = self.ctx.clone();
        let master_key = Arc::clone(&self.master_key);
        let temp_dir: PathBuf = self.settings.temp_dir.clone();
        tokio::task::spawn_blocking(move || {
            encrypt_for_upload(&ctx, &document, &master_key, &temp_dir)
        })
        .await
        .unwrap_or_else(|e| {
            Err(UploadError::new(
                Step::Encrypting,
                UploadErrorKind::LocalIo(anyhow::anyhow!("encryption task failed: {e}")),
            ))
        })
    }

    /// Unlock the folder if this run holds its lock. Failure is only logged.
    async fn release_lock(&mut self) {
        let Some(held) = self.lock_state.take_held() else {
            return;
        };
        match self
            .protocol
            .unlock_folder(&held.folder_id, &held.token)
            .await
        {
            Ok(_) => debug!(folder_id = %held.folder_id, "folder unlocked"),
            Err(e) => warn!(
                folder_id = %held.folder_id,
                error = %e,
                "folder unlock failed, lock left to expire on the server"
            ),
        }
    }

    fn report(&self, result: &Result<UploadOutcome, UploadError>) {
        match result {
            Ok(UploadOutcome::Finalized(upload)) => {
                info!(
                    remote_path = %upload.remote_path,
                    size = upload.size,
                    "encrypted upload finalized"
                );
                if let Some(listener) = &self.listener {
                    listener.on_finalized(&self.ctx, upload);
                }
            }
            Ok(UploadOutcome::NotEncrypted) => {
                info!(remote_path = %self.ctx.remote_path, "folder is not encrypted");
                if let Some(listener) = &self.listener {
                    listener.on_not_encrypted(&self.ctx);
                }
            }
            Err(e) => {
                error!(remote_path = %self.ctx.remote_path, step = %e.step, error = %e.kind, "encrypted upload failed");
                if let Some(listener) = &self.listener {
                    listener.on_failed(&self.ctx, e);
                }
            }
        }
    }
}

/// Remove the ciphertext of a failed run. Failure is only logged.
async fn discard_ciphertext(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "discarded ciphertext of failed upload"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "could not remove ciphertext of failed upload"
        ),
    }
}
