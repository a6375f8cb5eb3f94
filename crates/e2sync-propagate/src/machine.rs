//! Encrypted upload state machine
//!
//! [`advance`] is a pure transition function: it consumes the current state
//! and the response to the last request, and yields the next state plus the
//! next request to perform. The driver in [`crate::upload`] performs the
//! requests; this module does no I/O.
//!
//! ```text
//! state           | request issued          | on success        | on failure
//! ----------------+-------------------------+-------------------+-------------------
//! Checking…Status | encryption status       | ResolvingFolderId | Failed(step)
//!                 |                         |   or NotEncrypted |
//! ResolvingFolder | listing + fileid        | AcquiringLock     | Failed(step)
//! AcquiringLock   | lock (bounded retry)    | FetchingMetadata  | Failed(step)
//! Fetching…       | metadata fetch          | Encrypting        | Failed(step)
//! Encrypting      | local encryption        | PushingMetadata   | Failed(step)
//! PushingMetadata | metadata update         | Finalized         | Failed(step)
//! ```

use e2sync_core::{FinalizedUpload, FolderId, UploadContext};

use crate::encrypt::EncryptionOutput;
use crate::error::{Step, UploadError, UploadErrorKind};
use crate::lock::{HeldLock, LockFailure};
use crate::protocol::{EncryptionStatus, FolderListing, MetadataDocument, ProtocolError};
use crate::upload::UploadOutcome;

#[derive(Debug, Clone)]
pub enum UploadState {
    Start,
    CheckingEncryptionStatus,
    ResolvingFolderId,
    AcquiringLock { folder_id: FolderId },
    FetchingMetadata { lock: HeldLock },
    Encrypting { lock: HeldLock },
    PushingMetadata { lock: HeldLock, upload: FinalizedUpload },
    Finalized,
    NotEncrypted,
    Failed(Step),
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Finalized | UploadState::NotEncrypted | UploadState::Failed(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            UploadState::Start => "Start",
            UploadState::CheckingEncryptionStatus => "CheckingEncryptionStatus",
            UploadState::ResolvingFolderId => "ResolvingFolderId",
            UploadState::AcquiringLock { .. } => "AcquiringLock",
            UploadState::FetchingMetadata { .. } => "FetchingMetadata",
            UploadState::Encrypting { .. } => "Encrypting",
            UploadState::PushingMetadata { .. } => "PushingMetadata",
            UploadState::Finalized => "Finalized",
            UploadState::NotEncrypted => "NotEncrypted",
            UploadState::Failed(_) => "Failed",
        }
    }

    /// The workflow step this state belongs to.
    pub fn step(&self) -> Step {
        match self {
            UploadState::Start
            | UploadState::CheckingEncryptionStatus
            | UploadState::NotEncrypted => Step::CheckingEncryptionStatus,
            UploadState::ResolvingFolderId => Step::ResolvingFolderId,
            UploadState::AcquiringLock { .. } => Step::AcquiringLock,
            UploadState::FetchingMetadata { .. } => Step::FetchingMetadata,
            UploadState::Encrypting { .. } => Step::Encrypting,
            UploadState::PushingMetadata { .. } | UploadState::Finalized => Step::PushingMetadata,
            UploadState::Failed(step) => *step,
        }
    }
}

/// Outcome of the last request, fed back into [`advance`].
#[derive(Debug)]
pub enum Response {
    Started,
    EncryptionStatus(Result<EncryptionStatus, ProtocolError>),
    FolderListing(Result<FolderListing, ProtocolError>),
    Lock(Result<HeldLock, LockFailure>),
    Metadata(Result<MetadataDocument, ProtocolError>),
    Encrypted(Result<EncryptionOutput, UploadError>),
    MetadataPushed(Result<FolderId, ProtocolError>),
}

impl Response {
    fn name(&self) -> &'static str {
        match self {
            Response::Started => "start",
            Response::EncryptionStatus(_) => "encryption status",
            Response::FolderListing(_) => "folder listing",
            Response::Lock(_) => "lock",
            Response::Metadata(_) => "metadata fetch",
            Response::Encrypted(_) => "encryption",
            Response::MetadataPushed(_) => "metadata update",
        }
    }
}

/// Work the driver has to perform next.
#[derive(Debug)]
pub enum Request {
    CheckEncryptionStatus { folder: String },
    ListFolder { folder: String },
    AcquireLock { folder_id: FolderId },
    FetchMetadata { folder_id: FolderId },
    /// Encrypt the file against the fetched manifest bytes
    Encrypt { document: Vec<u8> },
    PushMetadata { lock: HeldLock, metadata: Vec<u8> },
    Finish(Result<UploadOutcome, UploadError>),
}

fn fail(step: Step, kind: impl Into<UploadErrorKind>) -> (UploadState, Request) {
    (
        UploadState::Failed(step),
        Request::Finish(Err(UploadError::new(step, kind))),
    )
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// HTTP 404 on the manifest means the folder has none yet.
const NO_MANIFEST: u16 = 404;

/// Manifest bytes to encrypt against, or the failure to report.
fn manifest_document(
    response: Result<MetadataDocument, ProtocolError>,
) -> Result<Vec<u8>, UploadErrorKind> {
    match response {
        Ok(doc) if is_success(doc.status) => serde_json::to_vec(&doc.json)
            .map_err(|e| UploadErrorKind::Metadata(anyhow::Error::new(e))),
        Ok(doc) if doc.status == NO_MANIFEST => Ok(Vec::new()),
        Ok(doc) => Err(ProtocolError::Http { status: doc.status }.into()),
        Err(e) if e.status() == Some(NO_MANIFEST) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Compute the next state and request.
pub fn advance(
    ctx: &UploadContext,
    state: UploadState,
    response: Response,
) -> (UploadState, Request) {
    let step = state.step();
    match (state, response) {
        (UploadState::Start, Response::Started) => (
            UploadState::CheckingEncryptionStatus,
            Request::CheckEncryptionStatus {
                folder: ctx.remote_folder_query().to_string(),
            },
        ),

        (UploadState::CheckingEncryptionStatus, Response::EncryptionStatus(result)) => {
            match result {
                Ok(status) if status.encrypted => (
                    UploadState::ResolvingFolderId,
                    Request::ListFolder {
                        folder: ctx.remote_folder_query().to_string(),
                    },
                ),
                Ok(_) => (
                    UploadState::NotEncrypted,
                    Request::Finish(Ok(UploadOutcome::NotEncrypted)),
                ),
                Err(e) => fail(step, e),
            }
        }

        (UploadState::ResolvingFolderId, Response::FolderListing(result)) => match result {
            Ok(listing) => match listing.folder_id_for(ctx.remote_folder_query()) {
                Some(folder_id) => (
                    UploadState::AcquiringLock {
                        folder_id: folder_id.clone(),
                    },
                    Request::AcquireLock {
                        folder_id: folder_id.clone(),
                    },
                ),
                None => fail(
                    step,
                    UploadErrorKind::FolderNotListed {
                        folder: ctx.remote_folder_query().to_string(),
                    },
                ),
            },
            Err(e) => fail(step, e),
        },

        (UploadState::AcquiringLock { .. }, Response::Lock(result)) => match result {
            Ok(lock) => {
                let folder_id = lock.folder_id.clone();
                (
                    UploadState::FetchingMetadata { lock },
                    Request::FetchMetadata { folder_id },
                )
            }
            Err(e) => fail(step, e),
        },

        (UploadState::FetchingMetadata { lock }, Response::Metadata(result)) => {
            match manifest_document(result) {
                Ok(document) => (
                    UploadState::Encrypting { lock },
                    Request::Encrypt { document },
                ),
                Err(kind) => fail(step, kind),
            }
        }

        (UploadState::Encrypting { lock }, Response::Encrypted(result)) => match result {
            Ok(output) => {
                let upload = FinalizedUpload {
                    remote_path: format!(
                        "{}/{}",
                        ctx.remote_folder(),
                        output.record.encrypted_filename
                    ),
                    ciphertext_path: output.ciphertext_path,
                    size: output.size,
                };
                (
                    UploadState::PushingMetadata {
                        lock: lock.clone(),
                        upload,
                    },
                    Request::PushMetadata {
                        lock,
                        metadata: output.metadata,
                    },
                )
            }
            Err(e) => (UploadState::Failed(e.step), Request::Finish(Err(e))),
        },

        (UploadState::PushingMetadata { upload, .. }, Response::MetadataPushed(result)) => {
            match result {
                Ok(_) => (
                    UploadState::Finalized,
                    Request::Finish(Ok(UploadOutcome::Finalized(upload))),
                ),
                Err(e) => fail(step, e),
            }
        }

        (state, response) => {
            let unexpected = UploadErrorKind::UnexpectedResponse {
                response: response.name(),
            };
            if state.is_terminal() {
                (state, Request::Finish(Err(UploadError::new(step, unexpected))))
            } else {
                fail(step, unexpected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2sync_core::LockToken;
    use e2sync_crypto::EncryptedFileRecord;
    use std::path::PathBuf;

    fn ctx() -> UploadContext {
        UploadContext::new("/sync", "/Projects/report.pdf")
    }

    fn held() -> HeldLock {
        HeldLock {
            folder_id: FolderId::from("42"),
            token: LockToken::new("token"),
        }
    }

    fn listing(path: &str, id: &str) -> FolderListing {
        let mut listing = FolderListing::default();
        listing.paths.push(path.to_string());
        listing.infos.insert(
            path.to_string(),
            crate::protocol::FolderInfo {
                file_id: FolderId::from(id),
                is_collection: true,
            },
        );
        listing
    }

    fn failed_with(out: (UploadState, Request), expected: Step) -> UploadErrorKind {
        match out {
            (UploadState::Failed(step), Request::Finish(Err(err))) => {
                assert_eq!(step, expected);
                assert_eq!(err.step, expected);
                err.kind
            }
            other => panic!("expected failure at {expected}, got {other:?}"),
        }
    }

    #[test]
    fn test_start_checks_parent_folder() {
        let (state, request) = advance(&ctx(), UploadState::Start, Response::Started);
        assert!(matches!(state, UploadState::CheckingEncryptionStatus));
        assert!(matches!(
            request,
            Request::CheckEncryptionStatus { folder } if folder == "/Projects"
        ));
    }

    #[test]
    fn test_not_encrypted_finishes_without_lock() {
        let status = EncryptionStatus {
            folder: "/Projects".into(),
            encrypted: false,
        };
        let (state, request) = advance(
            &ctx(),
            UploadState::CheckingEncryptionStatus,
            Response::EncryptionStatus(Ok(status)),
        );
        assert!(matches!(state, UploadState::NotEncrypted));
        assert!(matches!(
            request,
            Request::Finish(Ok(UploadOutcome::NotEncrypted))
        ));
    }

    #[test]
    fn test_encrypted_lists_folder() {
        let status = EncryptionStatus {
            folder: "/Projects".into(),
            encrypted: true,
        };
        let (state, request) = advance(
            &ctx(),
            UploadState::CheckingEncryptionStatus,
            Response::EncryptionStatus(Ok(status)),
        );
        assert!(matches!(state, UploadState::ResolvingFolderId));
        assert!(matches!(request, Request::ListFolder { folder } if folder == "/Projects"));
    }

    #[test]
    fn test_status_error_fails_at_status_step() {
        let kind = failed_with(
            advance(
                &ctx(),
                UploadState::CheckingEncryptionStatus,
                Response::EncryptionStatus(Err(ProtocolError::Http { status: 500 })),
            ),
            Step::CheckingEncryptionStatus,
        );
        assert!(matches!(
            kind,
            UploadErrorKind::Protocol(ProtocolError::Http { status: 500 })
        ));
    }

    #[test]
    fn test_listing_resolves_folder_id() {
        let (state, request) = advance(
            &ctx(),
            UploadState::ResolvingFolderId,
            Response::FolderListing(Ok(listing("/Projects/", "42"))),
        );
        assert!(matches!(
            state,
            UploadState::AcquiringLock { folder_id } if folder_id == FolderId::from("42")
        ));
        assert!(matches!(
            request,
            Request::AcquireLock { folder_id } if folder_id == FolderId::from("42")
        ));
    }

    #[test]
    fn test_listing_without_folder_fails() {
        let kind = failed_with(
            advance(
                &ctx(),
                UploadState::ResolvingFolderId,
                Response::FolderListing(Ok(listing("/Elsewhere", "7"))),
            ),
            Step::ResolvingFolderId,
        );
        assert!(matches!(kind, UploadErrorKind::FolderNotListed { folder } if folder == "/Projects"));
    }

    #[test]
    fn test_lock_success_fetches_metadata() {
        let (state, request) = advance(
            &ctx(),
            UploadState::AcquiringLock {
                folder_id: FolderId::from("42"),
            },
            Response::Lock(Ok(held())),
        );
        assert!(matches!(state, UploadState::FetchingMetadata { lock } if lock == held()));
        assert!(matches!(
            request,
            Request::FetchMetadata { folder_id } if folder_id == FolderId::from("42")
        ));
    }

    #[test]
    fn test_lock_failure_is_lock_error() {
        let failure = LockFailure::Exhausted {
            attempts: 61,
            elapsed: std::time::Duration::from_secs(305),
            last_status: Some(423),
        };
        let kind = failed_with(
            advance(
                &ctx(),
                UploadState::AcquiringLock {
                    folder_id: FolderId::from("42"),
                },
                Response::Lock(Err(failure.clone())),
            ),
            Step::AcquiringLock,
        );
        assert!(matches!(kind, UploadErrorKind::Lock(f) if f == failure));
    }

    #[test]
    fn test_metadata_status_handling() {
        let fetch = |doc: Result<MetadataDocument, ProtocolError>| {
            advance(
                &ctx(),
                UploadState::FetchingMetadata { lock: held() },
                Response::Metadata(doc),
            )
        };

        let json = serde_json::json!({"files": {}});
        let (state, request) = fetch(Ok(MetadataDocument {
            json: json.clone(),
            status: 200,
        }));
        assert!(matches!(state, UploadState::Encrypting { .. }));
        assert!(matches!(
            request,
            Request::Encrypt { document } if document == serde_json::to_vec(&json).unwrap()
        ));

        let (_, request) = fetch(Ok(MetadataDocument {
            json: serde_json::Value::Null,
            status: 404,
        }));
        assert!(matches!(request, Request::Encrypt { document } if document.is_empty()));

        let (_, request) = fetch(Err(ProtocolError::Http { status: 404 }));
        assert!(matches!(request, Request::Encrypt { document } if document.is_empty()));

        let kind = failed_with(
            fetch(Ok(MetadataDocument {
                json: serde_json::Value::Null,
                status: 500,
            })),
            Step::FetchingMetadata,
        );
        assert!(matches!(
            kind,
            UploadErrorKind::Protocol(ProtocolError::Http { status: 500 })
        ));
    }

    #[test]
    fn test_encrypted_output_pushes_metadata() {
        let output = EncryptionOutput {
            record: EncryptedFileRecord {
                original_filename: "report.pdf".into(),
                encrypted_filename: "Ab3dEf6hIj9lMn2pQr5t".into(),
                ..Default::default()
            },
            metadata: b"{}".to_vec(),
            ciphertext_path: PathBuf::from("/tmp/Ab3dEf6hIj9lMn2pQr5t"),
            size: 116,
        };
        let (state, request) = advance(
            &ctx(),
            UploadState::Encrypting { lock: held() },
            Response::Encrypted(Ok(output)),
        );

        let UploadState::PushingMetadata { lock, upload } = state else {
            panic!("expected PushingMetadata");
        };
        assert_eq!(lock, held());
        assert_eq!(upload.remote_path, "/Projects/Ab3dEf6hIj9lMn2pQr5t");
        assert_eq!(upload.ciphertext_path, PathBuf::from("/tmp/Ab3dEf6hIj9lMn2pQr5t"));
        assert_eq!(upload.size, 116);
        assert!(matches!(
            request,
            Request::PushMetadata { lock, metadata } if lock == held() && metadata == b"{}"
        ));
    }

    #[test]
    fn test_push_success_finalizes() {
        let upload = FinalizedUpload {
            ciphertext_path: PathBuf::from("/tmp/x"),
            remote_path: "/Projects/x".into(),
            size: 3,
        };
        let (state, request) = advance(
            &ctx(),
            UploadState::PushingMetadata {
                lock: held(),
                upload: upload.clone(),
            },
            Response::MetadataPushed(Ok(FolderId::from("42"))),
        );
        assert!(matches!(state, UploadState::Finalized));
        assert!(matches!(
            request,
            Request::Finish(Ok(UploadOutcome::Finalized(u))) if u == upload
        ));
    }

    #[test]
    fn test_push_failure_is_terminal() {
        let upload = FinalizedUpload {
            ciphertext_path: PathBuf::from("/tmp/x"),
            remote_path: "/Projects/x".into(),
            size: 3,
        };
        failed_with(
            advance(
                &ctx(),
                UploadState::PushingMetadata {
                    lock: held(),
                    upload,
                },
                Response::MetadataPushed(Err(ProtocolError::Http { status: 403 })),
            ),
            Step::PushingMetadata,
        );
    }

    #[test]
    fn test_mismatched_response_fails_current_step() {
        let kind = failed_with(
            advance(
                &ctx(),
                UploadState::ResolvingFolderId,
                Response::Lock(Ok(held())),
            ),
            Step::ResolvingFolderId,
        );
        assert!(matches!(
            kind,
            UploadErrorKind::UnexpectedResponse { response: "lock" }
        ));
    }

    #[test]
    fn test_terminal_state_is_not_left() {
        let (state, request) = advance(&ctx(), UploadState::Finalized, Response::Started);
        assert!(matches!(state, UploadState::Finalized));
        assert!(matches!(request, Request::Finish(Err(_))));
    }

    #[test]
    fn test_root_file_remote_path() {
        let ctx = UploadContext::new("/sync", "/notes.txt");
        let (_, request) = advance(&ctx, UploadState::Start, Response::Started);
        assert!(matches!(request, Request::CheckEncryptionStatus { folder } if folder == "/"));
    }
}
