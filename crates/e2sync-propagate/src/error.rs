use std::fmt;

use thiserror::Error;

use crate::lock::LockFailure;
use crate::protocol::ProtocolError;

/// Workflow step at which an encrypted upload stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CheckingEncryptionStatus,
    ResolvingFolderId,
    AcquiringLock,
    FetchingMetadata,
    Encrypting,
    PushingMetadata,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::CheckingEncryptionStatus => "checking folder encryption status",
            Step::ResolvingFolderId => "resolving folder id",
            Step::AcquiringLock => "acquiring folder lock",
            Step::FetchingMetadata => "fetching folder metadata",
            Step::Encrypting => "encrypting file",
            Step::PushingMetadata => "pushing folder metadata",
        };
        f.write_str(s)
    }
}

/// Failure notification for an encrypted upload: what went wrong and where.
#[derive(Debug, Error)]
#[error("encrypted upload failed while {step}: {kind}")]
pub struct UploadError {
    pub step: Step,
    pub kind: UploadErrorKind,
}

impl UploadError {
    pub fn new(step: Step, kind: impl Into<UploadErrorKind>) -> Self {
        Self {
            step,
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadErrorKind {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("server listing has no id for folder {folder}")]
    FolderNotListed { folder: String },

    #[error(transparent)]
    Lock(#[from] LockFailure),

    #[error("folder metadata: {0:#}")]
    Metadata(anyhow::Error),

    #[error("local encryption: {0:#}")]
    LocalIo(anyhow::Error),

    #[error("unexpected {response} response")]
    UnexpectedResponse { response: &'static str },
}
