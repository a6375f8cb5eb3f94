//! e2sync-propagate: encrypted upload propagation
//!
//! Before the plain uploader may send a file into an end-to-end encrypted
//! folder, the file has to be encrypted and registered in the folder's
//! metadata manifest under the folder lock:
//!
//! ```text
//! Start → CheckingEncryptionStatus ──not encrypted──→ NotEncrypted
//!                │ encrypted
//!                ▼
//!         ResolvingFolderId → AcquiringLock (bounded retry) → FetchingMetadata
//!                                                                  │
//!                  Finalized ← PushingMetadata ← Encrypting ←──────┘
//! ```
//!
//! Any failing step ends in `Failed(step)` and is reported to the caller.
//! A lock that was acquired is released once, after the workflow ends.

pub mod clock;
pub mod encrypt;
pub mod error;
pub mod lock;
pub mod machine;
pub mod memory;
pub mod protocol;
pub mod settings;
pub mod upload;

pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{Step, UploadError, UploadErrorKind};
pub use lock::{FolderLockState, HeldLock, LockFailure, LockPolicy, LockStatus};
pub use memory::MemoryFolderServer;
pub use protocol::{FolderProtocol, ProtocolError};
pub use settings::UploadSettings;
pub use upload::{EncryptedUpload, UploadListener, UploadOutcome};
