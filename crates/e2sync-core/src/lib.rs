pub mod config;
pub mod error;
pub mod types;

pub use error::{E2syncError, E2syncResult};
pub use types::{FinalizedUpload, FolderId, LockToken, UploadContext};
