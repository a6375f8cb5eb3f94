//! e2sync-crypto: crypto helper for end-to-end encrypted folders
//!
//! Two layers:
//! ```text
//! Master Key (256-bit, Argon2id from passphrase)
//!   └── Metadata Key (per folder, 256-bit random, wrapped by master key)
//!         └── File record block {key, filename, mimetype, version} (XChaCha20-Poly1305)
//!
//! File content: AES-128-GCM (key=16 random bytes, IV=16 random bytes), tag appended
//! ```
//!
//! The metadata keys and the sealed file records travel together in the
//! folder's JSON manifest; see [`metadata`].

pub mod file;
pub mod kdf;
pub mod keys;
pub mod metadata;
pub mod mime;
pub mod random;

pub use file::{file_decrypt, file_encrypt};
pub use kdf::{derive_master_key, generate_salt, KdfParams, MasterKey, SALT_SIZE};
pub use keys::{generate_metadata_key, unwrap_key, wrap_key, MetadataKey};
pub use metadata::{is_valid_encrypted_filename, EncryptedFileRecord, FolderMetadata};
pub use mime::detect_mimetype;
pub use random::{generate_random, generate_random_string};

/// Size of a master or metadata key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of an AEAD authentication tag (both GCM and Poly1305)
pub const TAG_SIZE: usize = 16;

/// Size of a per-file AES-128 content key
pub const FILE_KEY_SIZE: usize = 16;

/// Size of a per-file GCM initialization vector
pub const FILE_IV_SIZE: usize = 16;

/// Length of the random server-visible name given to a new encrypted file
pub const ENCRYPTED_FILENAME_LEN: usize = 20;
