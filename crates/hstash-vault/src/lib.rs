//! hstash-vault: per-user encryption at rest around an object store
//!
//! Upload:   checksum(plaintext) → derive user key → seal → put ciphertext → store record
//! Download: get record + ciphertext → derive user key → open → verify checksum
//!
//! Password changes go through the rotation coordinator (see [`rotation`]),
//! which holds the user's exclusive lock while it re-wraps content keys or
//! re-encrypts direct-mode objects, and commits all-or-nothing.

pub mod keystore;
pub mod locks;
pub mod records;
pub mod rotation;
pub mod tokens;
pub mod vault;

pub use keystore::{KeyMaterialStore, MemoryKeyStore};
pub use records::{MemoryRecordStore, RecordStore};
pub use rotation::RotationReport;
pub use tokens::{MokaTokenStore, UploadToken, UploadTokenStore};
pub use vault::{SealedObject, Vault, VaultSettings};

pub(crate) fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
