use serde::{Deserialize, Serialize};

/// How an object's bytes are keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Random per-object content key, wrapped by the user key.
    /// Password changes only re-wrap the content keys.
    #[default]
    Envelope,
    /// Content sealed directly under the password-derived user key.
    /// Password changes re-encrypt every object.
    Direct,
}

/// Per-user key-derivation inputs that are safe to persist.
///
/// Together with the password (known only transiently) and the server secret,
/// this is everything needed to rebuild the user key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeyMaterial {
    pub user_id: String,
    /// Argon2id PHC string for login verification
    pub password_verifier: String,
    /// Random KDF salt, regenerated on every password change
    pub salt: Vec<u8>,
    /// Bumped on each successful rotation
    pub generation: u64,
}

/// Metadata for one encrypted object held in the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedObjectRecord {
    /// Storage key, unique across the store
    pub object_name: String,
    pub owner_user_id: String,
    /// SHA-256 of the plaintext, lowercase hex
    pub checksum: String,
    pub plaintext_len: u64,
    /// Key generation the object (or its wrapped key) is sealed under
    pub key_generation: u64,
    /// Content key wrapped by the user key (base64url); `None` in direct mode
    pub wrapped_content_key: Option<String>,
    /// Unix epoch seconds
    pub created_at: u64,
}

impl EncryptedObjectRecord {
    pub fn key_mode(&self) -> KeyMode {
        if self.wrapped_content_key.is_some() {
            KeyMode::Envelope
        } else {
            KeyMode::Direct
        }
    }
}

/// Rotation lifecycle for a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationState {
    /// Key material at this generation is authoritative
    Stable { generation: u64 },
    /// A password change is in flight from this generation
    Rotating { from_generation: u64 },
}
