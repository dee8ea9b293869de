//! hstash-crypto: per-user encryption at rest
//!
//! Key hierarchy:
//! ```text
//! User Key (256-bit, Argon2id over user_id:password:server_secret + per-user salt)
//!   ├── Wrapping Key (HKDF, info="hstash-wrap-v1")
//!   │   └── Content Key (per-object, 256-bit random) ── XChaCha20-Poly1305 over file bytes
//!   └── Direct Key (HKDF, info="hstash-direct-v1") ── legacy objects sealed without a content key
//! ```
//!
//! Sealed blob layout: `[24-byte nonce][16-byte Poly1305 tag][ciphertext]`.

pub mod checksum;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod names;
pub mod password;

pub use checksum::{checksum, verify_checksum};
pub use envelope::{open, open_with_aad, seal, seal_with_aad};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_user_key, generate_salt, key_secret, KdfParams, UserKey};
pub use keys::{
    decode_wrapped, direct_content_key, encode_wrapped, generate_content_key, unwrap_content_key,
    wrap_content_key, ContentKey,
};
pub use names::{generate_object_name, sanitize_filename, user_prefix};
pub use password::{hash_password, verify_password};

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed blob adds on top of its plaintext
pub const HEADER_SIZE: usize = NONCE_SIZE + TAG_SIZE;
