//! Key derivation: Argon2id over (user id, password, server secret) + salt → user key

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::KEY_SIZE;

/// Shortest salt accepted by [`derive_user_key`]
pub const MIN_SALT_LEN: usize = 16;

/// Length of salts produced by [`generate_salt`]
pub const SALT_LEN: usize = 16;

/// A 256-bit key derived from a user's password.
///
/// Rebuilt on every request and never persisted. Zeroized on drop.
#[derive(Clone)]
pub struct UserKey {
    bytes: [u8; KEY_SIZE],
}

impl UserKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// URL-safe base64 rendering, for handing the key across a process boundary
    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.bytes)
    }
}

impl Drop for UserKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters for KDF
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl From<&hstash_core::config::CryptoConfig> for KdfParams {
    fn from(cfg: &hstash_core::config::CryptoConfig) -> Self {
        Self {
            mem_cost_kib: cfg.argon2_mem_cost_kib,
            time_cost: cfg.argon2_time_cost,
            parallelism: cfg.argon2_parallelism,
        }
    }
}

impl KdfParams {
    pub(crate) fn to_argon2(&self) -> CryptoResult<Argon2<'static>> {
        let params = Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::InvalidParams(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Bind the three key factors into one KDF input.
///
/// Leaking any one of user id, password, or server secret alone is not enough
/// to rebuild a user key. The user id may not contain `:`, so the split
/// between user id and password is unambiguous.
pub fn key_secret(
    user_id: &str,
    password: &SecretString,
    server_secret: &SecretString,
) -> CryptoResult<SecretString> {
    if user_id.contains(':') {
        return Err(CryptoError::Malformed(format!(
            "user id contains the ':' separator: {user_id:?}"
        )));
    }
    Ok(SecretString::from(format!(
        "{}:{}:{}",
        user_id,
        password.expose_secret(),
        server_secret.expose_secret()
    )))
}

/// Generate a fresh random salt.
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit user key from a secret and salt using Argon2id.
///
/// Deterministic for the same inputs. Salts shorter than [`MIN_SALT_LEN`] are
/// rejected instead of producing a weak key.
pub fn derive_user_key(
    secret: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<UserKey> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::WeakSalt {
            len: salt.len(),
            min: MIN_SALT_LEN,
        });
    }

    let argon2 = params.to_argon2()?;

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;

    Ok(UserKey::from_bytes(key))
}

#[cfg(test)]
pub(crate) fn fast_params() -> KdfParams {
    KdfParams {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}
