//! Login password verifiers (Argon2id PHC strings)
//!
//! The verifier is what gets persisted; the password itself never is.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::KdfParams;

/// Hash a password into a PHC-format verifier string.
pub fn hash_password(password: &SecretString, params: &KdfParams) -> CryptoResult<String> {
    let argon2 = params.to_argon2()?;
    let salt = SaltString::generate(&mut OsRng);
    argon2
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::PasswordHash(e.to_string()))
}

/// Check a password against a stored verifier.
///
/// The verifier's own embedded parameters are used, so verifiers created
/// under older settings keep working.
pub fn verify_password(password: &SecretString, verifier: &str) -> CryptoResult<bool> {
    let parsed = PasswordHash::new(verifier)
        .map_err(|e| CryptoError::Malformed(format!("password verifier: {e}")))?;

    match argon2::Argon2::default().verify_password(password.expose_secret().as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(CryptoError::PasswordHash(e.to_string())),
    }
}
