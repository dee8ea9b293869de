//! Key hierarchy: user key → sub-keys, per-object content keys, key wrapping

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::envelope::{open_with_aad, seal_with_aad};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::UserKey;
use crate::{HEADER_SIZE, KEY_SIZE};

const WRAP_INFO: &[u8] = b"hstash-wrap-v1";
const DIRECT_INFO: &[u8] = b"hstash-direct-v1";
const WRAP_AAD: &[u8] = b"hstash-content-key-v1";

/// Length of a wrapped content key: header + 32-byte key
pub const WRAPPED_KEY_SIZE: usize = HEADER_SIZE + KEY_SIZE;

/// A 256-bit key that seals one object's bytes. Zeroized on drop.
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random per-object content key.
pub fn generate_content_key() -> ContentKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ContentKey::from_bytes(bytes)
}

/// Content key for objects sealed directly under the user key (no wrapping).
pub fn direct_content_key(user_key: &UserKey) -> CryptoResult<ContentKey> {
    let okm = hkdf_derive(user_key.as_bytes(), DIRECT_INFO)?;
    Ok(ContentKey::from_bytes(*okm))
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Wrap (encrypt) a content key under the user key.
///
/// Output: `[24-byte nonce][16-byte tag][32-byte encrypted key]`
pub fn wrap_content_key(user_key: &UserKey, content_key: &ContentKey) -> CryptoResult<Vec<u8>> {
    let wrapping = hkdf_derive(user_key.as_bytes(), WRAP_INFO)?;
    seal_with_aad(&wrapping, content_key.as_bytes(), WRAP_AAD)
}

/// Unwrap a content key produced by [`wrap_content_key`].
pub fn unwrap_content_key(user_key: &UserKey, wrapped: &[u8]) -> CryptoResult<ContentKey> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(CryptoError::Malformed(format!(
            "wrapped key is {} bytes (expected {})",
            wrapped.len(),
            WRAPPED_KEY_SIZE
        )));
    }

    let wrapping = hkdf_derive(user_key.as_bytes(), WRAP_INFO)?;
    let mut plaintext = open_with_aad(&wrapping, wrapped, WRAP_AAD)?;

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(ContentKey::from_bytes(key_bytes))
}

/// Encode a wrapped key for storage in a record (URL-safe base64, unpadded).
pub fn encode_wrapped(wrapped: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(wrapped)
}

/// Decode a record's wrapped key.
pub fn decode_wrapped(encoded: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CryptoError::Malformed(format!("wrapped key base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user_key() -> UserKey {
        UserKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_content_key_generation() {
        let k1 = generate_content_key();
        let k2 = generate_content_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let user = test_user_key();
        let content = generate_content_key();

        let wrapped = wrap_content_key(&user, &content).unwrap();
        let unwrapped = unwrap_content_key(&user, &wrapped).unwrap();

        assert_eq!(content.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_unwrap_wrong_user_key() {
        let content = generate_content_key();
        let wrapped = wrap_content_key(&UserKey::from_bytes([1u8; KEY_SIZE]), &content).unwrap();

        let result = unwrap_content_key(&UserKey::from_bytes([2u8; KEY_SIZE]), &wrapped);
        assert!(matches!(result, Err(CryptoError::AuthenticationFailure)));
    }

    #[test]
    fn test_wrapped_key_size() {
        let wrapped = wrap_content_key(&test_user_key(), &generate_content_key()).unwrap();
        // nonce (24) + tag (16) + key (32) = 72
        assert_eq!(wrapped.len(), WRAPPED_KEY_SIZE);
        assert_eq!(WRAPPED_KEY_SIZE, 72);
    }

    #[test]
    fn test_unwrap_rejects_bad_length() {
        let result = unwrap_content_key(&test_user_key(), &[0u8; 10]);
        assert!(matches!(result, Err(CryptoError::Malformed(_))));
    }

    #[test]
    fn test_direct_key_is_deterministic_and_domain_separated() {
        let user = test_user_key();
        let d1 = direct_content_key(&user).unwrap();
        let d2 = direct_content_key(&user).unwrap();
        let wrap = hkdf_derive(user.as_bytes(), WRAP_INFO).unwrap();

        assert_eq!(d1.as_bytes(), d2.as_bytes());
        assert_ne!(d1.as_bytes(), &*wrap);
        assert_ne!(d1.as_bytes(), user.as_bytes());
    }

    #[test]
    fn test_wrapped_encoding_roundtrip() {
        let wrapped = wrap_content_key(&test_user_key(), &generate_content_key()).unwrap();
        let encoded = encode_wrapped(&wrapped);
        assert!(!encoded.contains('+') && !encoded.contains('/'));
        assert_eq!(decode_wrapped(&encoded).unwrap(), wrapped);
        assert!(decode_wrapped("not base64 !!").is_err());
    }
}
