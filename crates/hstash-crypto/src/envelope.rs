//! XChaCha20-Poly1305 sealing of arbitrary byte buffers
//!
//! Sealed blob format (binary):
//! ```text
//! [24 bytes: random nonce][16 bytes: Poly1305 tag][N bytes: ciphertext]
//! ```
//!
//! Everything needed to open a blob travels inside it; only the key is
//! supplied separately. Optional AAD binds a blob to its context (for example
//! the object name) so blobs cannot be swapped between objects.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Tag, XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::{HEADER_SIZE, KEY_SIZE, NONCE_SIZE};

/// Seal `plaintext` under `key` with a fresh random nonce.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    seal_with_aad(key, plaintext, &[])
}

/// Open a blob produced by [`seal`].
pub fn open(key: &[u8; KEY_SIZE], sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    open_with_aad(key, sealed, &[])
}

/// Seal `plaintext`, authenticating `aad` alongside it.
///
/// Returns: `[24-byte nonce][16-byte tag][ciphertext]`
pub fn seal_with_aad(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let mut out = Vec::with_capacity(HEADER_SIZE + plaintext.len());
    out.extend_from_slice(&nonce_bytes);
    out.resize(HEADER_SIZE, 0);
    out.extend_from_slice(plaintext);

    let tag = cipher
        .encrypt_in_place_detached(nonce, aad, &mut out[HEADER_SIZE..])
        .map_err(|_| CryptoError::Encryption)?;
    out[NONCE_SIZE..HEADER_SIZE].copy_from_slice(&tag);

    Ok(out)
}

/// Open a blob produced by [`seal_with_aad`] with the same `aad`.
///
/// Any mismatch (wrong key, wrong AAD, truncation, a flipped bit anywhere)
/// yields [`CryptoError::AuthenticationFailure`]. No plaintext is released
/// unless the tag verifies.
pub fn open_with_aad(key: &[u8; KEY_SIZE], sealed: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < HEADER_SIZE {
        return Err(CryptoError::AuthenticationFailure);
    }

    let (nonce_bytes, rest) = sealed.split_at(NONCE_SIZE);
    let (tag_bytes, ciphertext) = rest.split_at(HEADER_SIZE - NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let tag = Tag::from_slice(tag_bytes);
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce, aad, &mut buf, tag)
        .map_err(|_| CryptoError::AuthenticationFailure)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn random_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = random_key();
        let plaintext = b"lab results 2026-03-02: HbA1c 5.4%";

        let sealed = seal(&key, plaintext).unwrap();
        let opened = open(&key, &sealed).unwrap();

        assert_eq!(&opened, plaintext);
    }

    #[test]
    fn test_seal_open_empty() {
        let key = random_key();
        let sealed = seal(&key, b"").unwrap();
        assert_eq!(sealed.len(), HEADER_SIZE);
        assert_eq!(open(&key, &sealed).unwrap(), b"");
    }

    #[test]
    fn test_sealed_size() {
        let key = random_key();
        let sealed = seal(&key, &[0u8; 1000]).unwrap();
        // nonce (24) + tag (16) + plaintext (1000)
        assert_eq!(sealed.len(), 24 + 16 + 1000);
    }

    #[test]
    fn test_same_plaintext_seals_differently() {
        let key = random_key();
        let plaintext = b"x-ray report";

        let a = seal(&key, plaintext).unwrap();
        let b = seal(&key, plaintext).unwrap();

        assert_ne!(a, b, "fresh nonce per call");
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_eq!(open(&key, &a).unwrap(), plaintext);
        assert_eq!(open(&key, &b).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_never_accepted() {
        let key = random_key();
        let sealed = seal(&key, b"prescription: amoxicillin 500mg").unwrap();

        for _ in 0..128 {
            let wrong = random_key();
            let result = open(&wrong, &sealed);
            assert!(
                matches!(result, Err(CryptoError::AuthenticationFailure)),
                "wrong key must fail closed"
            );
        }
    }

    #[test]
    fn test_tamper_any_byte_fails() {
        let key = random_key();
        let sealed = seal(&key, b"vaccination record").unwrap();

        // nonce, tag, and payload regions
        for idx in [0, NONCE_SIZE + 3, HEADER_SIZE, sealed.len() - 1] {
            let mut tampered = sealed.clone();
            tampered[idx] ^= 0x01;
            assert!(
                matches!(open(&key, &tampered), Err(CryptoError::AuthenticationFailure)),
                "flipping byte {idx} must fail"
            );
        }
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = random_key();
        let sealed = seal(&key, b"data").unwrap();

        assert!(open(&key, &sealed[..HEADER_SIZE - 1]).is_err());
        assert!(open(&key, &sealed[..sealed.len() - 1]).is_err());
        assert!(open(&key, &[]).is_err());
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let key = random_key();
        let sealed = seal_with_aad(&key, b"scan.dcm", b"u1/aaaa.dcm").unwrap();

        assert!(open_with_aad(&key, &sealed, b"u1/aaaa.dcm").is_ok());
        assert!(open_with_aad(&key, &sealed, b"u1/bbbb.dcm").is_err());
        assert!(open(&key, &sealed).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_any_payload(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let key = random_key();
            let sealed = seal(&key, &data).unwrap();
            prop_assert!(sealed.len() >= data.len());
            prop_assert_eq!(open(&key, &sealed).unwrap(), data);
        }
    }
}
