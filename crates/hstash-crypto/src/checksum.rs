//! SHA-256 content checksums over plaintext
//!
//! Computed before encryption so the value survives key rotation unchanged
//! and can be used for deduplication and post-decrypt verification.

use sha2::{Digest, Sha256};

/// Length of a checksum string (64 lowercase hex chars)
pub const CHECKSUM_HEX_LEN: usize = 64;

/// SHA-256 of `content`, lowercase hex.
pub fn checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Whether `content` hashes to `expected` (hex, case-insensitive).
pub fn verify_checksum(content: &[u8], expected: &str) -> bool {
    expected.len() == CHECKSUM_HEX_LEN && checksum(content).eq_ignore_ascii_case(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_vector() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_checksum() {
        let sum = checksum(b"blood panel");
        assert!(verify_checksum(b"blood panel", &sum));
        assert!(verify_checksum(b"blood panel", &sum.to_uppercase()));
        assert!(!verify_checksum(b"blood panel.", &sum));
        assert!(!verify_checksum(b"blood panel", &sum[..63]));
    }

    #[test]
    fn test_no_collisions_in_corpus() {
        let mut seen = HashSet::new();
        for i in 0u32..2000 {
            let content = format!("record-{i}");
            assert!(seen.insert(checksum(content.as_bytes())), "collision at {i}");
        }
    }

    proptest! {
        #[test]
        fn checksum_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let a = checksum(&data);
            prop_assert_eq!(a.len(), CHECKSUM_HEX_LEN);
            prop_assert_eq!(a, checksum(&data));
        }

        #[test]
        fn distinct_inputs_distinct_checksums(
            a in proptest::collection::vec(any::<u8>(), 0..=256),
            b in proptest::collection::vec(any::<u8>(), 0..=256),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(checksum(&a), checksum(&b));
        }
    }
}
