use hstash_core::HstashError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("salt too short: {len} bytes (minimum {min})")]
    WeakSalt { len: usize, min: usize },

    #[error("invalid KDF parameters: {0}")]
    InvalidParams(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    /// Wrong key, truncated blob, or tampered bytes. Intentionally opaque.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("encryption failed")]
    Encryption,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("malformed input: {0}")]
    Malformed(String),
}

impl From<CryptoError> for HstashError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailure => HstashError::AuthenticationFailure,
            CryptoError::WeakSalt { .. } | CryptoError::Malformed(_) => {
                HstashError::InvalidInput(err.to_string())
            }
            CryptoError::InvalidParams(_) => HstashError::Configuration(err.to_string()),
            other => HstashError::Other(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_maps_to_generic_error() {
        let err: HstashError = CryptoError::AuthenticationFailure.into();
        assert!(matches!(err, HstashError::AuthenticationFailure));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_weak_salt_maps_to_invalid_input() {
        let err: HstashError = CryptoError::WeakSalt { len: 8, min: 16 }.into();
        assert!(matches!(err, HstashError::InvalidInput(_)));
    }
}
