use thiserror::Error;

pub type HstashResult<T> = Result<T, HstashError>;

/// Message shown to end users for any failed download, whatever the cause.
pub const FILE_UNAVAILABLE: &str = "file unavailable";

#[derive(Debug, Error)]
pub enum HstashError {
    /// Missing or weak server configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Wrong password, wrong key, or tampered ciphertext. Deliberately carries
    /// no detail about which of those it was.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("key rotation already in progress for user {0}")]
    RotationConflict(String),

    #[error("record sealed under key generation {record}, current generation is {current}")]
    StaleGeneration { record: u64, current: u64 },

    #[error("password rejected: {0}")]
    PasswordPolicy(String),

    #[error("user already enrolled: {0}")]
    AlreadyEnrolled(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("checksum mismatch for object {0}")]
    Integrity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HstashError {
    /// Whether retrying the same call later can succeed.
    ///
    /// Cryptographic failures are never retryable: the same inputs fail the
    /// same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HstashError::StorageUnavailable(_)
                | HstashError::RotationConflict(_)
                | HstashError::StaleGeneration { .. }
        )
    }

    /// Text safe to surface to an end user.
    ///
    /// Everything on the read path collapses to [`FILE_UNAVAILABLE`] so the
    /// response does not reveal whether a key, the ciphertext, or the storage
    /// backend was at fault.
    pub fn user_message(&self) -> String {
        match self {
            HstashError::AuthenticationFailure
            | HstashError::StorageUnavailable(_)
            | HstashError::NotFound(_)
            | HstashError::StaleGeneration { .. }
            | HstashError::Integrity(_)
            | HstashError::Other(_) => FILE_UNAVAILABLE.to_string(),
            HstashError::RotationConflict(_) => {
                "a password change is already in progress, try again shortly".to_string()
            }
            HstashError::Configuration(_) => "service misconfigured".to_string(),
            other => other.to_string(),
        }
    }
}
