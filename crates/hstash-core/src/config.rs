use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{HstashError, HstashResult};
use crate::types::KeyMode;

/// Environment variable that overrides `crypto.server_secret`.
pub const SERVER_SECRET_ENV: &str = "HSTASH_SERVER_SECRET";

/// Minimum length of the server-wide secret mixed into every key derivation.
pub const MIN_SERVER_SECRET_LEN: usize = 32;

/// Values shipped in sample configs. Starting with one of these is refused.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "your-secret-key-change-this",
    "your-encryption-key-change-this",
    "changeme",
    "change-me",
];

/// Characters accepted as "special" by the password policy.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Top-level configuration (loaded from hstash.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HstashConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub crypto: CryptoConfig,
    pub password: PasswordPolicy,
    pub tokens: TokenConfig,
    /// Warn if the config file is world-readable (default: true)
    #[serde(default = "default_true")]
    pub config_file_mode_check: bool,
}

fn default_true() -> bool {
    true
}

impl Default for HstashConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonConfig::default(),
            storage: StorageConfig::default(),
            crypto: CryptoConfig::default(),
            password: PasswordPolicy::default(),
            tokens: TokenConfig::default(),
            config_file_mode_check: true,
        }
    }
}

impl HstashConfig {
    /// Parse a TOML document; missing sections take their defaults.
    pub fn parse(toml_str: &str) -> HstashResult<Self> {
        toml::from_str(toml_str).map_err(|e| HstashError::Configuration(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Which OpenDAL service backs the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// S3-compatible endpoint (MinIO, SeaweedFS, AWS)
    S3,
    /// Local directory, for single-node installs
    Fs,
    /// Process memory, for tests and demos
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding encrypted objects
    pub bucket: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// Enforce HTTPS for S3 connections (error on HTTP endpoints)
    pub enforce_tls: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for transient storage failures, applied at the adapter
    pub max_retries: usize,
}

/// Encryption-at-rest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
    /// Server-wide secret bound into every user key.
    /// Prefer the HSTASH_SERVER_SECRET environment variable.
    pub server_secret: Option<String>,
    /// How new uploads are keyed
    pub key_mode: KeyMode,
    /// Re-hash plaintext on download and compare with the stored checksum
    pub verify_on_download: bool,
}

/// Password strength rules applied at enrollment and password change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

/// Mobile upload token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Token lifetime in seconds (default: 15 minutes)
    pub ttl_secs: u64,
    /// Upper bound on live tokens held in memory
    pub max_capacity: u64,
}

impl CryptoConfig {
    /// Resolve the server secret, preferring the environment over the file.
    ///
    /// Fails with [`HstashError::Configuration`] when the secret is absent,
    /// shorter than [`MIN_SERVER_SECRET_LEN`], or a sample placeholder.
    pub fn server_secret(&self) -> HstashResult<SecretString> {
        let from_env = std::env::var(SERVER_SECRET_ENV).ok();
        let value = from_env
            .or_else(|| self.server_secret.clone())
            .ok_or_else(|| {
                HstashError::Configuration(format!(
                    "no server secret: set {SERVER_SECRET_ENV} or crypto.server_secret"
                ))
            })?;
        validate_server_secret(&value)?;
        Ok(SecretString::from(value))
    }
}

/// Check a server secret for length and known placeholder values.
pub fn validate_server_secret(secret: &str) -> HstashResult<()> {
    if PLACEHOLDER_SECRETS
        .iter()
        .any(|p| secret.eq_ignore_ascii_case(p))
    {
        return Err(HstashError::Configuration(
            "server secret is still set to a sample value".into(),
        ));
    }
    if secret.chars().count() < MIN_SERVER_SECRET_LEN {
        return Err(HstashError::Configuration(format!(
            "server secret must be at least {MIN_SERVER_SECRET_LEN} characters"
        )));
    }
    Ok(())
}

impl PasswordPolicy {
    /// Check a candidate password, returning the first rule it breaks.
    pub fn check(&self, password: &str) -> HstashResult<()> {
        let reject = |msg: String| Err(HstashError::PasswordPolicy(msg));

        if password.chars().count() < self.min_length {
            return reject(format!(
                "password must be at least {} characters long",
                self.min_length
            ));
        }
        if self.require_uppercase && !password.chars().any(char::is_uppercase) {
            return reject("password must contain at least one uppercase letter".into());
        }
        if self.require_lowercase && !password.chars().any(char::is_lowercase) {
            return reject("password must contain at least one lowercase letter".into());
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            return reject("password must contain at least one number".into());
        }
        if self.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            return reject("password must contain at least one special character".into());
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "healthstash-files".into(),
            root: PathBuf::from("/var/lib/hstash/objects"),
            enforce_tls: false,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
            server_secret: None,
            key_mode: KeyMode::Envelope,
            verify_on_download: true,
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            max_capacity: 10_000,
        }
    }
}
