//! OpenDAL Operator factory for hstash storage backends

use anyhow::{Context, Result};
use hstash_core::config::{StorageBackend, StorageConfig};
use opendal::Operator;
use std::time::Duration;

/// S3 access credentials, kept out of the config file
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// Read AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY, falling back to the
    /// HSTASH_-prefixed names.
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("HSTASH_ACCESS_KEY_ID"))
            .context("S3 credentials not set: export AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("HSTASH_SECRET_ACCESS_KEY"))
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }
}

/// Build an OpenDAL Operator for the configured backend.
///
/// Every backend gets the same layer stack: request logging, a per-call
/// timeout, and jittered retries for transient errors. S3 uses path-style
/// addressing (opendal's default), which MinIO and SeaweedFS require.
pub fn build_operator(cfg: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    let base = match cfg.backend {
        StorageBackend::S3 => {
            check_tls(cfg)?;
            let creds = creds.context("S3 backend requires credentials")?;
            let builder = opendal::services::S3::default()
                .endpoint(&cfg.endpoint)
                .region(&cfg.region)
                .bucket(&cfg.bucket)
                .access_key_id(&creds.access_key_id)
                .secret_access_key(&creds.secret_access_key);
            Operator::new(builder)
                .context("creating OpenDAL S3 operator")?
                .finish()
        }
        StorageBackend::Fs => {
            let root = cfg.root.to_string_lossy();
            let builder = opendal::services::Fs::default().root(&root);
            Operator::new(builder)
                .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
                .finish()
        }
        StorageBackend::Memory => Operator::new(opendal::services::Memory::default())
            .context("creating OpenDAL memory operator")?
            .finish(),
    };

    let op = base
        .layer(opendal::layers::LoggingLayer::default())
        .layer(opendal::layers::TimeoutLayer::new().with_timeout(Duration::from_secs(cfg.timeout_secs)))
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(cfg.max_retries)
                .with_jitter(),
        );

    tracing::debug!(backend = ?cfg.backend, bucket = %cfg.bucket, "storage operator ready");
    Ok(op)
}

/// Refuse or warn about plaintext HTTP S3 endpoints.
fn check_tls(cfg: &StorageConfig) -> Result<()> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                cfg.endpoint
            );
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "S3 endpoint uses plaintext HTTP; set storage.enforce_tls = true and use HTTPS in production"
        );
    }
    Ok(())
}
