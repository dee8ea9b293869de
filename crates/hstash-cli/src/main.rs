//! hstash: HealthStash vault CLI
//!
//! Admin commands:
//!   check-config          - validate configuration and the server secret
//!   health                - check the configured object store
//!   checksum <file>       - SHA-256 of a local file
//!
//! Vault commands (key material and records kept in a local state file):
//!   enroll    --user <id>                      - create a user's key material
//!   upload    --user <id> <file>               - encrypt and store a file
//!   download  --user <id> <object> [<out>]     - fetch and decrypt
//!   list      --user <id>                      - list a user's objects
//!   delete    --user <id> <object>             - remove an object
//!   passwd    --user <id>                      - change password, rotate keys
//!   status    --user <id>                      - rotation state

mod state;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hstash_core::config::{HstashConfig, StorageBackend};
use hstash_core::RotationState;
use hstash_storage::{build_operator, check_health, OpendalStore, S3Credentials};
use hstash_vault::{Vault, VaultSettings};

use crate::state::LocalState;

/// Read instead of prompting when set (scripts, CI)
const PASSWORD_ENV: &str = "HSTASH_PASSWORD";
const NEW_PASSWORD_ENV: &str = "HSTASH_NEW_PASSWORD";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "hstash",
    version,
    about = "HealthStash encrypted vault client",
    long_about = "hstash: per-user encryption at rest for health records, on S3-compatible or local storage"
)]
struct Cli {
    /// Path to hstash.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "HSTASH_CONFIG",
        default_value = "/etc/hstash/config.toml"
    )]
    config: PathBuf,

    /// Local state file holding key material and object records
    #[arg(long, env = "HSTASH_STATE", default_value = "hstash-state.json")]
    state: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "HSTASH_LOG")]
    log: Option<String>,

    /// Log format; overrides daemon.log_format
    #[arg(long, env = "HSTASH_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and server secret
    #[command(name = "check-config")]
    CheckConfig,

    /// Check that the configured object store is reachable
    ///
    /// S3 credentials are read from AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY.
    Health,

    /// Print the SHA-256 checksum of a local file
    Checksum { file: PathBuf },

    /// Create key material for a new user
    Enroll {
        #[arg(long, short = 'u')]
        user: String,
    },

    /// Encrypt a local file and store it
    Upload {
        #[arg(long, short = 'u')]
        user: String,
        file: PathBuf,
    },

    /// Fetch and decrypt a stored object
    Download {
        #[arg(long, short = 'u')]
        user: String,
        /// Object name as printed by `upload` or `list`
        object: String,
        /// Destination (default: object basename in the current directory)
        out: Option<PathBuf>,
    },

    /// List a user's stored objects
    List {
        #[arg(long, short = 'u')]
        user: String,
    },

    /// Delete a stored object
    Delete {
        #[arg(long, short = 'u')]
        user: String,
        object: String,
    },

    /// Change a user's password and rotate their keys
    Passwd {
        #[arg(long, short = 'u')]
        user: String,
    },

    /// Show a user's key generation and rotation state
    Status {
        #[arg(long, short = 'u')]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, found) = load_config(&cli.config).await?;

    let level = cli
        .log
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.daemon.log_format));
    init_logging(&level, format);

    if !found {
        tracing::warn!("config file not found: {}  (using defaults)", cli.config.display());
    } else if config.config_file_mode_check {
        check_config_permissions(&cli.config);
    }

    match cli.command {
        Commands::CheckConfig => cmd_check_config(&config),
        Commands::Health => cmd_health(&config).await,
        Commands::Checksum { file } => cmd_checksum(&file).await,
        Commands::Enroll { user } => cmd_enroll(&config, &cli.state, &user).await,
        Commands::Upload { user, file } => cmd_upload(&config, &cli.state, &user, &file).await,
        Commands::Download { user, object, out } => {
            cmd_download(&config, &cli.state, &user, &object, out).await
        }
        Commands::List { user } => cmd_list(&config, &cli.state, &user).await,
        Commands::Delete { user, object } => {
            cmd_delete(&config, &cli.state, &user, &object).await
        }
        Commands::Passwd { user } => cmd_passwd(&config, &cli.state, &user).await,
        Commands::Status { user } => cmd_status(&config, &cli.state, &user).await,
    }
}

// ── Config loading and logging ────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<(HstashConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = HstashConfig::parse(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((HstashConfig::default(), false))
    }
}

fn check_config_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = path.metadata() {
            if metadata.permissions().mode() & 0o077 != 0 {
                tracing::warn!(
                    "SECURITY: config file {} is readable by other users (should be 600)",
                    path.display()
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Passwords ─────────────────────────────────────────────────────────────────

fn read_password(env: &str, prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env) {
        return Ok(SecretString::from(value));
    }
    let value = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(value))
}

fn read_new_password() -> Result<SecretString> {
    if let Ok(value) = std::env::var(NEW_PASSWORD_ENV) {
        return Ok(SecretString::from(value));
    }
    let first = rpassword::prompt_password("New password: ").context("reading password")?;
    let confirm = rpassword::prompt_password("Confirm new password: ").context("reading password")?;
    if first != confirm {
        anyhow::bail!("passwords do not match");
    }
    Ok(SecretString::from(first))
}

// ── Vault wiring ──────────────────────────────────────────────────────────────

fn build_storage(config: &HstashConfig) -> Result<opendal::Operator> {
    let creds = match config.storage.backend {
        StorageBackend::S3 => Some(S3Credentials::from_env()?),
        StorageBackend::Fs | StorageBackend::Memory => None,
    };
    build_operator(&config.storage, creds.as_ref()).context("building storage operator")
}

/// Every key-material and record write goes straight to the state file.
async fn open_vault(config: &HstashConfig, state_path: &Path) -> Result<Vault> {
    let settings = VaultSettings::from_config(config).context("loading vault settings")?;
    let op = build_storage(config)?;
    let state = Arc::new(LocalState::load(state_path).await?);

    Ok(Vault::new(
        Arc::new(OpendalStore::new(op)),
        state.clone(),
        state,
        settings,
    ))
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_check_config(config: &HstashConfig) -> Result<()> {
    let settings = VaultSettings::from_config(config)?;

    println!("storage:    {:?} ({})", config.storage.backend, storage_target(config));
    println!(
        "kdf:        argon2id m={} KiB t={} p={}",
        settings.kdf.mem_cost_kib, settings.kdf.time_cost, settings.kdf.parallelism
    );
    println!("key mode:   {:?}", settings.key_mode);
    println!(
        "passwords:  min {} chars, verify on download: {}",
        settings.password_policy.min_length, settings.verify_on_download
    );
    println!("tokens:     ttl {}s", config.tokens.ttl_secs);
    println!("server secret: ok");
    Ok(())
}

fn storage_target(config: &HstashConfig) -> String {
    match config.storage.backend {
        StorageBackend::S3 => format!("{}/{}", config.storage.endpoint, config.storage.bucket),
        StorageBackend::Fs => config.storage.root.display().to_string(),
        StorageBackend::Memory => "in-memory".to_string(),
    }
}

async fn cmd_health(config: &HstashConfig) -> Result<()> {
    let op = build_storage(config)?;
    check_health(&op).await?;
    println!("storage ok: {}", storage_target(config));
    Ok(())
}

async fn cmd_checksum(file: &Path) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    println!("{}  {}", hstash_crypto::checksum(&content), file.display());
    Ok(())
}

async fn cmd_enroll(config: &HstashConfig, state_path: &Path, user: &str) -> Result<()> {
    let vault = open_vault(config, state_path).await?;
    let password = read_new_password()?;

    vault.enroll(user, &password).await?;
    println!("enrolled {user}");
    Ok(())
}

async fn cmd_upload(config: &HstashConfig, state_path: &Path, user: &str, file: &Path) -> Result<()> {
    let vault = open_vault(config, state_path).await?;
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let password = read_password(PASSWORD_ENV, "Password: ")?;

    let record = vault.upload(user, &password, &filename, &content).await?;
    println!("{}", record.object_name);
    Ok(())
}

async fn cmd_download(
    config: &HstashConfig,
    state_path: &Path,
    user: &str,
    object: &str,
    out: Option<PathBuf>,
) -> Result<()> {
    let vault = open_vault(config, state_path).await?;
    let password = read_password(PASSWORD_ENV, "Password: ")?;

    let plaintext = vault
        .download(user, &password, object)
        .await
        .map_err(|e| {
            tracing::debug!(object = %object, error = %e, "download failed");
            anyhow::anyhow!(e.user_message())
        })?;

    let out = out.unwrap_or_else(|| {
        PathBuf::from(object.rsplit('/').next().unwrap_or(object))
    });
    tokio::fs::write(&out, &plaintext)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    println!("{} bytes -> {}", plaintext.len(), out.display());
    Ok(())
}

async fn cmd_list(config: &HstashConfig, state_path: &Path, user: &str) -> Result<()> {
    let vault = open_vault(config, state_path).await?;
    let records = vault.list(user).await?;

    if records.is_empty() {
        println!("no objects for {user}");
        return Ok(());
    }
    println!("{:<40} {:>10} {:>9} {:>4}", "OBJECT", "BYTES", "MODE", "GEN");
    for record in records {
        println!(
            "{:<40} {:>10} {:>9} {:>4}",
            record.object_name,
            record.plaintext_len,
            format!("{:?}", record.key_mode()).to_lowercase(),
            record.key_generation
        );
    }
    Ok(())
}

async fn cmd_delete(config: &HstashConfig, state_path: &Path, user: &str, object: &str) -> Result<()> {
    let vault = open_vault(config, state_path).await?;
    vault.delete(user, object).await?;
    println!("deleted {object}");
    Ok(())
}

async fn cmd_passwd(config: &HstashConfig, state_path: &Path, user: &str) -> Result<()> {
    let vault = open_vault(config, state_path).await?;
    let current = read_password(PASSWORD_ENV, "Current password: ")?;
    let new = read_new_password()?;

    let report = vault.change_password(user, &current, &new).await?;
    println!(
        "password changed: generation {}, {} re-wrapped, {} re-encrypted",
        report.generation, report.rewrapped, report.reencrypted
    );
    Ok(())
}

async fn cmd_status(config: &HstashConfig, state_path: &Path, user: &str) -> Result<()> {
    let vault = open_vault(config, state_path).await?;
    match vault.rotation_state(user).await? {
        RotationState::Stable { generation } => println!("{user}: stable at generation {generation}"),
        RotationState::Rotating { from_generation } => {
            println!("{user}: rotating from generation {from_generation}")
        }
    }
    let count = vault.list(user).await?.len();
    println!("{count} object(s)");
    Ok(())
}
