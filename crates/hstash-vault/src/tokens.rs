//! Short-lived upload tokens for hand-off from a second device
//!
//! A logged-in session issues a token; a phone scanning it can upload into the
//! issuing user's vault until the token expires or is redeemed once.

use std::time::Duration;

use hstash_core::config::TokenConfig;
use moka::sync::Cache;
use rand::Rng;

use crate::now_epoch;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of an issued token code
pub const TOKEN_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken {
    pub code: String,
    pub user_id: String,
    /// Unix epoch seconds
    pub issued_at: u64,
}

pub trait UploadTokenStore: Send + Sync {
    /// Issue a fresh token for `user_id`.
    fn issue(&self, user_id: &str) -> UploadToken;

    /// The user a live token belongs to, without consuming it.
    fn peek(&self, code: &str) -> Option<String>;

    /// Consume a live token. Succeeds at most once per token.
    fn redeem(&self, code: &str) -> Option<String>;
}

/// In-process [`UploadTokenStore`] with TTL expiry
pub struct MokaTokenStore {
    cache: Cache<String, UploadToken>,
}

impl MokaTokenStore {
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub fn from_config(cfg: &TokenConfig) -> Self {
        Self::new(Duration::from_secs(cfg.ttl_secs), cfg.max_capacity)
    }
}

fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

impl UploadTokenStore for MokaTokenStore {
    fn issue(&self, user_id: &str) -> UploadToken {
        let mut code = random_code();
        while self.cache.contains_key(&code) {
            code = random_code();
        }

        let token = UploadToken {
            code: code.clone(),
            user_id: user_id.to_string(),
            issued_at: now_epoch(),
        };
        self.cache.insert(code, token.clone());
        tracing::debug!(user_id = %user_id, "upload token issued");
        token
    }

    fn peek(&self, code: &str) -> Option<String> {
        self.cache
            .get(&code.to_ascii_uppercase())
            .map(|t| t.user_id)
    }

    fn redeem(&self, code: &str) -> Option<String> {
        let key = code.to_ascii_uppercase();
        // get() honours the TTL even before the entry is evicted
        self.cache.get(&key)?;
        let token = self.cache.remove(&key)?;
        tracing::debug!(user_id = %token.user_id, "upload token redeemed");
        Some(token.user_id)
    }
}
