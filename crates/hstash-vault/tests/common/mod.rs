//! Shared fixtures for vault integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hstash_core::config::PasswordPolicy;
use hstash_core::{HstashError, HstashResult, KeyMode, UserKeyMaterial};
use hstash_crypto::KdfParams;
use hstash_storage::{ObjectStore, OpendalStore};
use hstash_vault::{KeyMaterialStore, MemoryKeyStore, MemoryRecordStore, Vault, VaultSettings};
use secrecy::SecretString;

pub const OLD_PASSWORD: &str = "Abc12345!";
pub const NEW_PASSWORD: &str = "Xyz98765!";

pub fn pw(s: &str) -> SecretString {
    SecretString::from(s)
}

pub fn settings(key_mode: KeyMode) -> VaultSettings {
    VaultSettings {
        kdf: KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        },
        server_secret: SecretString::from("integration-server-secret-0123456789abcdef"),
        key_mode,
        password_policy: PasswordPolicy {
            min_length: 8,
            ..Default::default()
        },
        verify_on_download: true,
    }
}

/// Object store whose writes start failing once a budget is used up
pub struct FlakyStore {
    inner: OpendalStore,
    armed: AtomicBool,
    puts_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: OpendalStore::memory().unwrap(),
            armed: AtomicBool::new(false),
            puts_left: AtomicUsize::new(0),
        }
    }

    /// Allow `n` more writes, then fail every write after that.
    pub fn fail_after(&self, n: usize) {
        self.puts_left.store(n, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> HstashResult<()> {
        if self.armed.load(Ordering::SeqCst) {
            let left = self.puts_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(HstashError::StorageUnavailable(format!("{name}: injected")));
            }
            self.puts_left.store(left - 1, Ordering::SeqCst);
        }
        self.inner.put(name, bytes).await
    }

    async fn get(&self, name: &str) -> HstashResult<Vec<u8>> {
        self.inner.get(name).await
    }

    async fn delete(&self, name: &str) -> HstashResult<()> {
        self.inner.delete(name).await
    }

    async fn list(&self, prefix: &str) -> HstashResult<Vec<String>> {
        self.inner.list(prefix).await
    }
}

/// Key store whose writes can be switched off
#[derive(Default)]
pub struct FailingKeyStore {
    inner: MemoryKeyStore,
    fail_writes: AtomicBool,
}

impl FailingKeyStore {
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyMaterialStore for FailingKeyStore {
    async fn load(&self, user_id: &str) -> HstashResult<Option<UserKeyMaterial>> {
        self.inner.load(user_id).await
    }

    async fn store(&self, material: UserKeyMaterial) -> HstashResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HstashError::StorageUnavailable("user table: injected".into()));
        }
        self.inner.store(material).await
    }

    async fn create(&self, material: UserKeyMaterial) -> HstashResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HstashError::StorageUnavailable("user table: injected".into()));
        }
        self.inner.create(material).await
    }
}

pub struct Harness {
    pub vault: Arc<Vault>,
    pub objects: Arc<FlakyStore>,
    pub keys: Arc<FailingKeyStore>,
}

pub fn harness(key_mode: KeyMode) -> Harness {
    let objects = Arc::new(FlakyStore::new());
    let keys = Arc::new(FailingKeyStore::default());
    let vault = Vault::new(
        objects.clone(),
        keys.clone(),
        Arc::new(MemoryRecordStore::new()),
        settings(key_mode),
    );
    Harness {
        vault: Arc::new(vault),
        objects,
        keys,
    }
}

/// Sample health documents: (filename, contents)
pub fn documents() -> Vec<(String, Vec<u8>)> {
    (0..5)
        .map(|i| {
            (
                format!("lab-result-{i}.pdf"),
                format!("patient record #{i}: {}", "x".repeat(i * 100)).into_bytes(),
            )
        })
        .collect()
}
