//! Persistence for per-user key material (verifier, salt, generation)

use std::collections::HashMap;

use async_trait::async_trait;
use hstash_core::{HstashError, HstashResult, UserKeyMaterial};
use tokio::sync::RwLock;

/// Where salts and password verifiers live, usually the user table.
///
/// `store` must replace the whole record atomically: a reader never sees a new
/// salt paired with an old generation or verifier. A write is durable once
/// it returns `Ok`; the vault deletes superseded objects on that basis.
#[async_trait]
pub trait KeyMaterialStore: Send + Sync {
    async fn load(&self, user_id: &str) -> HstashResult<Option<UserKeyMaterial>>;

    async fn store(&self, material: UserKeyMaterial) -> HstashResult<()>;

    /// Insert key material for a user that has none, atomically.
    ///
    /// Fails with [`HstashError::AlreadyEnrolled`] if the user already exists.
    async fn create(&self, material: UserKeyMaterial) -> HstashResult<()>;
}

/// In-memory [`KeyMaterialStore`] for tests and single-node use
#[derive(Default)]
pub struct MemoryKeyStore {
    inner: RwLock<HashMap<String, UserKeyMaterial>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_materials(materials: Vec<UserKeyMaterial>) -> Self {
        let map = materials
            .into_iter()
            .map(|m| (m.user_id.clone(), m))
            .collect();
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Every user's key material, ordered by user id
    pub async fn snapshot(&self) -> Vec<UserKeyMaterial> {
        let mut all: Vec<_> = self.inner.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }
}

#[async_trait]
impl KeyMaterialStore for MemoryKeyStore {
    async fn load(&self, user_id: &str) -> HstashResult<Option<UserKeyMaterial>> {
        Ok(self.inner.read().await.get(user_id).cloned())
    }

    async fn store(&self, material: UserKeyMaterial) -> HstashResult<()> {
        self.inner
            .write()
            .await
            .insert(material.user_id.clone(), material);
        Ok(())
    }

    async fn create(&self, material: UserKeyMaterial) -> HstashResult<()> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(&material.user_id) {
            return Err(HstashError::AlreadyEnrolled(material.user_id));
        }
        inner.insert(material.user_id.clone(), material);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(generation: u64) -> UserKeyMaterial {
        UserKeyMaterial {
            user_id: "u1".into(),
            password_verifier: "$argon2id$v=19$...".into(),
            salt: vec![generation as u8; 16],
            generation,
        }
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let store = MemoryKeyStore::new();
        assert!(store.load("u1").await.unwrap().is_none());

        store.store(material(0)).await.unwrap();
        assert_eq!(store.load("u1").await.unwrap(), Some(material(0)));
    }

    #[tokio::test]
    async fn test_store_replaces() {
        let store = MemoryKeyStore::new();
        store.store(material(0)).await.unwrap();
        store.store(material(1)).await.unwrap();

        let loaded = store.load("u1").await.unwrap().unwrap();
        assert_eq!(loaded.generation, 1);
        assert_eq!(loaded.salt, vec![1u8; 16]);
    }

    #[tokio::test]
    async fn test_create_does_not_overwrite() {
        let store = MemoryKeyStore::new();
        store.create(material(0)).await.unwrap();

        let second = store.create(material(5)).await;
        assert!(matches!(second, Err(HstashError::AlreadyEnrolled(u)) if u == "u1"));
        assert_eq!(store.load("u1").await.unwrap(), Some(material(0)));
    }

    #[tokio::test]
    async fn test_snapshot_reseeds() {
        let store = MemoryKeyStore::new();
        store.store(material(3)).await.unwrap();

        let restored = MemoryKeyStore::from_materials(store.snapshot().await);
        assert_eq!(restored.load("u1").await.unwrap(), Some(material(3)));
    }
}
