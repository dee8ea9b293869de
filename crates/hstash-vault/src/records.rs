//! Persistence for encrypted-object records

use std::collections::HashMap;

use async_trait::async_trait;
use hstash_core::{EncryptedObjectRecord, HstashResult};
use tokio::sync::RwLock;

/// Object metadata, usually the health-record table.
///
/// Writes must be durable when they return `Ok`: after a rotation commits,
/// the objects its old records named are deleted.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, object_name: &str) -> HstashResult<Option<EncryptedObjectRecord>>;

    async fn put(&self, record: EncryptedObjectRecord) -> HstashResult<()>;

    async fn remove(&self, object_name: &str) -> HstashResult<Option<EncryptedObjectRecord>>;

    async fn list_by_owner(&self, user_id: &str) -> HstashResult<Vec<EncryptedObjectRecord>>;

    /// Atomically replace every record owned by `user_id` with `records`.
    ///
    /// Used to commit (and roll back) a rotation in one step.
    async fn replace_all(
        &self,
        user_id: &str,
        records: Vec<EncryptedObjectRecord>,
    ) -> HstashResult<()>;
}

/// In-memory [`RecordStore`] for tests and single-node use
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: RwLock<HashMap<String, EncryptedObjectRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store, e.g. from a snapshot file
    pub fn from_records(records: Vec<EncryptedObjectRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.object_name.clone(), r))
            .collect();
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Every record, ordered by object name
    pub async fn snapshot(&self) -> Vec<EncryptedObjectRecord> {
        let mut records: Vec<_> = self.inner.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.object_name.cmp(&b.object_name));
        records
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, object_name: &str) -> HstashResult<Option<EncryptedObjectRecord>> {
        Ok(self.inner.read().await.get(object_name).cloned())
    }

    async fn put(&self, record: EncryptedObjectRecord) -> HstashResult<()> {
        self.inner
            .write()
            .await
            .insert(record.object_name.clone(), record);
        Ok(())
    }

    async fn remove(&self, object_name: &str) -> HstashResult<Option<EncryptedObjectRecord>> {
        Ok(self.inner.write().await.remove(object_name))
    }

    async fn list_by_owner(&self, user_id: &str) -> HstashResult<Vec<EncryptedObjectRecord>> {
        let mut owned: Vec<EncryptedObjectRecord> = self
            .inner
            .read()
            .await
            .values()
            .filter(|r| r.owner_user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|r| r.created_at);
        Ok(owned)
    }

    async fn replace_all(
        &self,
        user_id: &str,
        records: Vec<EncryptedObjectRecord>,
    ) -> HstashResult<()> {
        let mut guard = self.inner.write().await;
        guard.retain(|_, r| r.owner_user_id != user_id);
        for record in records {
            guard.insert(record.object_name.clone(), record);
        }
        Ok(())
    }
}
