//! Local JSON state for single-node use: key material and object records
//!
//! Serves as the vault's key and record store. Every mutation is written to
//! disk before it becomes visible in memory, so the file never lags behind
//! object-store changes the vault makes on the strength of a committed write.
//! Ciphertext never lives here, only in the configured object store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hstash_core::{EncryptedObjectRecord, HstashError, HstashResult, UserKeyMaterial};
use hstash_vault::{KeyMaterialStore, MemoryKeyStore, MemoryRecordStore, RecordStore};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    users: Vec<UserKeyMaterial>,
    #[serde(default)]
    records: Vec<EncryptedObjectRecord>,
}

pub struct LocalState {
    path: PathBuf,
    keys: MemoryKeyStore,
    records: MemoryRecordStore,
    /// Serializes read-modify-write cycles on the file
    writer: Mutex<()>,
}

impl LocalState {
    /// Read `path`, or start empty if it does not exist yet.
    pub async fn load(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let content = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading state: {}", path.display()))?;
            serde_json::from_slice(&content)
                .with_context(|| format!("parsing state: {}", path.display()))?
        } else {
            StateFile::default()
        };

        tracing::debug!(
            path = %path.display(),
            users = file.users.len(),
            records = file.records.len(),
            "state loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            keys: MemoryKeyStore::from_materials(file.users),
            records: MemoryRecordStore::from_records(file.records),
            writer: Mutex::new(()),
        })
    }

    async fn current(&self) -> StateFile {
        StateFile {
            users: self.keys.snapshot().await,
            records: self.records.snapshot().await,
        }
    }

    /// Persist `file` with `edit` applied. Callers hold `writer`.
    async fn persist(
        &self,
        mut file: StateFile,
        edit: impl FnOnce(&mut StateFile),
    ) -> HstashResult<()> {
        edit(&mut file);
        file.users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        file.records.sort_by(|a, b| a.object_name.cmp(&b.object_name));

        self.write_file(&file).await.map_err(|e| {
            tracing::error!(path = %self.path.display(), error = %e, "state write failed");
            HstashError::StorageUnavailable(format!("state file: {e:#}"))
        })
    }

    /// Write atomically (temp file + rename). The temp file is created
    /// owner-only, so the contents are never readable by others.
    async fn write_file(&self, file: &StateFile) -> Result<()> {
        let json = serde_json::to_vec_pretty(file).context("serializing state")?;

        let tmp = self.path.with_extension("json.tmp");
        // a leftover may carry other permissions; create_new below needs it gone
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("removing stale {}", tmp.display()))
            }
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut out = options
            .open(&tmp)
            .await
            .with_context(|| format!("creating {}", tmp.display()))?;
        out.write_all(&json)
            .await
            .with_context(|| format!("writing state: {}", tmp.display()))?;
        out.sync_all()
            .await
            .with_context(|| format!("syncing state: {}", tmp.display()))?;
        drop(out);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing state: {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl KeyMaterialStore for LocalState {
    async fn load(&self, user_id: &str) -> HstashResult<Option<UserKeyMaterial>> {
        self.keys.load(user_id).await
    }

    async fn store(&self, material: UserKeyMaterial) -> HstashResult<()> {
        let _writer = self.writer.lock().await;
        let next = material.clone();
        self.persist(self.current().await, |file| {
            file.users.retain(|u| u.user_id != next.user_id);
            file.users.push(next);
        })
        .await?;
        self.keys.store(material).await
    }

    async fn create(&self, material: UserKeyMaterial) -> HstashResult<()> {
        let _writer = self.writer.lock().await;
        if self.keys.load(&material.user_id).await?.is_some() {
            return Err(HstashError::AlreadyEnrolled(material.user_id));
        }
        let next = material.clone();
        self.persist(self.current().await, |file| file.users.push(next))
            .await?;
        self.keys.create(material).await
    }
}

#[async_trait]
impl RecordStore for LocalState {
    async fn get(&self, object_name: &str) -> HstashResult<Option<EncryptedObjectRecord>> {
        self.records.get(object_name).await
    }

    async fn put(&self, record: EncryptedObjectRecord) -> HstashResult<()> {
        let _writer = self.writer.lock().await;
        let next = record.clone();
        self.persist(self.current().await, |file| {
            file.records.retain(|r| r.object_name != next.object_name);
            file.records.push(next);
        })
        .await?;
        self.records.put(record).await
    }

    async fn remove(&self, object_name: &str) -> HstashResult<Option<EncryptedObjectRecord>> {
        let _writer = self.writer.lock().await;
        if self.records.get(object_name).await?.is_none() {
            return Ok(None);
        }
        self.persist(self.current().await, |file| {
            file.records.retain(|r| r.object_name != object_name)
        })
        .await?;
        self.records.remove(object_name).await
    }

    async fn list_by_owner(&self, user_id: &str) -> HstashResult<Vec<EncryptedObjectRecord>> {
        self.records.list_by_owner(user_id).await
    }

    async fn replace_all(
        &self,
        user_id: &str,
        records: Vec<EncryptedObjectRecord>,
    ) -> HstashResult<()> {
        let _writer = self.writer.lock().await;
        let next = records.clone();
        self.persist(self.current().await, |file| {
            file.records.retain(|r| r.owner_user_id != user_id);
            file.records.extend(next);
        })
        .await?;
        self.records.replace_all(user_id, records).await
    }
}
