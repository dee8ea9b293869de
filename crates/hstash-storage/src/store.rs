//! Object-store interface consumed by the vault

use async_trait::async_trait;
use hstash_core::{HstashError, HstashResult};
use opendal::{ErrorKind, Operator};

/// A dumb byte store keyed by object name.
///
/// Implementations must report a missing object as [`HstashError::NotFound`]
/// and every other failure as [`HstashError::StorageUnavailable`], so callers
/// can tell retryable I/O apart from cryptographic failures.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> HstashResult<()>;

    async fn get(&self, name: &str) -> HstashResult<Vec<u8>>;

    async fn delete(&self, name: &str) -> HstashResult<()>;

    /// Names of all objects under `prefix`
    async fn list(&self, prefix: &str) -> HstashResult<Vec<String>>;
}

/// [`ObjectStore`] backed by an OpenDAL operator
#[derive(Clone, Debug)]
pub struct OpendalStore {
    op: Operator,
}

impl OpendalStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    /// In-process store for tests and demos
    pub fn memory() -> HstashResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| map_err("memory operator", e))?
            .finish();
        Ok(Self::new(op))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }
}

fn map_err(name: &str, e: opendal::Error) -> HstashError {
    match e.kind() {
        ErrorKind::NotFound => HstashError::NotFound(name.to_string()),
        _ => HstashError::StorageUnavailable(format!("{name}: {e}")),
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> HstashResult<()> {
        let len = bytes.len();
        self.op
            .write(name, bytes)
            .await
            .map_err(|e| map_err(name, e))?;
        tracing::debug!(object = %name, bytes = len, "object stored");
        Ok(())
    }

    async fn get(&self, name: &str) -> HstashResult<Vec<u8>> {
        let buf = self.op.read(name).await.map_err(|e| map_err(name, e))?;
        Ok(buf.to_vec())
    }

    async fn delete(&self, name: &str) -> HstashResult<()> {
        self.op.delete(name).await.map_err(|e| map_err(name, e))?;
        tracing::debug!(object = %name, "object deleted");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> HstashResult<Vec<String>> {
        let entries = self
            .op
            .list_with(prefix)
            .recursive(true)
            .await
            .map_err(|e| map_err(prefix, e))?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.path().to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = OpendalStore::memory().unwrap();

        store.put("u1/a.bin", b"ciphertext".to_vec()).await.unwrap();
        assert_eq!(store.get("u1/a.bin").await.unwrap(), b"ciphertext");

        store.delete("u1/a.bin").await.unwrap();
        assert!(matches!(
            store.get("u1/a.bin").await,
            Err(HstashError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = OpendalStore::memory().unwrap();
        let err = store.get("nobody/nothing").await.unwrap_err();
        assert!(matches!(err, HstashError::NotFound(ref n) if n == "nobody/nothing"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = OpendalStore::memory().unwrap();
        store.put("u1/a.pdf", vec![1]).await.unwrap();
        store.put("u1/b.pdf", vec![2]).await.unwrap();
        store.put("u2/c.pdf", vec![3]).await.unwrap();

        let mut names = store.list("u1/").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["u1/a.pdf", "u1/b.pdf"]);
    }

    #[tokio::test]
    async fn test_fs_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let op = Operator::new(
            opendal::services::Fs::default().root(&dir.path().to_string_lossy()),
        )
        .unwrap()
        .finish();
        let store = OpendalStore::new(op);

        store.put("u9/x.dcm", vec![0xAB; 64]).await.unwrap();
        assert_eq!(store.get("u9/x.dcm").await.unwrap().len(), 64);
        assert!(dir.path().join("u9/x.dcm").exists());
    }
}
