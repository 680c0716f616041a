//! Adapter from the `object_store` crate to the pipeline's [`ObjectStore`].
//!
//! Any backend `object_store` supports can sit behind this; the worker binary
//! uses the local filesystem.

use std::path::Path as FsPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ObjectStore as RemoteStore, PutPayload};
use tracing::instrument;

use assetflow_core::ObjectKey;

use super::{ObjectStore, StorageError};

#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    inner: Arc<dyn RemoteStore>,
}

impl ObjectStoreBackend {
    pub fn new(inner: Arc<dyn RemoteStore>) -> Self {
        Self { inner }
    }

    /// Filesystem-backed store rooted at `root` (created if missing).
    pub fn local(root: impl AsRef<FsPath>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)
            .map_err(|e| StorageError::Unavailable(format!("create {}: {e}", root.display())))?;
        let fs = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self::new(Arc::new(fs)))
    }

    fn path(key: &ObjectKey) -> Result<Path, StorageError> {
        Path::parse(key.as_str()).map_err(|e| StorageError::InvalidKey {
            key: key.clone(),
            reason: e.to_string(),
        })
    }
}

fn map_error(key: &ObjectKey, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.clone()),
        other => {
            tracing::error!(object_key = %key, error = %other, "object store request failed");
            StorageError::Unavailable(other.to_string())
        }
    }
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    #[instrument(skip(self, bytes), fields(object_key = %key, size = bytes.len()), err)]
    async fn put(&self, key: &ObjectKey, bytes: Bytes) -> Result<(), StorageError> {
        let path = Self::path(key)?;
        self.inner
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| map_error(key, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(object_key = %key), err)]
    async fn get(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
        let path = Self::path(key)?;
        self.inner
            .get(&path)
            .await
            .map_err(|e| map_error(key, e))?
            .bytes()
            .await
            .map_err(|e| map_error(key, e))
    }

    #[instrument(skip(self), fields(object_key = %key), err)]
    async fn delete(&self, key: &ObjectKey) -> Result<(), StorageError> {
        let path = Self::path(key)?;
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_error(key, e)),
        }
    }

    #[instrument(skip(self), fields(object_key = %key), err)]
    async fn exists(&self, key: &ObjectKey) -> Result<bool, StorageError> {
        let path = Self::path(key)?;
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_error(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_filesystem_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStoreBackend::local(dir.path()).unwrap();
        let key = ObjectKey::parse("out/a1.png").unwrap();

        assert!(!store.exists(&key).await.unwrap());
        store.put(&key, Bytes::from_static(b"thumb")).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"thumb"));
        assert!(dir.path().join("out").join("a1.png").exists());

        store.delete(&key).await.unwrap();
        assert!(matches!(store.get(&key).await, Err(StorageError::NotFound(_))));
        // Idempotent.
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn keys_with_parent_segments_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStoreBackend::local(dir.path()).unwrap();
        let key = ObjectKey::parse("in/../escape").unwrap();

        assert!(matches!(
            store.put(&key, Bytes::new()).await,
            Err(StorageError::InvalidKey { .. })
        ));
    }
}
