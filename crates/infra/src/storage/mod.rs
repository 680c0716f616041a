//! Object store boundary.
//!
//! Holds job inputs and processing artifacts, addressed by opaque
//! [`ObjectKey`]s. Writes are whole-object and last-writer-wins, which makes
//! re-running a deterministic processor for the same job harmless.

use async_trait::async_trait;
use bytes::Bytes;

use assetflow_core::ObjectKey;

pub mod backend;
pub mod in_memory;

pub use backend::ObjectStoreBackend;
pub use in_memory::InMemoryObjectStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(ObjectKey),
    #[error("invalid object key {key}: {reason}")]
    InvalidKey { key: ObjectKey, reason: String },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Failures worth retrying; a missing object or bad key will not fix itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &ObjectKey, bytes: Bytes) -> Result<(), StorageError>;

    async fn get(&self, key: &ObjectKey) -> Result<Bytes, StorageError>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StorageError>;

    async fn exists(&self, key: &ObjectKey) -> Result<bool, StorageError>;
}

#[async_trait]
impl<S> ObjectStore for std::sync::Arc<S>
where
    S: ObjectStore + ?Sized,
{
    async fn put(&self, key: &ObjectKey, bytes: Bytes) -> Result<(), StorageError> {
        (**self).put(key, bytes).await
    }

    async fn get(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StorageError> {
        (**self).delete(key).await
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool, StorageError> {
        (**self).exists(key).await
    }
}
