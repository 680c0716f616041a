//! Producer: stages input objects and enqueues jobs that reference them.
//!
//! Only enqueue-time failures surface here; the producer never waits on
//! processing.

use std::sync::Arc;

use bytes::Bytes;
use tracing::instrument;

use assetflow_core::{JobId, ObjectKey};

use crate::jobs::{Job, JobPayload};
use crate::queue::{JobQueue, QueueError};
use crate::storage::{ObjectStore, StorageError};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProducerError {
    #[error("input object {0} does not exist")]
    MissingObject(ObjectKey),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Clone)]
pub struct Producer {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn ObjectStore>,
}

impl core::fmt::Debug for Producer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

impl Producer {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ObjectStore>) -> Self {
        Self { queue, store }
    }

    /// Write `bytes` under `key`, then enqueue a job for it.
    #[instrument(skip(self, bytes, payload), fields(object_key = %key, size = bytes.len()), err)]
    pub async fn submit(
        &self,
        key: ObjectKey,
        bytes: Bytes,
        payload: JobPayload,
    ) -> Result<JobId, ProducerError> {
        self.store.put(&key, bytes).await?;
        self.enqueue(Job::new(key, payload)).await
    }

    /// Enqueue a job for an object that is already in the store.
    #[instrument(skip(self, payload), fields(object_key = %key), err)]
    pub async fn enqueue_existing(
        &self,
        key: ObjectKey,
        payload: JobPayload,
    ) -> Result<JobId, ProducerError> {
        self.enqueue(Job::new(key, payload)).await
    }

    /// Enqueue a caller-built job (e.g. with a domain-derived id).
    ///
    /// The referenced object must already exist.
    pub async fn enqueue(&self, job: Job) -> Result<JobId, ProducerError> {
        if !self.store.exists(&job.object_key).await? {
            return Err(ProducerError::MissingObject(job.object_key));
        }
        let id = self.queue.enqueue(job).await?;
        tracing::info!(job_id = %id, "job submitted");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryJobQueue;
    use crate::storage::InMemoryObjectStore;
    use std::time::Duration;

    fn producer() -> (Arc<InMemoryJobQueue>, Arc<InMemoryObjectStore>, Producer) {
        let queue = InMemoryJobQueue::arc();
        let store = InMemoryObjectStore::arc();
        let producer = Producer::new(queue.clone(), store.clone());
        (queue, store, producer)
    }

    #[tokio::test]
    async fn submit_stages_object_then_enqueues() {
        let (queue, store, producer) = producer();
        let key = ObjectKey::parse("in/a1.png").unwrap();

        let id = producer
            .submit(key.clone(), Bytes::from_static(b"png"), serde_json::json!({}))
            .await
            .unwrap();

        assert!(store.exists(&key).await.unwrap());
        let lease = queue.lease(Duration::from_secs(5), Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(lease.job.id, id);
        assert_eq!(lease.job.attempt, 0);
        assert_eq!(lease.job.object_key, key);
    }

    #[tokio::test]
    async fn missing_object_is_rejected_before_enqueue() {
        let (queue, _store, producer) = producer();
        let err = producer
            .enqueue_existing(ObjectKey::parse("in/ghost.png").unwrap(), serde_json::Value::Null)
            .await
            .unwrap_err();

        assert!(matches!(err, ProducerError::MissingObject(_)));
        assert_eq!(queue.stats().await.unwrap().pending(), 0);
    }

    #[tokio::test]
    async fn duplicate_job_id_surfaces_queue_error() {
        let (_queue, store, producer) = producer();
        let key = ObjectKey::parse("in/a1.png").unwrap();
        store.put(&key, Bytes::from_static(b"x")).await.unwrap();

        let job = Job::new(key, serde_json::json!({})).with_id(JobId::parse("a1").unwrap());
        producer.enqueue(job.clone()).await.unwrap();
        assert!(matches!(
            producer.enqueue(job).await,
            Err(ProducerError::Queue(QueueError::AlreadyExists(_)))
        ));
    }
}
