//! Job queue boundary.
//!
//! At-least-once delivery with visibility-timeout leasing:
//!
//! - **Lease**: a delivered job is hidden from other leasers until it is
//!   resolved or its visibility timeout expires
//! - **Expiry**: an unresolved lease behaves like `nack(handle, 0)`; the job
//!   comes back with `attempt + 1` (this is how worker crashes recover)
//! - **Resolution**: `ack`, `nack` and `dead_letter` consume the handle; a
//!   stale or already-resolved handle is a no-op reported as
//!   [`Resolution::Stale`], never an error
//! - **Ordering**: none across jobs, unless a backend is configured for FIFO
//!
//! Backends: [`InMemoryJobQueue`] for tests/dev, `RedisJobQueue` (feature
//! `redis`) for shared deployments.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use assetflow_core::{DeliveryToken, JobId};

use crate::jobs::{DeadLetterRecord, Job};

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryJobQueue;
#[cfg(feature = "redis")]
pub use self::redis::RedisJobQueue;

/// Ownership token for one delivery of one job.
///
/// Deliberately not `Clone`: the worker that leased the job is the only one
/// that can resolve it.
#[derive(Debug, PartialEq, Eq)]
pub struct DeliveryHandle {
    job_id: JobId,
    token: DeliveryToken,
    attempt: u32,
    leased_until: DateTime<Utc>,
}

impl DeliveryHandle {
    pub fn new(job_id: JobId, token: DeliveryToken, attempt: u32, leased_until: DateTime<Utc>) -> Self {
        Self {
            job_id,
            token,
            attempt,
            leased_until,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn token(&self) -> DeliveryToken {
        self.token
    }

    /// Attempt number of the delivered copy.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Visibility deadline at lease time (extensions are not reflected here).
    pub fn leased_until(&self) -> DateTime<Utc> {
        self.leased_until
    }
}

/// A leased job together with the handle that resolves it.
#[derive(Debug)]
pub struct Lease {
    pub job: Job,
    pub handle: DeliveryHandle,
}

/// Outcome of a handle-based operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The operation took effect.
    Applied,
    /// The handle had expired or was already resolved; nothing changed.
    Stale,
}

impl Resolution {
    pub fn is_applied(&self) -> bool {
        matches!(self, Resolution::Applied)
    }
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Visible now and not leased.
    pub ready: usize,
    /// Waiting for a nack delay to elapse.
    pub delayed: usize,
    /// Leased and not yet resolved (expired leases count until reaped).
    pub in_flight: usize,
    pub dead_lettered: usize,
}

impl QueueStats {
    /// Jobs still owned by the main queue.
    pub fn pending(&self) -> usize {
        self.ready + self.delayed + self.in_flight
    }
}

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// At-least-once job queue with leasing and a dead-letter sink.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a new job. The job is visible immediately.
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    /// Lease the next visible job, hiding it for `visibility_timeout`.
    ///
    /// Suspends up to `wait` for a job to become available; `Ok(None)` on
    /// timeout.
    async fn lease(
        &self,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<Lease>, QueueError>;

    /// Remove a processed job.
    async fn ack(&self, handle: &DeliveryHandle) -> Result<Resolution, QueueError>;

    /// Return the job for redelivery no sooner than `delay`, with `attempt + 1`.
    async fn nack(&self, handle: &DeliveryHandle, delay: Duration) -> Result<Resolution, QueueError>;

    /// Push the visibility deadline to now + `visibility_timeout`.
    async fn extend(
        &self,
        handle: &DeliveryHandle,
        visibility_timeout: Duration,
    ) -> Result<Resolution, QueueError>;

    /// Remove the job permanently and write a dead-letter record.
    async fn dead_letter(&self, handle: &DeliveryHandle, reason: &str) -> Result<Resolution, QueueError>;

    /// Dead-letter records, oldest first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError>;

    /// Move a dead-lettered job back to the main queue with `attempt = 0`.
    async fn replay_dead_letter(&self, job_id: &JobId) -> Result<Job, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;
}

#[async_trait]
impl<Q> JobQueue for std::sync::Arc<Q>
where
    Q: JobQueue + ?Sized,
{
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        (**self).enqueue(job).await
    }

    async fn lease(
        &self,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        (**self).lease(visibility_timeout, wait).await
    }

    async fn ack(&self, handle: &DeliveryHandle) -> Result<Resolution, QueueError> {
        (**self).ack(handle).await
    }

    async fn nack(&self, handle: &DeliveryHandle, delay: Duration) -> Result<Resolution, QueueError> {
        (**self).nack(handle, delay).await
    }

    async fn extend(
        &self,
        handle: &DeliveryHandle,
        visibility_timeout: Duration,
    ) -> Result<Resolution, QueueError> {
        (**self).extend(handle, visibility_timeout).await
    }

    async fn dead_letter(&self, handle: &DeliveryHandle, reason: &str) -> Result<Resolution, QueueError> {
        (**self).dead_letter(handle, reason).await
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        (**self).dead_letters(limit).await
    }

    async fn replay_dead_letter(&self, job_id: &JobId) -> Result<Job, QueueError> {
        (**self).replay_dead_letter(job_id).await
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats().await
    }
}
