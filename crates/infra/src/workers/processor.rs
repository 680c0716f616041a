//! Pluggable processing function.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;

use assetflow_core::ObjectKey;

use crate::jobs::{Job, ProcessError};

/// Output of a successful run: written to the object store under `key` and
/// recorded in the ledger as the job's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: ObjectKey,
    pub bytes: Bytes,
}

impl Artifact {
    pub fn new(key: ObjectKey, bytes: impl Into<Bytes>) -> Self {
        Self {
            key,
            bytes: bytes.into(),
        }
    }
}

/// Domain transform invoked by the worker pool.
///
/// Receives the job and the bytes of its input object. Must classify its own
/// failures; the pool never inspects anything beyond the `ProcessError`
/// variant. Must tolerate being run more than once for the same job.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, job: &Job, input: Bytes) -> Result<Artifact, ProcessError>;
}

/// Adapts an async closure into a [`Processor`].
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> core::fmt::Debug for FnProcessor<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FnProcessor")
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Job, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Artifact, ProcessError>> + Send,
{
    async fn process(&self, job: &Job, input: Bytes) -> Result<Artifact, ProcessError> {
        (self.f)(job.clone(), input).await
    }
}
