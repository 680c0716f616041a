//! Core job types: the wire message, ledger entries, dead-letter records and
//! the failure classification returned by processors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assetflow_core::{JobId, ObjectKey};

/// Opaque, domain-specific job metadata.
///
/// Carried unchanged across redeliveries. Unknown fields are preserved since
/// the pipeline never interprets them.
pub type JobPayload = serde_json::Value;

/// A unit of asynchronous work referencing an object to process.
///
/// Wire format (JSON): `id`, `objectKey`, `attempt`, `enqueuedAt` (RFC 3339),
/// `payload`. Unknown top-level fields are ignored on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Stable across all attempts.
    pub id: JobId,
    /// Input object in the object store.
    pub object_key: ObjectKey,
    /// Number of previous deliveries that ended in a nack or lease expiry.
    #[serde(default)]
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: JobPayload,
}

impl Job {
    /// Create a new job with a fresh id and `attempt = 0`.
    pub fn new(object_key: ObjectKey, payload: JobPayload) -> Self {
        Self {
            id: JobId::new(),
            object_key,
            attempt: 0,
            enqueued_at: Utc::now(),
            payload,
        }
    }

    /// Use an explicit id (callers that derive ids from their own domain).
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Decode a job from its wire representation.
    pub fn from_wire(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encode a job to its wire representation.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Proof that a job completed. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub job_id: JobId,
    pub completed_at: DateTime<Utc>,
    pub result_key: ObjectKey,
}

/// Terminal record for a job that will not be processed automatically again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub job_id: JobId,
    pub last_error: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    /// The job as it was when dead-lettered, kept for operator replay.
    pub job: Job,
}

impl DeadLetterRecord {
    pub fn new(job: Job, last_error: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id.clone(),
            last_error: last_error.into(),
            attempt: job.attempt,
            timestamp,
            job,
        }
    }
}

/// Failure classification returned by a processor.
///
/// The worker never looks past the variant; the message is only logged and
/// stored in dead-letter records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    /// Retryable: network errors, temporary store unavailability, timeouts.
    #[error("transient: {0}")]
    Transient(String),
    /// Not retryable: malformed payload, input known never to arrive.
    #[error("permanent: {0}")]
    Permanent(String),
    /// Unclassified; handled like `Transient`.
    #[error("unknown: {0}")]
    Unknown(String),
}

impl ProcessError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProcessError::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProcessError::Transient(m) | ProcessError::Permanent(m) | ProcessError::Unknown(m) => m,
        }
    }
}
