//! Idempotency ledger.
//!
//! Records which job ids completed so that a redelivered job short-circuits
//! before re-running its side effects. Entries are written once (first writer
//! wins) and never mutated; a retention sweep may remove old ones.

use std::time::Duration;

use async_trait::async_trait;

use assetflow_core::{JobId, ObjectKey};

use crate::jobs::LedgerEntry;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;

/// Result of `record_completion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// This call created the entry.
    Recorded(LedgerEntry),
    /// Another writer got there first; the existing entry is returned and the
    /// caller's completion is redundant.
    AlreadyRecorded(LedgerEntry),
}

impl RecordOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            RecordOutcome::Recorded(entry) | RecordOutcome::AlreadyRecorded(entry) => entry,
        }
    }

    pub fn was_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded(_))
    }
}

/// Ledger error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt ledger entry for {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn has_completed(&self, job_id: &JobId) -> Result<bool, LedgerError>;

    /// Record a completion. Safe under concurrent calls for the same id.
    async fn record_completion(
        &self,
        job_id: &JobId,
        result_key: &ObjectKey,
    ) -> Result<RecordOutcome, LedgerError>;

    async fn get(&self, job_id: &JobId) -> Result<Option<LedgerEntry>, LedgerError>;

    /// Delete entries completed more than `retention` ago. Returns the number
    /// of entries removed.
    async fn purge_expired(&self, retention: Duration) -> Result<usize, LedgerError>;
}

#[async_trait]
impl<L> IdempotencyLedger for std::sync::Arc<L>
where
    L: IdempotencyLedger + ?Sized,
{
    async fn has_completed(&self, job_id: &JobId) -> Result<bool, LedgerError> {
        (**self).has_completed(job_id).await
    }

    async fn record_completion(
        &self,
        job_id: &JobId,
        result_key: &ObjectKey,
    ) -> Result<RecordOutcome, LedgerError> {
        (**self).record_completion(job_id, result_key).await
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<LedgerEntry>, LedgerError> {
        (**self).get(job_id).await
    }

    async fn purge_expired(&self, retention: Duration) -> Result<usize, LedgerError> {
        (**self).purge_expired(retention).await
    }
}
