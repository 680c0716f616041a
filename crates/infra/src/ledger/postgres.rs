//! Postgres-backed idempotency ledger.
//!
//! One row per completed job. `record_completion` is a single
//! `INSERT ... ON CONFLICT DO NOTHING`, so the primary key decides the winner
//! of concurrent completions; a losing writer reads the existing row back.
//!
//! ## Error Mapping
//!
//! | SQLx Error | LedgerError |
//! |------------|-------------|
//! | Database / Io / PoolTimedOut / PoolClosed | `Unavailable` |
//! | ColumnDecode / Decode | `Corrupt` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use assetflow_core::{JobId, ObjectKey, SharedClock, SystemClock};

use super::in_memory::cutoff;
use super::{IdempotencyLedger, LedgerError, RecordOutcome};
use crate::jobs::LedgerEntry;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS job_ledger (
    job_id       TEXT PRIMARY KEY,
    completed_at TIMESTAMPTZ NOT NULL,
    result_key   TEXT NOT NULL
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS job_ledger_completed_at_idx ON job_ledger (completed_at)";

#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
    clock: SharedClock,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            clock: SystemClock::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Connect and make sure the ledger table exists.
    pub async fn connect(database_url: &str) -> Result<Self, LedgerError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let ledger = Self::new(pool);
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Idempotent schema setup.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::query(CREATE_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create table", e))?;
        sqlx::query(CREATE_INDEX)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create index", e))?;
        Ok(())
    }

    async fn fetch(&self, job_id: &JobId) -> Result<Option<LedgerEntry>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT job_id, completed_at, result_key
            FROM job_ledger
            WHERE job_id = $1
            "#,
        )
        .bind(job_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| row_to_entry(&row)).transpose()
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<LedgerEntry, LedgerError> {
    let raw_id: String = row
        .try_get("job_id")
        .map_err(|e| map_sqlx_error("decode job_id", e))?;
    let completed_at: DateTime<Utc> = row
        .try_get("completed_at")
        .map_err(|e| map_sqlx_error("decode completed_at", e))?;
    let raw_key: String = row
        .try_get("result_key")
        .map_err(|e| map_sqlx_error("decode result_key", e))?;

    let corrupt = |reason: String| LedgerError::Corrupt {
        job_id: raw_id.clone(),
        reason,
    };
    let job_id = JobId::parse(raw_id.as_str()).map_err(|e| corrupt(e.to_string()))?;
    let result_key = ObjectKey::parse(raw_key).map_err(|e| corrupt(e.to_string()))?;

    Ok(LedgerEntry {
        job_id,
        completed_at,
        result_key,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => LedgerError::Corrupt {
            job_id: String::new(),
            reason: format!("{operation}: {err}"),
        },
        sqlx::Error::Database(db_err) => {
            tracing::error!(operation, error = %db_err.message(), "ledger database error");
            LedgerError::Unavailable(format!("database error in {}: {}", operation, db_err.message()))
        }
        _ => {
            tracing::error!(operation, error = %err, "ledger backend error");
            LedgerError::Unavailable(format!("sqlx error in {}: {}", operation, err))
        }
    }
}

#[async_trait]
impl IdempotencyLedger for PostgresLedger {
    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn has_completed(&self, job_id: &JobId) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM job_ledger WHERE job_id = $1")
            .bind(job_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("has_completed", e))?;
        Ok(row.is_some())
    }

    #[instrument(skip(self), fields(job_id = %job_id, result_key = %result_key), err)]
    async fn record_completion(
        &self,
        job_id: &JobId,
        result_key: &ObjectKey,
    ) -> Result<RecordOutcome, LedgerError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO job_ledger (job_id, completed_at, result_key)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) DO NOTHING
            RETURNING job_id, completed_at, result_key
            "#,
        )
        .bind(job_id.as_str())
        .bind(self.clock.now())
        .bind(result_key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_completion", e))?;

        if let Some(row) = inserted {
            return Ok(RecordOutcome::Recorded(row_to_entry(&row)?));
        }

        match self.fetch(job_id).await? {
            Some(existing) => Ok(RecordOutcome::AlreadyRecorded(existing)),
            // Conflicting row purged between INSERT and SELECT.
            None => Err(LedgerError::Unavailable(format!(
                "ledger entry for {job_id} vanished during record_completion"
            ))),
        }
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: &JobId) -> Result<Option<LedgerEntry>, LedgerError> {
        self.fetch(job_id).await
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self, retention: Duration) -> Result<usize, LedgerError> {
        let cutoff = cutoff(self.clock.now(), retention);
        let result = sqlx::query("DELETE FROM job_ledger WHERE completed_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
