//! In-memory idempotency ledger for tests/dev.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use assetflow_core::{JobId, ObjectKey, SharedClock, SystemClock};

use super::{IdempotencyLedger, LedgerError, RecordOutcome};
use crate::jobs::LedgerEntry;

#[derive(Debug)]
pub struct InMemoryLedger {
    entries: RwLock<HashMap<JobId, LedgerEntry>>,
    clock: SharedClock,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Unavailable("ledger lock poisoned".to_string())
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn has_completed(&self, job_id: &JobId) -> Result<bool, LedgerError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.contains_key(job_id))
    }

    async fn record_completion(
        &self,
        job_id: &JobId,
        result_key: &ObjectKey,
    ) -> Result<RecordOutcome, LedgerError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        match entries.entry(job_id.clone()) {
            Entry::Occupied(existing) => Ok(RecordOutcome::AlreadyRecorded(existing.get().clone())),
            Entry::Vacant(slot) => {
                let entry = slot.insert(LedgerEntry {
                    job_id: job_id.clone(),
                    completed_at: now,
                    result_key: result_key.clone(),
                });
                Ok(RecordOutcome::Recorded(entry.clone()))
            }
        }
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<LedgerEntry>, LedgerError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(job_id).cloned())
    }

    async fn purge_expired(&self, retention: Duration) -> Result<usize, LedgerError> {
        let cutoff = cutoff(self.clock.now(), retention);
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| entry.completed_at >= cutoff);
        Ok(before - entries.len())
    }
}

/// Oldest `completed_at` that survives a purge.
pub(crate) fn cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|r| now.checked_sub_signed(r))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::ManualClock;

    fn id(s: &str) -> JobId {
        JobId::parse(s).unwrap()
    }

    fn key(s: &str) -> ObjectKey {
        ObjectKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn first_writer_wins() {
        let ledger = InMemoryLedger::new();

        let first = ledger.record_completion(&id("a1"), &key("out/a1.png")).await.unwrap();
        let second = ledger.record_completion(&id("a1"), &key("out/other.png")).await.unwrap();

        assert!(first.was_recorded());
        assert!(!second.was_recorded());
        assert_eq!(second.entry().result_key, key("out/a1.png"));
        assert!(ledger.has_completed(&id("a1")).await.unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_records_create_one_entry() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .record_completion(&id("same"), &key(&format!("out/{i}")))
                    .await
                    .unwrap()
            }));
        }

        let mut recorded = 0;
        for handle in handles {
            if handle.await.unwrap().was_recorded() {
                recorded += 1;
            }
        }
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn purge_removes_only_old_entries() {
        let clock = ManualClock::starting_now();
        let ledger = InMemoryLedger::with_clock(clock.shared());

        ledger.record_completion(&id("old"), &key("out/old")).await.unwrap();
        clock.advance(Duration::from_secs(3600));
        ledger.record_completion(&id("new"), &key("out/new")).await.unwrap();
        clock.advance(Duration::from_secs(60));

        let removed = ledger.purge_expired(Duration::from_secs(600)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!ledger.has_completed(&id("old")).await.unwrap());
        assert!(ledger.has_completed(&id("new")).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_job_is_not_completed() {
        let ledger = InMemoryLedger::new();
        assert!(!ledger.has_completed(&id("nope")).await.unwrap());
        assert!(ledger.get(&id("nope")).await.unwrap().is_none());
    }
}
