//! In-memory job queue for tests/dev.
//!
//! Visibility is computed from an injected [`Clock`], so lease expiry and nack
//! delays can be driven with a `ManualClock`. Waiting leasers are woken on
//! enqueue/nack and otherwise re-check on a short poll interval, which also
//! picks up clock-driven visibility changes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use assetflow_core::{add_duration, DeliveryToken, JobId, SharedClock, SystemClock};

use super::{DeliveryHandle, JobQueue, Lease, QueueError, QueueStats, Resolution};
use crate::jobs::{DeadLetterRecord, Job};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct ActiveLease {
    token: DeliveryToken,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    job: Job,
    visible_at: DateTime<Utc>,
    /// Enqueue order, kept across redeliveries.
    seq: u64,
    lease: Option<ActiveLease>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<JobId, Entry>,
    dead_letters: VecDeque<DeadLetterRecord>,
    next_seq: u64,
}

impl State {
    /// Expired leases become visible again with `attempt + 1`.
    fn reap_expired(&mut self, now: DateTime<Utc>) {
        for entry in self.entries.values_mut() {
            let expired = entry
                .lease
                .as_ref()
                .is_some_and(|lease| lease.expires_at <= now);
            if expired {
                entry.lease = None;
                entry.job.attempt = entry.job.attempt.saturating_add(1);
                entry.visible_at = now;
                tracing::debug!(job_id = %entry.job.id, attempt = entry.job.attempt, "lease expired");
            }
        }
    }

    /// The entry a live handle refers to, if the handle is still current.
    fn live_entry(&mut self, handle: &DeliveryHandle, now: DateTime<Utc>) -> Option<&mut Entry> {
        self.entries.get_mut(handle.job_id()).filter(|entry| {
            entry
                .lease
                .as_ref()
                .is_some_and(|lease| lease.token == handle.token() && lease.expires_at > now)
        })
    }

    fn next_visible(&self, now: DateTime<Utc>, fifo: bool) -> Option<JobId> {
        let visible = self
            .entries
            .values()
            .filter(|entry| entry.lease.is_none() && entry.visible_at <= now);

        let picked = if fifo {
            visible.min_by_key(|entry| entry.seq)
        } else {
            visible.min_by_key(|entry| (entry.visible_at, entry.seq))
        };
        picked.map(|entry| entry.job.id.clone())
    }
}

/// In-memory [`JobQueue`].
#[derive(Debug)]
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    clock: SharedClock,
    notify: Notify,
    fifo: bool,
    poll_interval: Duration,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            notify: Notify::new(),
            fifo: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Deliver visible jobs in enqueue order.
    pub fn fifo(mut self, fifo: bool) -> Self {
        self.fifo = fifo;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue state lock poisoned".to_string()))
    }

    fn try_lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let mut state = self.state()?;
        state.reap_expired(now);

        let Some(job_id) = state.next_visible(now, self.fifo) else {
            return Ok(None);
        };
        let Some(entry) = state.entries.get_mut(&job_id) else {
            return Ok(None);
        };

        let token = DeliveryToken::new();
        let expires_at = add_duration(now, visibility_timeout);
        entry.lease = Some(ActiveLease { token, expires_at });

        let job = entry.job.clone();
        let handle = DeliveryHandle::new(job.id.clone(), token, job.attempt, expires_at);
        tracing::debug!(job_id = %job.id, attempt = job.attempt, "leased job");
        Ok(Some(Lease { job, handle }))
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let now = self.clock.now();
        {
            let mut state = self.state()?;
            let parked = state.dead_letters.iter().any(|r| r.job_id == job.id);
            if parked || state.entries.contains_key(&job.id) {
                return Err(QueueError::AlreadyExists(job.id));
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert(
                job.id.clone(),
                Entry {
                    job: job.clone(),
                    visible_at: now,
                    seq,
                    lease: None,
                },
            );
        }
        self.notify.notify_one();
        tracing::debug!(job_id = %job.id, object_key = %job.object_key, "enqueued job");
        Ok(job.id)
    }

    async fn lease(
        &self,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        let start = tokio::time::Instant::now();
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_lease(visibility_timeout)? {
                return Ok(Some(lease));
            }

            let elapsed = start.elapsed();
            if elapsed >= wait {
                return Ok(None);
            }
            let nap = (wait - elapsed).min(self.poll_interval);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    async fn ack(&self, handle: &DeliveryHandle) -> Result<Resolution, QueueError> {
        let now = self.clock.now();
        let mut state = self.state()?;
        if state.live_entry(handle, now).is_none() {
            return Ok(Resolution::Stale);
        }
        state.entries.remove(handle.job_id());
        tracing::debug!(job_id = %handle.job_id(), "acked job");
        Ok(Resolution::Applied)
    }

    async fn nack(&self, handle: &DeliveryHandle, delay: Duration) -> Result<Resolution, QueueError> {
        let now = self.clock.now();
        {
            let mut state = self.state()?;
            let Some(entry) = state.live_entry(handle, now) else {
                return Ok(Resolution::Stale);
            };
            entry.lease = None;
            entry.job.attempt = entry.job.attempt.saturating_add(1);
            entry.visible_at = add_duration(now, delay);
            tracing::debug!(
                job_id = %entry.job.id,
                attempt = entry.job.attempt,
                delay_ms = delay.as_millis() as u64,
                "nacked job"
            );
        }
        if delay.is_zero() {
            self.notify.notify_one();
        }
        Ok(Resolution::Applied)
    }

    async fn extend(
        &self,
        handle: &DeliveryHandle,
        visibility_timeout: Duration,
    ) -> Result<Resolution, QueueError> {
        let now = self.clock.now();
        let mut state = self.state()?;
        let Some(entry) = state.live_entry(handle, now) else {
            return Ok(Resolution::Stale);
        };
        if let Some(lease) = entry.lease.as_mut() {
            lease.expires_at = add_duration(now, visibility_timeout);
        }
        Ok(Resolution::Applied)
    }

    async fn dead_letter(&self, handle: &DeliveryHandle, reason: &str) -> Result<Resolution, QueueError> {
        let now = self.clock.now();
        let mut state = self.state()?;
        if state.live_entry(handle, now).is_none() {
            return Ok(Resolution::Stale);
        }
        let Some(entry) = state.entries.remove(handle.job_id()) else {
            return Ok(Resolution::Stale);
        };
        tracing::warn!(job_id = %entry.job.id, attempt = entry.job.attempt, reason, "dead-lettered job");
        state
            .dead_letters
            .push_back(DeadLetterRecord::new(entry.job, reason, now));
        Ok(Resolution::Applied)
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        let state = self.state()?;
        Ok(state.dead_letters.iter().take(limit).cloned().collect())
    }

    async fn replay_dead_letter(&self, job_id: &JobId) -> Result<Job, QueueError> {
        let job = {
            let mut state = self.state()?;
            let Some(pos) = state.dead_letters.iter().position(|r| &r.job_id == job_id) else {
                return Err(QueueError::NotFound(job_id.clone()));
            };
            let Some(record) = state.dead_letters.remove(pos) else {
                return Err(QueueError::NotFound(job_id.clone()));
            };
            let mut job = record.job;
            job.attempt = 0;
            job
        };

        self.enqueue(job.clone()).await?;
        tracing::info!(job_id = %job.id, "replayed dead-lettered job");
        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = self.clock.now();
        let mut state = self.state()?;
        state.reap_expired(now);

        let mut stats = QueueStats {
            dead_lettered: state.dead_letters.len(),
            ..QueueStats::default()
        };
        for entry in state.entries.values() {
            match (&entry.lease, entry.visible_at <= now) {
                (Some(_), _) => stats.in_flight += 1,
                (None, true) => stats.ready += 1,
                (None, false) => stats.delayed += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::{ManualClock, ObjectKey};

    const VT: Duration = Duration::from_secs(30);
    const NO_WAIT: Duration = Duration::ZERO;

    fn job(id: &str) -> Job {
        Job::new(
            ObjectKey::parse(format!("in/{id}.png")).unwrap(),
            serde_json::json!({"size": 64}),
        )
        .with_id(JobId::parse(id).unwrap())
    }

    fn queue() -> (ManualClock, InMemoryJobQueue) {
        let clock = ManualClock::starting_now();
        let queue = InMemoryJobQueue::with_clock(clock.shared());
        (clock, queue)
    }

    #[tokio::test]
    async fn lease_then_ack_removes_job() {
        let (_clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();

        let lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        assert_eq!(lease.job.id.as_str(), "a1");
        assert_eq!(lease.handle.attempt(), 0);

        assert_eq!(queue.ack(&lease.handle).await.unwrap(), Resolution::Applied);
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn leased_job_is_invisible_to_other_leasers() {
        let (_clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();

        let _lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        assert!(queue.lease(VT, NO_WAIT).await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().in_flight, 1);
    }

    #[tokio::test]
    async fn expired_lease_redelivers_with_next_attempt() {
        let (clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();

        let first = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        clock.advance(VT + Duration::from_millis(1));

        let second = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        assert_eq!(second.job.id, first.job.id);
        assert_eq!(second.job.attempt, 1);
        assert_eq!(second.job.payload, first.job.payload);

        // The first handle lost ownership.
        assert_eq!(queue.ack(&first.handle).await.unwrap(), Resolution::Stale);
        assert_eq!(queue.ack(&second.handle).await.unwrap(), Resolution::Applied);
    }

    #[tokio::test]
    async fn nack_delays_visibility_and_increments_attempt() {
        let (clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();

        let lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        queue.nack(&lease.handle, Duration::from_secs(4)).await.unwrap();

        assert!(queue.lease(VT, NO_WAIT).await.unwrap().is_none());
        assert_eq!(queue.stats().await.unwrap().delayed, 1);

        clock.advance(Duration::from_secs(4));
        let again = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        assert_eq!(again.job.attempt, 1);
    }

    #[tokio::test]
    async fn resolving_twice_is_a_stale_no_op() {
        let (_clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();
        let lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();

        assert_eq!(queue.ack(&lease.handle).await.unwrap(), Resolution::Applied);
        assert_eq!(queue.ack(&lease.handle).await.unwrap(), Resolution::Stale);
        assert_eq!(queue.nack(&lease.handle, NO_WAIT).await.unwrap(), Resolution::Stale);
        assert_eq!(queue.extend(&lease.handle, VT).await.unwrap(), Resolution::Stale);
        assert_eq!(
            queue.dead_letter(&lease.handle, "late").await.unwrap(),
            Resolution::Stale
        );
        assert!(queue.dead_letters(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn extend_keeps_the_job_hidden() {
        let (clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();
        let lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();

        clock.advance(Duration::from_secs(20));
        assert_eq!(queue.extend(&lease.handle, VT).await.unwrap(), Resolution::Applied);
        clock.advance(Duration::from_secs(20));

        assert!(queue.lease(VT, NO_WAIT).await.unwrap().is_none());
        assert_eq!(queue.ack(&lease.handle).await.unwrap(), Resolution::Applied);
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let (_clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();
        assert!(matches!(
            queue.enqueue(job("a1")).await,
            Err(QueueError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn dead_letter_then_replay() {
        let (_clock, queue) = queue();
        queue.enqueue(job("a1")).await.unwrap();

        let lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        queue.nack(&lease.handle, NO_WAIT).await.unwrap();
        let lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        queue
            .dead_letter(&lease.handle, "permanent failure: corrupt")
            .await
            .unwrap();

        let records = queue.dead_letters(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempt, 1);
        assert_eq!(records[0].last_error, "permanent failure: corrupt");
        assert_eq!(queue.stats().await.unwrap().pending(), 0);

        let replayed = queue.replay_dead_letter(&records[0].job_id).await.unwrap();
        assert_eq!(replayed.attempt, 0);
        assert!(queue.dead_letters(10).await.unwrap().is_empty());

        let lease = queue.lease(VT, NO_WAIT).await.unwrap().unwrap();
        assert_eq!(lease.job.id.as_str(), "a1");
        assert_eq!(lease.job.attempt, 0);
    }

    #[tokio::test]
    async fn replay_of_unknown_job_is_not_found() {
        let (_clock, queue) = queue();
        let missing = JobId::parse("nope").unwrap();
        assert!(matches!(
            queue.replay_dead_letter(&missing).await,
            Err(QueueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fifo_delivers_in_enqueue_order() {
        let clock = ManualClock::starting_now();
        let queue = InMemoryJobQueue::with_clock(clock.shared()).fifo(true);
        for id in ["a", "b", "c"] {
            queue.enqueue(job(id)).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(lease) = queue.lease(VT, NO_WAIT).await.unwrap() {
            order.push(lease.job.id.to_string());
            queue.ack(&lease.handle).await.unwrap();
        }
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn lease_times_out_on_empty_queue() {
        let queue = InMemoryJobQueue::new().with_poll_interval(Duration::from_millis(5));
        let lease = queue.lease(VT, Duration::from_millis(30)).await.unwrap();
        assert!(lease.is_none());
    }

    #[tokio::test]
    async fn waiting_leaser_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryJobQueue::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.lease(VT, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(job("late")).await.unwrap();

        let lease = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(lease.job.id.as_str(), "late");
    }
}
