//! Worker pool: lease → ledger check → process → resolve.
//!
//! ## Delivery handling
//!
//! 1. Already in the ledger: ack and discard (duplicate delivery)
//! 2. Attempt ceiling reached before processing: dead-letter as poison pill
//! 3. Fetch input, run the processor, store the artifact, record completion
//! 4. Resolve: ack on success, otherwise nack with backoff or dead-letter
//!
//! Infrastructure failures inside step 3 (input unavailable, artifact write
//! failed, ledger down) are classified like processor failures: a missing
//! input is permanent, anything else transient.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use assetflow_core::{JobId, ObjectKey};

use super::processor::{Artifact, Processor};
use crate::config::PipelineConfig;
use crate::jobs::{DeadLetterReason, Decision, Job, ProcessError, RetryPolicy};
use crate::ledger::IdempotencyLedger;
use crate::queue::{DeliveryHandle, JobQueue, Lease, QueueError, Resolution};
use crate::storage::{ObjectStore, StorageError};

/// Pause after a failed `lease` call before trying again.
const LEASE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker pool already running")]
    AlreadyRunning,
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Per-delivery knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub visibility_timeout: Duration,
    pub lease_wait: Duration,
    pub processing_timeout: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            lease_wait: Duration::from_secs(1),
            processing_timeout: None,
            heartbeat_interval: None,
        }
    }
}

impl WorkerOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            visibility_timeout: config.queue.visibility_timeout,
            lease_wait: config.queue.lease_wait,
            processing_timeout: config.worker.processing_timeout,
            heartbeat_interval: config.worker.heartbeat_interval,
        }
    }
}

/// How a single delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { result_key: ObjectKey },
    /// The ledger already had the job; acked without processing.
    Duplicate,
    RetryScheduled { delay: Duration },
    DeadLettered { reason: DeadLetterReason },
    /// The handle went stale or the queue failed while resolving; the lease
    /// will expire and the job comes back.
    Unresolved,
}

/// Counters since the pool was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub leased: u64,
    pub completed: u64,
    pub duplicates: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub unresolved: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    leased: AtomicU64,
    completed: AtomicU64,
    duplicates: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    unresolved: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Completed { .. } => &self.completed,
            Outcome::Duplicate => &self.duplicates,
            Outcome::RetryScheduled { .. } => &self.retried,
            Outcome::DeadLettered { .. } => &self.dead_lettered,
            Outcome::Unresolved => &self.unresolved,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result of [`WorkerPool::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Deliveries that finished after stop began.
    pub resolved: usize,
    /// Jobs whose processing was aborted at the drain deadline. Their leases
    /// expire on their own and the jobs are redelivered.
    pub abandoned: Vec<JobId>,
}

/// Shared "accepting work" flag for health checks.
#[derive(Debug, Clone)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn is_accepting(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Shared {
    queue: Arc<dyn JobQueue>,
    ledger: Arc<dyn IdempotencyLedger>,
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
    options: WorkerOptions,
    counters: Counters,
}

/// One execution context. [`WorkerPool::start`] runs several of these in a
/// loop; tests can drive one directly with [`Worker::run_once`].
#[derive(Clone)]
pub struct Worker {
    id: usize,
    shared: Arc<Shared>,
    processor: Arc<dyn Processor>,
}

impl core::fmt::Debug for Worker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Worker {
    /// Lease one job (waiting up to the configured lease wait) and handle it.
    /// `Ok(None)` when nothing was available.
    pub async fn run_once(&self) -> Result<Option<Outcome>, WorkerError> {
        let opts = &self.shared.options;
        let Some(lease) = self
            .shared
            .queue
            .lease(opts.visibility_timeout, opts.lease_wait)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(self.handle(lease).await))
    }

    /// Drive one delivery to an outcome.
    pub async fn handle(&self, lease: Lease) -> Outcome {
        let Lease { job, handle } = lease;
        self.shared.counters.leased.fetch_add(1, Ordering::Relaxed);
        debug!(worker = self.id, job_id = %job.id, attempt = job.attempt, "processing job");

        let outcome = match self.shared.ledger.has_completed(&job.id).await {
            Ok(true) => self.ack_duplicate(&job, &handle).await,
            Ok(false) if self.shared.policy.is_exhausted(job.attempt) => {
                let reason = DeadLetterReason::PoisonPill {
                    attempts: job.attempt,
                    last_error: None,
                };
                self.dead_letter(&job, &handle, reason).await
            }
            Ok(false) => match self.execute(&job, &handle).await {
                Ok(result_key) => self.ack_completed(&job, &handle, result_key).await,
                Err(err) => self.fail(&job, &handle, err).await,
            },
            Err(e) => {
                let err = ProcessError::transient(format!("ledger check failed: {e}"));
                self.fail(&job, &handle, err).await
            }
        };

        self.shared.counters.record(&outcome);
        outcome
    }

    async fn execute(&self, job: &Job, handle: &DeliveryHandle) -> Result<ObjectKey, ProcessError> {
        let input = self
            .shared
            .store
            .get(&job.object_key)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(key) => ProcessError::permanent(format!("input {key} not found")),
                other if other.is_transient() => ProcessError::transient(other.to_string()),
                other => ProcessError::permanent(other.to_string()),
            })?;

        let artifact = self.invoke(job, input, handle).await?;

        self.shared
            .store
            .put(&artifact.key, artifact.bytes)
            .await
            .map_err(|e| ProcessError::transient(format!("writing {}: {e}", artifact.key)))?;

        let outcome = self
            .shared
            .ledger
            .record_completion(&job.id, &artifact.key)
            .await
            .map_err(|e| ProcessError::transient(format!("recording completion: {e}")))?;

        if !outcome.was_recorded() {
            // A concurrent delivery of the same job finished first.
            info!(job_id = %job.id, result_key = %outcome.entry().result_key, "completion already recorded");
        }
        Ok(outcome.entry().result_key.clone())
    }

    /// Run the processor with the optional timeout, extending the lease on
    /// every heartbeat tick.
    async fn invoke(&self, job: &Job, input: bytes::Bytes, handle: &DeliveryHandle) -> Result<Artifact, ProcessError> {
        let opts = &self.shared.options;
        let work = async {
            match opts.processing_timeout {
                Some(limit) => tokio::time::timeout(limit, self.processor.process(job, input))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ProcessError::transient(format!(
                            "processing exceeded {}ms",
                            limit.as_millis()
                        )))
                    }),
                None => self.processor.process(job, input).await,
            }
        };

        let Some(every) = opts.heartbeat_interval else {
            return work.await;
        };

        tokio::pin!(work);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = ticker.tick() => {
                    match self.shared.queue.extend(handle, opts.visibility_timeout).await {
                        Ok(Resolution::Applied) => debug!(job_id = %job.id, "lease extended"),
                        Ok(Resolution::Stale) => warn!(job_id = %job.id, "lease lost while processing"),
                        Err(e) => warn!(job_id = %job.id, error = %e, "lease extension failed"),
                    }
                }
            }
        }
    }

    async fn ack_duplicate(&self, job: &Job, handle: &DeliveryHandle) -> Outcome {
        info!(job_id = %job.id, attempt = job.attempt, "job already completed, discarding redelivery");
        match self.shared.queue.ack(handle).await {
            Ok(Resolution::Applied) => Outcome::Duplicate,
            Ok(Resolution::Stale) => self.stale(job, "ack"),
            Err(e) => self.queue_failed(job, "ack", e),
        }
    }

    async fn ack_completed(&self, job: &Job, handle: &DeliveryHandle, result_key: ObjectKey) -> Outcome {
        match self.shared.queue.ack(handle).await {
            Ok(Resolution::Applied) => {
                info!(job_id = %job.id, attempt = job.attempt, result_key = %result_key, "job completed");
                Outcome::Completed { result_key }
            }
            // Completion is in the ledger; the redelivery will short-circuit.
            Ok(Resolution::Stale) => self.stale(job, "ack"),
            Err(e) => self.queue_failed(job, "ack", e),
        }
    }

    async fn fail(&self, job: &Job, handle: &DeliveryHandle, err: ProcessError) -> Outcome {
        match self.shared.policy.decide(job.attempt, &err) {
            Decision::Retry { delay } => {
                warn!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "job failed, scheduling retry"
                );
                match self.shared.queue.nack(handle, delay).await {
                    Ok(Resolution::Applied) => Outcome::RetryScheduled { delay },
                    Ok(Resolution::Stale) => self.stale(job, "nack"),
                    Err(e) => self.queue_failed(job, "nack", e),
                }
            }
            Decision::DeadLetter(reason) => self.dead_letter(job, handle, reason).await,
        }
    }

    async fn dead_letter(&self, job: &Job, handle: &DeliveryHandle, reason: DeadLetterReason) -> Outcome {
        warn!(job_id = %job.id, attempt = job.attempt, reason = %reason, "dead-lettering job");
        match self.shared.queue.dead_letter(handle, &reason.to_string()).await {
            Ok(Resolution::Applied) => Outcome::DeadLettered { reason },
            Ok(Resolution::Stale) => self.stale(job, "dead_letter"),
            Err(e) => self.queue_failed(job, "dead_letter", e),
        }
    }

    fn stale(&self, job: &Job, op: &'static str) -> Outcome {
        warn!(worker = self.id, job_id = %job.id, op, "delivery handle was stale, job will be redelivered");
        Outcome::Unresolved
    }

    fn queue_failed(&self, job: &Job, op: &'static str, err: QueueError) -> Outcome {
        error!(worker = self.id, job_id = %job.id, op, error = %err, "failed to resolve delivery");
        Outcome::Unresolved
    }
}

type InFlight = Arc<Mutex<HashMap<usize, JobId>>>;

struct Running {
    stop_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    in_flight: InFlight,
    drained: Arc<AtomicUsize>,
}

/// Bounded set of concurrent workers.
pub struct WorkerPool {
    shared: Arc<Shared>,
    accepting: Arc<AtomicBool>,
    running: Mutex<Option<Running>>,
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("options", &self.shared.options)
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        ledger: Arc<dyn IdempotencyLedger>,
        store: Arc<dyn ObjectStore>,
        policy: RetryPolicy,
        options: WorkerOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                ledger,
                store,
                policy,
                options,
                counters: Counters::default(),
            }),
            accepting: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(None),
        }
    }

    /// A standalone worker sharing this pool's backends and counters.
    pub fn worker(&self, processor: Arc<dyn Processor>) -> Worker {
        Worker {
            id: 0,
            shared: self.shared.clone(),
            processor,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn readiness(&self) -> Readiness {
        Readiness(self.accepting.clone())
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        let in_flight = self
            .running
            .lock()
            .ok()
            .and_then(|running| {
                running
                    .as_ref()
                    .and_then(|r| r.in_flight.lock().ok().map(|m| m.len()))
            })
            .unwrap_or(0);
        PoolStats {
            leased: c.leased.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            dead_lettered: c.dead_lettered.load(Ordering::Relaxed),
            unresolved: c.unresolved.load(Ordering::Relaxed),
            in_flight,
        }
    }

    /// Spawn `concurrency` worker tasks.
    pub fn start(&self, concurrency: usize, processor: Arc<dyn Processor>) -> Result<(), WorkerError> {
        if concurrency == 0 {
            return Err(WorkerError::InvalidConcurrency);
        }
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if running.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let drained = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for id in 0..concurrency {
            let worker = Worker {
                id,
                shared: self.shared.clone(),
                processor: processor.clone(),
            };
            tasks.spawn(worker_loop(worker, stop_rx.clone(), in_flight.clone(), drained.clone()));
        }

        *running = Some(Running {
            stop_tx,
            tasks,
            in_flight,
            drained,
        });
        self.accepting.store(true, Ordering::SeqCst);
        info!(concurrency, "worker pool started");
        Ok(())
    }

    /// Stop leasing, wait up to `drain_timeout` for in-flight deliveries, then
    /// abort whatever is left.
    pub async fn stop(&self, drain_timeout: Duration) -> DrainReport {
        self.accepting.store(false, Ordering::SeqCst);
        let running = match self.running.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(Running {
            stop_tx,
            mut tasks,
            in_flight,
            drained,
        }) = running
        else {
            return DrainReport::default();
        };

        let _ = stop_tx.send(true);
        let pending = in_flight.lock().map(|m| m.len()).unwrap_or(0);
        info!(in_flight = pending, drain_timeout_ms = drain_timeout.as_millis() as u64, "draining worker pool");

        let deadline = tokio::time::Instant::now() + drain_timeout;
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Err(e))) if e.is_panic() => error!(error = %e, "worker task panicked"),
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let mut abandoned = Vec::new();
        if timed_out {
            abandoned = match in_flight.lock() {
                Ok(mut m) => m.drain().map(|(_, id)| id).collect(),
                Err(poisoned) => poisoned.into_inner().drain().map(|(_, id)| id).collect(),
            };
            abandoned.sort();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            for job_id in &abandoned {
                warn!(job_id = %job_id, "abandoned in-flight job at drain deadline");
            }
        }

        let report = DrainReport {
            resolved: drained.load(Ordering::SeqCst),
            abandoned,
        };
        info!(resolved = report.resolved, abandoned = report.abandoned.len(), "worker pool stopped");
        report
    }
}

async fn worker_loop(
    worker: Worker,
    mut stop_rx: watch::Receiver<bool>,
    in_flight: InFlight,
    drained: Arc<AtomicUsize>,
) {
    let opts = worker.shared.options.clone();
    debug!(worker = worker.id, "worker started");

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let leased = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            leased = worker.shared.queue.lease(opts.visibility_timeout, opts.lease_wait) => leased,
        };

        let lease = match leased {
            Ok(Some(lease)) => lease,
            Ok(None) => continue,
            Err(e) => {
                error!(worker = worker.id, error = %e, "lease failed");
                let stopped = tokio::select! {
                    _ = stop_rx.changed() => true,
                    _ = tokio::time::sleep(LEASE_ERROR_BACKOFF) => false,
                };
                if stopped {
                    break;
                }
                continue;
            }
        };

        let job_id = lease.job.id.clone();
        if let Ok(mut m) = in_flight.lock() {
            m.insert(worker.id, job_id);
        }

        worker.handle(lease).await;

        if let Ok(mut m) = in_flight.lock() {
            m.remove(&worker.id);
        }
        if *stop_rx.borrow() {
            drained.fetch_add(1, Ordering::SeqCst);
        }
    }

    debug!(worker = worker.id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::queue::InMemoryJobQueue;
    use crate::storage::InMemoryObjectStore;
    use crate::workers::FnProcessor;
    use assetflow_core::ManualClock;
    use bytes::Bytes;

    struct Harness {
        clock: ManualClock,
        queue: Arc<InMemoryJobQueue>,
        store: Arc<InMemoryObjectStore>,
        pool: WorkerPool,
    }

    fn harness(policy: RetryPolicy) -> Harness {
        harness_with(
            policy,
            WorkerOptions {
                lease_wait: Duration::ZERO,
                ..WorkerOptions::default()
            },
        )
    }

    fn harness_with(policy: RetryPolicy, options: WorkerOptions) -> Harness {
        let clock = ManualClock::starting_now();
        let queue = Arc::new(InMemoryJobQueue::with_clock(clock.shared()));
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.shared()));
        let store = InMemoryObjectStore::arc();
        let pool = WorkerPool::new(queue.clone(), ledger, store.clone(), policy, options);
        Harness {
            clock,
            queue,
            store,
            pool,
        }
    }

    async fn submit(h: &Harness, id: &str) {
        let key = ObjectKey::parse(format!("in/{id}")).unwrap();
        h.store.put(&key, Bytes::from_static(b"data")).await.unwrap();
        let job = Job::new(key, serde_json::json!({})).with_id(JobId::parse(id).unwrap());
        h.queue.enqueue(job).await.unwrap();
    }

    fn copy_processor() -> Arc<dyn Processor> {
        Arc::new(FnProcessor::new(|job: Job, input: Bytes| async move {
            let name = job.object_key.as_str().trim_start_matches("in/").to_string();
            Ok::<_, ProcessError>(Artifact::new(ObjectKey::parse(format!("out/{name}")).unwrap(), input))
        }))
    }

    #[tokio::test]
    async fn missing_input_dead_letters_as_permanent() {
        let h = harness(RetryPolicy::default());
        let job = Job::new(ObjectKey::parse("in/ghost").unwrap(), serde_json::json!({}));
        h.queue.enqueue(job).await.unwrap();

        let outcome = h.pool.worker(copy_processor()).run_once().await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            Outcome::DeadLettered {
                reason: DeadLetterReason::Permanent { .. }
            }
        ));
    }

    #[tokio::test]
    async fn exhausted_delivery_is_dead_lettered_without_processing() {
        let h = harness(RetryPolicy::exponential(2, Duration::from_secs(1), Duration::from_secs(5)));
        submit(&h, "j1").await;

        let vt = WorkerOptions::default().visibility_timeout;
        // Two silent lease expiries push the attempt to the ceiling.
        for _ in 0..2 {
            let lease = h.queue.lease(vt, Duration::ZERO).await.unwrap().unwrap();
            drop(lease);
            h.clock.advance(vt + Duration::from_millis(1));
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let processor = Arc::new(FnProcessor::new(move |_job: Job, input: Bytes| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, ProcessError>(Artifact::new(ObjectKey::parse("out/j1").unwrap(), input)) }
        }));

        let outcome = h.pool.worker(processor).run_once().await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::DeadLettered {
                reason: DeadLetterReason::PoisonPill {
                    attempts: 2,
                    last_error: None
                }
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn processing_timeout_is_transient() {
        let h = harness_with(
            RetryPolicy::exponential(3, Duration::from_secs(1), Duration::from_secs(5)),
            WorkerOptions {
                lease_wait: Duration::ZERO,
                processing_timeout: Some(Duration::from_millis(20)),
                ..WorkerOptions::default()
            },
        );
        submit(&h, "slow").await;

        let processor = Arc::new(FnProcessor::new(|_job: Job, input: Bytes| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProcessError>(Artifact::new(ObjectKey::parse("out/slow").unwrap(), input))
        }));

        let outcome = h.pool.worker(processor).run_once().await.unwrap().unwrap();
        assert_eq!(
            outcome,
            Outcome::RetryScheduled {
                delay: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test]
    async fn start_rejects_zero_concurrency_and_double_start() {
        let h = harness(RetryPolicy::default());
        assert!(matches!(
            h.pool.start(0, copy_processor()),
            Err(WorkerError::InvalidConcurrency)
        ));

        h.pool.start(1, copy_processor()).unwrap();
        assert!(h.pool.is_accepting());
        assert!(matches!(
            h.pool.start(1, copy_processor()),
            Err(WorkerError::AlreadyRunning)
        ));

        let report = h.pool.stop(Duration::from_secs(1)).await;
        assert!(report.abandoned.is_empty());
        assert!(!h.pool.is_accepting());
    }

    #[tokio::test]
    async fn stop_without_start_is_empty() {
        let h = harness(RetryPolicy::default());
        assert_eq!(h.pool.stop(Duration::from_millis(10)).await, DrainReport::default());
    }

    #[tokio::test]
    async fn stats_track_outcomes() {
        let h = harness(RetryPolicy::default());
        submit(&h, "s1").await;
        let worker = h.pool.worker(copy_processor());
        worker.run_once().await.unwrap();

        let stats = h.pool.stats();
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.in_flight, 0);
    }
}
