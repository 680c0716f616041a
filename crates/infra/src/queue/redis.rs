//! Redis-backed job queue (feature `redis`).
//!
//! Visibility scheduling with sorted sets; every state transition is a Lua
//! script so lease ownership checks and moves are atomic.
//!
//! ## Keys (under a configurable prefix, default `assetflow:queue`)
//!
//! - `{prefix}:jobs`: HASH id → job JSON as enqueued
//! - `{prefix}:attempts`: HASH id → current attempt
//! - `{prefix}:ready`: ZSET id scored by visible-at (ms)
//! - `{prefix}:leases`: ZSET id scored by lease expiry (ms)
//! - `{prefix}:tokens`: HASH id → delivery token of the live lease
//! - `{prefix}:dlq`: LIST of dead-lettered ids, oldest first
//! - `{prefix}:dlq:jobs` / `{prefix}:dlq:meta`: HASH id → job JSON / record metadata
//!
//! Timestamps come from the injected clock, not the Redis server clock, so all
//! workers sharing a queue should run with synchronized clocks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use assetflow_core::{add_duration, DeliveryToken, JobId, SharedClock, SystemClock};

use super::{DeliveryHandle, JobQueue, Lease, QueueError, QueueStats, Resolution};
use crate::jobs::{DeadLetterRecord, Job};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "assetflow:queue";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 or redis.call('HEXISTS', KEYS[4], ARGV[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[4])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
return 1
"#;

// KEYS: jobs, attempts, ready, leases, tokens
// ARGV: now, expires_at, token
const LEASE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[4], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[4], id)
  redis.call('HDEL', KEYS[5], id)
  redis.call('HINCRBY', KEYS[2], id, 1)
  redis.call('ZADD', KEYS[3], ARGV[1], id)
end
local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
  return false
end
local id = due[1]
redis.call('ZREM', KEYS[3], id)
redis.call('ZADD', KEYS[4], ARGV[2], id)
redis.call('HSET', KEYS[5], id, ARGV[3])
local attempt = redis.call('HGET', KEYS[2], id) or '0'
return {id, redis.call('HGET', KEYS[1], id), attempt}
"#;

// Shared ownership check: live token and unexpired lease.
// KEYS: ..., leases, tokens ; ARGV: id, token, now
const OWNS_LEASE: &str = r#"
local function owns(leases, tokens, id, token, now)
  if redis.call('HGET', tokens, id) ~= token then
    return false
  end
  local expires = redis.call('ZSCORE', leases, id)
  return expires ~= false and tonumber(expires) > tonumber(now)
end
"#;

// KEYS: jobs, attempts, leases, tokens ; ARGV: id, token, now
const ACK_BODY: &str = r#"
if not owns(KEYS[3], KEYS[4], ARGV[1], ARGV[2], ARGV[3]) then
  return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return 1
"#;

// KEYS: attempts, ready, leases, tokens ; ARGV: id, token, now, visible_at
const NACK_BODY: &str = r#"
if not owns(KEYS[3], KEYS[4], ARGV[1], ARGV[2], ARGV[3]) then
  return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HINCRBY', KEYS[1], ARGV[1], 1)
redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
return 1
"#;

// KEYS: leases, tokens ; ARGV: id, token, now, expires_at
const EXTEND_BODY: &str = r#"
if not owns(KEYS[1], KEYS[2], ARGV[1], ARGV[2], ARGV[3]) then
  return 0
end
redis.call('ZADD', KEYS[1], 'XX', ARGV[4], ARGV[1])
return 1
"#;

// KEYS: jobs, attempts, leases, tokens, dlq, dlq_jobs, dlq_meta
// ARGV: id, token, now, meta
const DEAD_LETTER_BODY: &str = r#"
if not owns(KEYS[3], KEYS[4], ARGV[1], ARGV[2], ARGV[3]) then
  return 0
end
local job = redis.call('HGET', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HDEL', KEYS[4], ARGV[1])
redis.call('HDEL', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[6], ARGV[1], job)
redis.call('HSET', KEYS[7], ARGV[1], ARGV[4])
redis.call('RPUSH', KEYS[5], ARGV[1])
return 1
"#;

// KEYS: jobs, attempts, ready, dlq, dlq_jobs, dlq_meta ; ARGV: id, now
// Returns {code, job}: 0 = not found, 1 = replayed, 2 = id already queued.
const REPLAY_SCRIPT: &str = r#"
local job = redis.call('HGET', KEYS[5], ARGV[1])
if not job then
  return {0, ''}
end
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 then
  return {2, ''}
end
redis.call('LREM', KEYS[4], 0, ARGV[1])
redis.call('HDEL', KEYS[5], ARGV[1])
redis.call('HDEL', KEYS[6], ARGV[1])
redis.call('HSET', KEYS[1], ARGV[1], job)
redis.call('HSET', KEYS[2], ARGV[1], 0)
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
return {1, job}
"#;

/// Dead-letter metadata stored next to the job JSON.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeadLetterMeta {
    last_error: String,
    attempt: u32,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Keys {
    jobs: String,
    attempts: String,
    ready: String,
    leases: String,
    tokens: String,
    dlq: String,
    dlq_jobs: String,
    dlq_meta: String,
}

impl Keys {
    fn new(prefix: &str) -> Self {
        Self {
            jobs: format!("{prefix}:jobs"),
            attempts: format!("{prefix}:attempts"),
            ready: format!("{prefix}:ready"),
            leases: format!("{prefix}:leases"),
            tokens: format!("{prefix}:tokens"),
            dlq: format!("{prefix}:dlq"),
            dlq_jobs: format!("{prefix}:dlq:jobs"),
            dlq_meta: format!("{prefix}:dlq:meta"),
        }
    }
}

#[derive(Debug, Clone)]
struct Scripts {
    enqueue: Script,
    lease: Script,
    ack: Script,
    nack: Script,
    extend: Script,
    dead_letter: Script,
    replay: Script,
}

impl Scripts {
    fn load() -> Self {
        let with_owns = |body: &str| Script::new(&format!("{OWNS_LEASE}{body}"));
        Self {
            enqueue: Script::new(ENQUEUE_SCRIPT),
            lease: Script::new(LEASE_SCRIPT),
            ack: with_owns(ACK_BODY),
            nack: with_owns(NACK_BODY),
            extend: with_owns(EXTEND_BODY),
            dead_letter: with_owns(DEAD_LETTER_BODY),
            replay: Script::new(REPLAY_SCRIPT),
        }
    }
}

/// Redis-backed [`JobQueue`].
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    keys: Keys,
    scripts: Scripts,
    clock: SharedClock,
    poll_interval: Duration,
}

impl core::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("keys", &self.keys)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

fn map_redis_error(context: &str, err: redis::RedisError) -> QueueError {
    tracing::error!(error = %err, "{context} failed");
    QueueError::Unavailable(format!("{context}: {err}"))
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

impl RedisJobQueue {
    /// Connect to Redis.
    ///
    /// * `redis_url` - e.g. "redis://localhost:6379"
    /// * `prefix` - key prefix (default: "assetflow:queue")
    pub async fn connect(redis_url: impl AsRef<str>, prefix: Option<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| map_redis_error("open redis client", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("connect", e))?;

        let prefix = prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        Ok(Self {
            conn,
            keys: Keys::new(&prefix),
            scripts: Scripts::load(),
            clock: SystemClock::shared(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    async fn try_lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let now = self.clock.now();
        let expires_at = add_duration(now, visibility_timeout);
        let token = DeliveryToken::new();

        let mut conn = self.conn.clone();
        let leased: Option<(String, String, u32)> = self
            .scripts
            .lease
            .key(&self.keys.jobs)
            .key(&self.keys.attempts)
            .key(&self.keys.ready)
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .arg(millis(now))
            .arg(millis(expires_at))
            .arg(token.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("lease", e))?;

        let Some((_id, raw, attempt)) = leased else {
            return Ok(None);
        };

        let mut job = Job::from_wire(&raw).map_err(|e| QueueError::Serialization(e.to_string()))?;
        job.attempt = attempt;
        let handle = DeliveryHandle::new(job.id.clone(), token, attempt, expires_at);
        tracing::debug!(job_id = %job.id, attempt, "leased job");
        Ok(Some(Lease { job, handle }))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let raw = job.to_wire().map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        let inserted: i64 = self
            .scripts
            .enqueue
            .key(&self.keys.jobs)
            .key(&self.keys.attempts)
            .key(&self.keys.ready)
            .key(&self.keys.dlq_jobs)
            .arg(job.id.as_str())
            .arg(raw)
            .arg(millis(self.clock.now()))
            .arg(job.attempt)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("enqueue", e))?;

        if inserted == 0 {
            return Err(QueueError::AlreadyExists(job.id));
        }
        Ok(job.id)
    }

    async fn lease(
        &self,
        visibility_timeout: Duration,
        wait: Duration,
    ) -> Result<Option<Lease>, QueueError> {
        let start = tokio::time::Instant::now();
        loop {
            if let Some(lease) = self.try_lease(visibility_timeout).await? {
                return Ok(Some(lease));
            }
            let elapsed = start.elapsed();
            if elapsed >= wait {
                return Ok(None);
            }
            tokio::time::sleep((wait - elapsed).min(self.poll_interval)).await;
        }
    }

    #[instrument(skip(self, handle), fields(job_id = %handle.job_id()), err)]
    async fn ack(&self, handle: &DeliveryHandle) -> Result<Resolution, QueueError> {
        let mut conn = self.conn.clone();
        let applied: i64 = self
            .scripts
            .ack
            .key(&self.keys.jobs)
            .key(&self.keys.attempts)
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .arg(handle.job_id().as_str())
            .arg(handle.token().to_string())
            .arg(millis(self.clock.now()))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("ack", e))?;

        Ok(resolution(applied))
    }

    #[instrument(skip(self, handle), fields(job_id = %handle.job_id()), err)]
    async fn nack(&self, handle: &DeliveryHandle, delay: Duration) -> Result<Resolution, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn.clone();
        let applied: i64 = self
            .scripts
            .nack
            .key(&self.keys.attempts)
            .key(&self.keys.ready)
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .arg(handle.job_id().as_str())
            .arg(handle.token().to_string())
            .arg(millis(now))
            .arg(millis(add_duration(now, delay)))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("nack", e))?;

        Ok(resolution(applied))
    }

    #[instrument(skip(self, handle), fields(job_id = %handle.job_id()), err)]
    async fn extend(
        &self,
        handle: &DeliveryHandle,
        visibility_timeout: Duration,
    ) -> Result<Resolution, QueueError> {
        let now = self.clock.now();
        let mut conn = self.conn.clone();
        let applied: i64 = self
            .scripts
            .extend
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .arg(handle.job_id().as_str())
            .arg(handle.token().to_string())
            .arg(millis(now))
            .arg(millis(add_duration(now, visibility_timeout)))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("extend", e))?;

        Ok(resolution(applied))
    }

    #[instrument(skip(self, handle), fields(job_id = %handle.job_id()), err)]
    async fn dead_letter(&self, handle: &DeliveryHandle, reason: &str) -> Result<Resolution, QueueError> {
        let now = self.clock.now();
        let meta = DeadLetterMeta {
            last_error: reason.to_string(),
            attempt: handle.attempt(),
            timestamp: now,
        };
        let meta = serde_json::to_string(&meta).map_err(|e| QueueError::Serialization(e.to_string()))?;

        let mut conn = self.conn.clone();
        let applied: i64 = self
            .scripts
            .dead_letter
            .key(&self.keys.jobs)
            .key(&self.keys.attempts)
            .key(&self.keys.leases)
            .key(&self.keys.tokens)
            .key(&self.keys.dlq)
            .key(&self.keys.dlq_jobs)
            .key(&self.keys.dlq_meta)
            .arg(handle.job_id().as_str())
            .arg(handle.token().to_string())
            .arg(millis(now))
            .arg(meta)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("dead_letter", e))?;

        if applied == 1 {
            tracing::warn!(attempt = handle.attempt(), reason, "dead-lettered job");
        }
        Ok(resolution(applied))
    }

    #[instrument(skip(self), err)]
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetterRecord>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.keys.dlq)
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("LRANGE dlq", e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (jobs, metas): (Vec<Option<String>>, Vec<Option<String>>) = redis::pipe()
            .cmd("HMGET")
            .arg(&self.keys.dlq_jobs)
            .arg(&ids)
            .cmd("HMGET")
            .arg(&self.keys.dlq_meta)
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("HMGET dlq", e))?;

        let mut records = Vec::with_capacity(ids.len());
        for (raw_job, raw_meta) in jobs.into_iter().zip(metas) {
            // Replayed concurrently between LRANGE and HMGET.
            let (Some(raw_job), Some(raw_meta)) = (raw_job, raw_meta) else {
                continue;
            };
            let mut job = Job::from_wire(&raw_job).map_err(|e| QueueError::Serialization(e.to_string()))?;
            let meta: DeadLetterMeta =
                serde_json::from_str(&raw_meta).map_err(|e| QueueError::Serialization(e.to_string()))?;
            job.attempt = meta.attempt;
            records.push(DeadLetterRecord::new(job, meta.last_error, meta.timestamp));
        }
        Ok(records)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn replay_dead_letter(&self, job_id: &JobId) -> Result<Job, QueueError> {
        let mut conn = self.conn.clone();
        let (code, raw): (i64, String) = self
            .scripts
            .replay
            .key(&self.keys.jobs)
            .key(&self.keys.attempts)
            .key(&self.keys.ready)
            .key(&self.keys.dlq)
            .key(&self.keys.dlq_jobs)
            .key(&self.keys.dlq_meta)
            .arg(job_id.as_str())
            .arg(millis(self.clock.now()))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("replay", e))?;

        match code {
            1 => {
                let mut job = Job::from_wire(&raw).map_err(|e| QueueError::Serialization(e.to_string()))?;
                job.attempt = 0;
                tracing::info!("replayed dead-lettered job");
                Ok(job)
            }
            2 => Err(QueueError::AlreadyExists(job_id.clone())),
            _ => Err(QueueError::NotFound(job_id.clone())),
        }
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = millis(self.clock.now());
        let mut conn = self.conn.clone();
        let (ready, delayed, in_flight, dead_lettered): (usize, usize, usize, usize) = redis::pipe()
            .cmd("ZCOUNT")
            .arg(&self.keys.ready)
            .arg("-inf")
            .arg(now)
            .cmd("ZCOUNT")
            .arg(&self.keys.ready)
            .arg(format!("({now}"))
            .arg("+inf")
            .cmd("ZCARD")
            .arg(&self.keys.leases)
            .cmd("LLEN")
            .arg(&self.keys.dlq)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("stats", e))?;

        Ok(QueueStats {
            ready,
            delayed,
            in_flight,
            dead_lettered,
        })
    }
}

fn resolution(applied: i64) -> Resolution {
    if applied == 1 {
        Resolution::Applied
    } else {
        Resolution::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetflow_core::{ManualClock, ObjectKey};

    const VT: Duration = Duration::from_secs(30);

    async fn queue(clock: &ManualClock) -> RedisJobQueue {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let prefix = format!("assetflow:test:{}", uuid::Uuid::now_v7());
        RedisJobQueue::connect(url, Some(prefix))
            .await
            .expect("redis must be running for this test")
            .with_clock(clock.shared())
    }

    fn job(id: &str) -> Job {
        Job::new(ObjectKey::parse(format!("in/{id}.png")).unwrap(), serde_json::json!({"w": 1}))
            .with_id(JobId::parse(id).unwrap())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn lease_ack_and_expiry_round_trip() {
        let clock = ManualClock::starting_now();
        let queue = queue(&clock).await;
        queue.enqueue(job("a1")).await.unwrap();

        let first = queue.lease(VT, Duration::ZERO).await.unwrap().unwrap();
        assert!(queue.lease(VT, Duration::ZERO).await.unwrap().is_none());

        clock.advance(VT + Duration::from_millis(1));
        let second = queue.lease(VT, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.job.attempt, 1);
        assert_eq!(queue.ack(&first.handle).await.unwrap(), Resolution::Stale);
        assert_eq!(queue.ack(&second.handle).await.unwrap(), Resolution::Applied);
        assert_eq!(queue.stats().await.unwrap().pending(), 0);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis (REDIS_URL)"]
    async fn nack_then_dead_letter_then_replay() {
        let clock = ManualClock::starting_now();
        let queue = queue(&clock).await;
        queue.enqueue(job("b2")).await.unwrap();

        let lease = queue.lease(VT, Duration::ZERO).await.unwrap().unwrap();
        queue.nack(&lease.handle, Duration::from_secs(2)).await.unwrap();
        assert_eq!(queue.stats().await.unwrap().delayed, 1);

        clock.advance(Duration::from_secs(2));
        let lease = queue.lease(VT, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(lease.job.attempt, 1);
        queue.dead_letter(&lease.handle, "permanent failure: bad").await.unwrap();

        let records = queue.dead_letters(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attempt, 1);

        let replayed = queue.replay_dead_letter(&records[0].job_id).await.unwrap();
        assert_eq!(replayed.attempt, 0);
        let lease = queue.lease(VT, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(lease.job.attempt, 0);
    }
}
