//! Pipeline configuration.
//!
//! Built once at startup (usually from `ASSETFLOW_*` environment variables)
//! and passed into constructors. Durations are read as milliseconds.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidVar { var: &'static str, reason: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Redis URL; the in-memory queue is used when unset.
    pub url: Option<String>,
    pub prefix: String,
    pub visibility_timeout: Duration,
    /// How long a single `lease` call may wait for work.
    pub lease_wait: Duration,
    /// Enqueue-order delivery (in-memory backend only).
    pub fifo: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            url: None,
            prefix: "assetflow:queue".to_string(),
            visibility_timeout: Duration::from_secs(30),
            lease_wait: Duration::from_secs(1),
            fifo: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub drain_timeout: Duration,
    /// Exceeding this is a transient failure.
    pub processing_timeout: Option<Duration>,
    /// Lease extension period while a job is processing.
    pub heartbeat_interval: Option<Duration>,
    pub health_addr: SocketAddr,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            drain_timeout: Duration::from_secs(10),
            processing_timeout: None,
            heartbeat_interval: None,
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Postgres URL; the in-memory ledger is used when unset.
    pub database_url: Option<String>,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            retention: Duration::from_secs(7 * 24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    pub retry: RetryPolicy,
    pub ledger: LedgerSettings,
    pub storage: StorageSettings,
}

impl PipelineConfig {
    /// Load from `ASSETFLOW_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let mut cfg = Self::default();

        cfg.queue.url = env.string("ASSETFLOW_QUEUE_URL");
        if let Some(prefix) = env.string("ASSETFLOW_QUEUE_PREFIX") {
            cfg.queue.prefix = prefix;
        }
        env.millis("ASSETFLOW_VISIBILITY_TIMEOUT_MS", &mut cfg.queue.visibility_timeout)?;
        env.millis("ASSETFLOW_LEASE_WAIT_MS", &mut cfg.queue.lease_wait)?;
        env.parsed("ASSETFLOW_QUEUE_FIFO", &mut cfg.queue.fifo)?;

        env.parsed("ASSETFLOW_CONCURRENCY", &mut cfg.worker.concurrency)?;
        env.millis("ASSETFLOW_DRAIN_TIMEOUT_MS", &mut cfg.worker.drain_timeout)?;
        cfg.worker.processing_timeout = env.optional_millis("ASSETFLOW_PROCESSING_TIMEOUT_MS")?;
        cfg.worker.heartbeat_interval = env.optional_millis("ASSETFLOW_HEARTBEAT_MS")?;
        env.parsed("ASSETFLOW_HEALTH_ADDR", &mut cfg.worker.health_addr)?;

        env.parsed("ASSETFLOW_MAX_ATTEMPTS", &mut cfg.retry.max_attempts)?;
        env.millis("ASSETFLOW_BACKOFF_BASE_MS", &mut cfg.retry.base_delay)?;
        env.millis("ASSETFLOW_BACKOFF_MAX_MS", &mut cfg.retry.max_delay)?;
        env.parsed("ASSETFLOW_BACKOFF_JITTER", &mut cfg.retry.jitter)?;

        cfg.ledger.database_url = env.string("ASSETFLOW_DATABASE_URL");
        env.millis("ASSETFLOW_LEDGER_RETENTION_MS", &mut cfg.ledger.retention)?;
        env.millis("ASSETFLOW_LEDGER_SWEEP_MS", &mut cfg.ledger.sweep_interval)?;

        if let Some(root) = env.string("ASSETFLOW_STORAGE_ROOT") {
            cfg.storage.root = PathBuf::from(root);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.queue.visibility_timeout.is_zero() {
            return Err(ConfigError::Invalid("visibility timeout must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(format!(
                "backoff base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid("jitter must be within 0.0..=1.0".into()));
        }
        if let Some(timeout) = self.worker.processing_timeout {
            if timeout >= self.queue.visibility_timeout {
                return Err(ConfigError::Invalid(format!(
                    "processing timeout {timeout:?} must be below the visibility timeout {:?}",
                    self.queue.visibility_timeout
                )));
            }
        }
        if self.worker.heartbeat_interval.is_some_and(|h| h.is_zero()) {
            return Err(ConfigError::Invalid("heartbeat interval must be positive".into()));
        }
        if self.ledger.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("ledger sweep interval must be positive".into()));
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &'static str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, var: &'static str, target: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        if let Some(raw) = self.string(var) {
            *target = raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
                var,
                reason: format!("{raw:?}: {e}"),
            })?;
        }
        Ok(())
    }

    fn millis(&self, var: &'static str, target: &mut Duration) -> Result<(), ConfigError> {
        if let Some(d) = self.optional_millis(var)? {
            *target = d;
        }
        Ok(())
    }

    fn optional_millis(&self, var: &'static str) -> Result<Option<Duration>, ConfigError> {
        self.string(var)
            .map(|raw| {
                raw.parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| ConfigError::InvalidVar {
                        var,
                        reason: format!("{raw:?}: {e}"),
                    })
            })
            .transpose()
    }
}
