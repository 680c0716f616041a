//! Worker process wiring: backend selection, pool lifecycle, health server.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tracing::info;

use assetflow_infra::ledger::{IdempotencyLedger, InMemoryLedger, PostgresLedger};
use assetflow_infra::queue::{InMemoryJobQueue, JobQueue, RedisJobQueue};
use assetflow_infra::storage::{ObjectStore, ObjectStoreBackend};
use assetflow_infra::workers::{DrainReport, LedgerSweeper, Processor, WorkerOptions, WorkerPool};
use assetflow_infra::{PipelineConfig, Producer};

use crate::health::{self, HealthState};
use crate::processors::CopyProcessor;

pub struct App {
    config: PipelineConfig,
    queue: Arc<dyn JobQueue>,
    ledger: Arc<dyn IdempotencyLedger>,
    store: Arc<dyn ObjectStore>,
    pool: Arc<WorkerPool>,
    processor: Arc<dyn Processor>,
}

impl App {
    /// Select backends from the configuration:
    /// Redis queue when a queue URL is set, Postgres ledger when a database
    /// URL is set, in-memory otherwise; filesystem object store at the
    /// storage root.
    pub async fn build(config: PipelineConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let queue: Arc<dyn JobQueue> = match &config.queue.url {
            Some(url) => {
                info!(prefix = %config.queue.prefix, "using redis job queue");
                Arc::new(
                    RedisJobQueue::connect(url, Some(config.queue.prefix.clone()))
                        .await
                        .context("connecting to redis job queue")?,
                )
            }
            None => {
                info!(fifo = config.queue.fifo, "using in-memory job queue");
                Arc::new(InMemoryJobQueue::new().fifo(config.queue.fifo))
            }
        };

        let ledger: Arc<dyn IdempotencyLedger> = match &config.ledger.database_url {
            Some(url) => {
                info!("using postgres idempotency ledger");
                Arc::new(
                    PostgresLedger::connect(url)
                        .await
                        .context("connecting to postgres ledger")?,
                )
            }
            None => {
                info!("using in-memory idempotency ledger");
                Arc::new(InMemoryLedger::new())
            }
        };

        let store: Arc<dyn ObjectStore> = Arc::new(
            ObjectStoreBackend::local(&config.storage.root)
                .with_context(|| format!("opening object store at {}", config.storage.root.display()))?,
        );

        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            ledger.clone(),
            store.clone(),
            config.retry.clone(),
            WorkerOptions::from_config(&config),
        ));

        Ok(Self {
            config,
            queue,
            ledger,
            store,
            pool,
            processor: Arc::new(CopyProcessor),
        })
    }

    /// Replace the default copy processor.
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = processor;
        self
    }

    pub fn producer(&self) -> Producer {
        Producer::new(self.queue.clone(), self.store.clone())
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn ledger(&self) -> &Arc<dyn IdempotencyLedger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn router(&self) -> Router {
        health::router(HealthState {
            pool: self.pool.clone(),
            queue: self.queue.clone(),
        })
    }

    /// Run until `shutdown` resolves, then drain the pool.
    ///
    /// The health server keeps answering during the drain so `/readyz` can
    /// report 503 while in-flight jobs finish.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<DrainReport>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = tokio::net::TcpListener::bind(self.config.worker.health_addr)
            .await
            .with_context(|| format!("binding health endpoint {}", self.config.worker.health_addr))?;
        info!(addr = %listener.local_addr()?, "health endpoint listening");

        let (stop_http, http_stopped) = tokio::sync::oneshot::channel::<()>();
        let router = self.router();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = http_stopped.await;
                })
                .await
        });

        self.pool
            .start(self.config.worker.concurrency, self.processor.clone())?;
        let sweeper = LedgerSweeper::new(
            self.ledger.clone(),
            self.config.ledger.retention,
            self.config.ledger.sweep_interval,
        )
        .spawn();

        shutdown.await;
        info!("shutdown requested, draining worker pool");

        let report = self.pool.stop(self.config.worker.drain_timeout).await;
        sweeper.shutdown().await;

        let _ = stop_http.send(());
        server
            .await
            .context("health server task failed")?
            .context("health server error")?;

        Ok(report)
    }
}
