//! Periodic ledger retention sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::ledger::{IdempotencyLedger, LedgerError};

#[derive(Clone)]
pub struct LedgerSweeper {
    ledger: Arc<dyn IdempotencyLedger>,
    retention: Duration,
    interval: Duration,
}

impl core::fmt::Debug for LedgerSweeper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LedgerSweeper")
            .field("retention", &self.retention)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    /// Request shutdown and wait for the task to exit.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}

impl LedgerSweeper {
    pub fn new(ledger: Arc<dyn IdempotencyLedger>, retention: Duration, interval: Duration) -> Self {
        Self {
            ledger,
            retention,
            interval,
        }
    }

    pub async fn sweep_once(&self) -> Result<usize, LedgerError> {
        let removed = self.ledger.purge_expired(self.retention).await?;
        if removed > 0 {
            tracing::info!(removed, "purged expired ledger entries");
        }
        Ok(removed)
    }

    /// Sweep every `interval` until shut down. The first sweep runs one
    /// interval after spawning.
    pub fn spawn(self) -> SweeperHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = shutdown.clone();

        let join = tokio::spawn(async move {
            let period = self.interval.max(Duration::from_millis(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = signal.notified() => {
                        tracing::debug!("ledger sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::error!(error = %e, "ledger sweep failed");
                        }
                    }
                }
            }
        });

        SweeperHandle { shutdown, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use assetflow_core::{JobId, ManualClock, ObjectKey};

    #[tokio::test]
    async fn sweep_once_purges_old_entries() {
        let clock = ManualClock::starting_now();
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.shared()));
        ledger
            .record_completion(&JobId::parse("old").unwrap(), &ObjectKey::parse("out/old").unwrap())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let sweeper = LedgerSweeper::new(ledger.clone(), Duration::from_secs(60), Duration::from_secs(1));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_runs_until_shutdown() {
        let clock = ManualClock::starting_now();
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.shared()));
        ledger
            .record_completion(&JobId::parse("old").unwrap(), &ObjectKey::parse("out/old").unwrap())
            .await
            .unwrap();
        clock.advance(Duration::from_secs(120));

        let handle = LedgerSweeper::new(ledger.clone(), Duration::from_secs(60), Duration::from_secs(10)).spawn();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(ledger.is_empty());

        handle.shutdown().await;
    }
}
