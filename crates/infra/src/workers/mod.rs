//! Background execution: the worker pool, the processor seam and the ledger
//! retention sweeper.

pub mod pool;
pub mod processor;
pub mod sweeper;

pub use pool::{DrainReport, Outcome, PoolStats, Readiness, Worker, WorkerError, WorkerOptions, WorkerPool};
pub use processor::{Artifact, FnProcessor, Processor};
pub use sweeper::{LedgerSweeper, SweeperHandle};
