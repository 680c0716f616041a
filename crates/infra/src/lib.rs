//! Infrastructure layer: queue, ledger and object store backends, the worker
//! pool that ties them together, and configuration.

pub mod config;
pub mod jobs;
pub mod ledger;
pub mod producer;
pub mod queue;
pub mod storage;
pub mod workers;

pub use config::{ConfigError, PipelineConfig};
pub use producer::{Producer, ProducerError};
