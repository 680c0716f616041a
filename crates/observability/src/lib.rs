//! Log setup for the pipeline binaries.
//!
//! Everything in the workspace logs through `tracing`; binaries call [`init`]
//! once at startup to pick the output format from `ASSETFLOW_LOG_FORMAT`.

pub mod tracing;

pub use tracing::{init, init_with, LogFormat};
