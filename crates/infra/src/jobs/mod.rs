//! Job model and failure policy.
//!
//! ## Design
//!
//! - Jobs reference an object in the object store and carry an opaque payload
//! - `attempt` counts previous deliveries; the id never changes
//! - Retry policy with exponential backoff, capped, with jitter
//! - Dead-letter after a permanent error or once the attempt ceiling is hit
//!
//! ## Components
//!
//! - `Job`: wire message referencing an input object
//! - `RetryPolicy`: maps (attempt, error class) to retry-or-dead-letter
//! - `LedgerEntry` / `DeadLetterRecord`: terminal records

pub mod policy;
pub mod types;

pub use policy::{BackoffStrategy, DeadLetterReason, Decision, RetryPolicy};
pub use types::{DeadLetterRecord, Job, JobPayload, LedgerEntry, ProcessError};
