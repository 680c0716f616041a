//! `assetflow-core`: pipeline foundation building blocks.
//!
//! This crate contains **pure** primitives shared by every pipeline component
//! (identifiers, object keys, the domain error and the clock abstraction).
//! No I/O lives here.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{add_duration, Clock, ManualClock, SharedClock, SystemClock};
pub use error::DomainError;
pub use id::{DeliveryToken, JobId, ObjectKey};
