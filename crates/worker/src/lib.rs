//! Worker process for the asset pipeline: backend wiring, health endpoints and
//! the bundled processors.

pub mod app;
pub mod health;
pub mod processors;

pub use app::App;
