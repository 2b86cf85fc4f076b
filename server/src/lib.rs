//! Land-cover overlay server library
//!
//! This module exports the server components for use in integration tests
//! and external tooling.

pub mod config;
pub mod imagery;
pub mod inference;
pub mod registry;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use imagery::{ImageryAppState, imagery_routes};
pub use inference::{PredictAppState, inference_routes};
pub use registry::{RegistryAppState, registry_routes};
