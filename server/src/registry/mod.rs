//! Model registry module
//!
//! Thin client for the model-management service plus the HTTP routes that
//! proxy uploads, listing, deletion and inference to it.

mod client;
pub mod routes;
mod types;

pub use client::ModelRegistryClient;
pub use routes::{RegistryAppState, registry_routes};
pub use types::{ModelUpload, RegistryError};
