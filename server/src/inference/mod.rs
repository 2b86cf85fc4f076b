//! Inference module: GeoTIFF to class-overlay PNG
//!
//! This module provides:
//! - Chunk-wise multi-band TIFF reading and bilinear resampling
//! - `InferenceService` trait and the remote HTTP prediction client
//! - Class-mask extraction, percentile-stretch rendering and overlay compositing
//! - HTTP route for `/predict_and_show`

mod client;
mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod raster;
pub mod render;
pub mod routes;
mod types;

pub use client::{InferenceService, RemoteInferenceClient};
pub use pipeline::PredictionPipeline;
pub use routes::{PredictAppState, inference_routes};
pub use types::{ClassMask, InferenceError, OverlayStyle, Raster};
