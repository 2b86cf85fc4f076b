//! Imagery module: scene selection, export jobs and shared-drive downloads
//!
//! This module provides:
//! - `Region` for validating user-drawn polygons
//! - `ImageryService` trait and its Earth Engine REST implementation
//! - `ExportBridge` for submitting and polling export jobs
//! - `DriveClient` for resolving share links and streaming downloads
//! - HTTP routes for `/export_tif` and `/download_tif_from_drive`

pub mod drive;
mod earth_engine;
mod export;
pub mod region;
pub mod routes;
mod service;
mod types;

pub use drive::{DriveClient, get_drive_file_id};
pub use earth_engine::EarthEngineService;
pub use export::{ExportBridge, generate_filename};
pub use region::{PolygonCoords, Region};
pub use routes::{ImageryAppState, imagery_routes};
pub use service::ImageryService;
pub use types::{ExportJob, ExportOutcome, ExportRequest, ImageryError, JobState, JobStatus, Scene};
