//! Export bridge: submit an export job and wait for it to settle

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use metrics::counter;
use tracing::{error, info};

use crate::config::ImageryConfig;

use super::region::Region;
use super::service::ImageryService;
use super::types::{ExportOutcome, ExportRequest, Scene};

/// Generate a timestamped export name, e.g. `sentinel2_20240612_101559.tif`
pub fn generate_filename(prefix: &str, ext: &str) -> String {
    format!("{}_{}.{}", prefix, Local::now().format("%Y%m%d_%H%M%S"), ext)
}

/// Submits exports and polls them to a terminal state
pub struct ExportBridge {
    service: Arc<dyn ImageryService>,
    folder: Option<String>,
    scale: f64,
    max_pixels: f64,
    poll_interval: Duration,
}

impl ExportBridge {
    pub fn new(service: Arc<dyn ImageryService>, config: &ImageryConfig) -> Self {
        Self {
            service,
            folder: config.export_folder.clone(),
            scale: config.export_scale,
            max_pixels: config.max_pixels,
            poll_interval: config.poll_interval,
        }
    }

    /// The catalog this bridge exports from
    pub fn service(&self) -> &Arc<dyn ImageryService> {
        &self.service
    }

    /// Export `scene` clipped to `region` into the shared folder and wait for
    /// the job to leave the active states.
    ///
    /// Returns `None` if submitting or polling failed; the failure is logged.
    /// A job that ended in any state but `COMPLETED` is still returned so the
    /// caller can inspect it.
    pub async fn export_to_drive(
        &self,
        scene: Scene,
        region: Region,
        filename: &str,
    ) -> Option<ExportOutcome> {
        let file_prefix = filename.strip_suffix(".tif").unwrap_or(filename).to_string();
        let request = ExportRequest {
            scene,
            region,
            file_prefix,
            folder: self.folder.clone(),
            scale: self.scale,
            max_pixels: self.max_pixels,
        };

        info!(
            "Starting export of {} to shared folder {:?}",
            filename, self.folder
        );

        let job = match self.service.start_export(&request).await {
            Ok(job) => job,
            Err(e) => {
                error!("Failed to export image '{}' to Drive: {}", filename, e);
                counter!("landcover_exports_total", "outcome" => "error").increment(1);
                return None;
            }
        };

        let status = loop {
            match self.service.job_status(&job).await {
                Ok(status) if status.state.is_active() => {
                    info!("Export {} still {}", job.name, status.state);
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(status) => break status,
                Err(e) => {
                    error!("Failed to poll export {}: {}", job.name, e);
                    counter!("landcover_exports_total", "outcome" => "error").increment(1);
                    return None;
                }
            }
        };

        let outcome = ExportOutcome { job, status };
        if outcome.succeeded() {
            info!("Export '{}' completed successfully", filename);
            counter!("landcover_exports_total", "outcome" => "completed").increment(1);
        } else {
            error!(
                "Export '{}' failed. Status: {} {}",
                filename,
                outcome.status.state,
                outcome.status.error_message.as_deref().unwrap_or("")
            );
            counter!("landcover_exports_total", "outcome" => "failed").increment(1);
        }

        Some(outcome)
    }
}
