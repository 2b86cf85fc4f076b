//! ImageryService trait definition

use async_trait::async_trait;

use super::region::Region;
use super::types::{ExportJob, ExportRequest, ImageryError, JobStatus, Scene};

/// Trait for imagery catalogs that can also run export jobs
#[async_trait]
pub trait ImageryService: Send + Sync {
    /// Find the least-cloudy scene intersecting `region` during `year`
    async fn least_cloudy_scene(&self, region: &Region, year: i32) -> Result<Scene, ImageryError>;

    /// Submit an export job and return its handle without waiting
    async fn start_export(&self, request: &ExportRequest) -> Result<ExportJob, ImageryError>;

    /// Fetch the current status of a submitted job
    async fn job_status(&self, job: &ExportJob) -> Result<JobStatus, ImageryError>;
}
