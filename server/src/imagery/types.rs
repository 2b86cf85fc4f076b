//! Imagery-related types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::region::Region;

/// Errors that can occur when querying or exporting imagery
#[derive(Debug, Error)]
pub enum ImageryError {
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("No Sentinel-2 image found for given ROI/date")]
    NoSceneFound,

    #[error("Imagery service is not configured: {0}")]
    NotConfigured(String),

    #[error("Imagery service error ({status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Malformed imagery service response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A catalog image selected for export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    /// Catalog asset id, e.g. `COPERNICUS/S2_SR_HARMONIZED/20240612T101559_...`
    pub id: String,
    /// Cloudy pixel percentage reported by the catalog
    pub cloud_percentage: f64,
    /// Acquisition time as reported by the catalog (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

/// Everything needed to submit an export job
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Scene to export
    pub scene: Scene,
    /// Export footprint
    pub region: Region,
    /// Job description and file prefix
    pub file_prefix: String,
    /// Destination folder in the shared drive
    pub folder: Option<String>,
    /// Meters per pixel
    pub scale: f64,
    /// Upper bound on exported pixels
    pub max_pixels: f64,
}

/// Handle to a submitted export job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    /// Job runner operation name
    pub name: String,
    /// Description the job was submitted with
    pub description: String,
}

/// Lifecycle state of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Cancelling,
    Completed,
    Cancelled,
    Failed,
    Unknown,
}

impl JobState {
    /// Parse a job runner state string. `SUCCEEDED` and `COMPLETED` both map to
    /// [`JobState::Completed`]; `READY` is the queued state of the batch API.
    pub fn from_remote(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "PENDING" | "READY" => Self::Pending,
            "RUNNING" => Self::Running,
            "CANCELLING" => Self::Cancelling,
            "SUCCEEDED" | "COMPLETED" => Self::Completed,
            "CANCELLED" => Self::Cancelled,
            "FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Whether the job may still change state
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Cancelling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Cancelling => "CANCELLING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status snapshot of an export job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Error message reported by the job runner, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Final result of an export: the job handle and the state it ended in
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub job: ExportJob,
    pub status: JobStatus,
}

impl ExportOutcome {
    pub fn succeeded(&self) -> bool {
        self.status.state == JobState::Completed
    }
}
