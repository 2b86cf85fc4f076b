//! HTTP route handlers for export and download

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use super::drive::{DriveClient, sanitize_filename};
use super::export::{ExportBridge, generate_filename};
use super::region::{PolygonCoords, Region};
use super::types::ImageryError;

/// Application state for the imagery routes
#[derive(Clone)]
pub struct ImageryAppState {
    pub export: Arc<ExportBridge>,
    pub drive: Arc<DriveClient>,
}

/// Error response for imagery API
#[derive(Debug, Serialize)]
pub struct ImageryErrorResponse {
    pub status: &'static str,
    pub error: String,
    pub code: String,
}

impl ImageryErrorResponse {
    fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            status: "error",
            error: error.into(),
            code: code.to_string(),
        }
    }
}

impl From<ImageryError> for ImageryErrorResponse {
    fn from(e: ImageryError) -> Self {
        let code = match &e {
            ImageryError::InvalidRegion(_) => "invalid_region",
            ImageryError::NoSceneFound => "no_scene",
            ImageryError::NotConfigured(_) => "not_configured",
            ImageryError::Remote { .. } => "remote_error",
            ImageryError::InvalidResponse(_) => "invalid_response",
            ImageryError::Http(_) => "http_error",
            ImageryError::IoError(_) => "io_error",
        };
        Self::new(e.to_string(), code)
    }
}

impl From<JsonRejection> for ImageryErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.body_text(), "bad_request")
    }
}

impl IntoResponse for ImageryErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "bad_request" | "invalid_region" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Accept the year as a JSON number or a numeric string (the map front-end
/// sends whatever was typed into a prompt).
fn deserialize_year<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Number(i32),
        Text(String),
    }

    match Year::deserialize(deserializer)? {
        Year::Number(year) => Ok(year),
        Year::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid year: {:?}", text))),
    }
}

/// Body of POST /export_tif
#[derive(Debug, Deserialize)]
pub struct ExportTifRequest {
    pub coords: PolygonCoords,
    #[serde(deserialize_with = "deserialize_year")]
    pub year: i32,
}

/// Successful response of POST /export_tif
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportTifResponse {
    pub status: String,
    pub filename: String,
}

/// Body of POST /download_tif_from_drive
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub public_link: String,
    pub filename: String,
}

/// POST /export_tif - Export the least-cloudy scene over a region
pub async fn export_tif(
    State(state): State<ImageryAppState>,
    payload: Result<Json<ExportTifRequest>, JsonRejection>,
) -> Result<Json<ExportTifResponse>, ImageryErrorResponse> {
    let Json(request) = payload?;
    tracing::info!(
        "Fetching Sentinel-2 image for year {} over {} vertices",
        request.year,
        match &request.coords {
            PolygonCoords::Ring(ring) => ring.len(),
            PolygonCoords::Rings(rings) => rings.first().map_or(0, Vec::len),
        }
    );

    let region = Region::from_coords(request.coords).map_err(|e| {
        tracing::warn!("Rejected region: {}", e);
        ImageryErrorResponse::from(e)
    })?;
    tracing::debug!("Region bounds (lon/lat): {:?}", region.bounds());

    let scene = state
        .export
        .service()
        .least_cloudy_scene(&region, request.year)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch scene for year {}: {}", request.year, e);
            ImageryErrorResponse::from(e)
        })?;
    tracing::info!(
        "Selected scene {} ({:.2}% cloudy)",
        scene.id,
        scene.cloud_percentage
    );

    let filename = generate_filename("sentinel2", "tif");
    let Some(outcome) = state.export.export_to_drive(scene, region, &filename).await else {
        return Err(ImageryErrorResponse::new(
            format!("Failed to export {} to Google Drive.", filename),
            "export_failed",
        ));
    };

    if !outcome.succeeded() {
        return Err(ImageryErrorResponse::new(
            format!(
                "Export {} ended in state {}{}",
                filename,
                outcome.status.state,
                outcome
                    .status
                    .error_message
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ),
            "export_failed",
        ));
    }

    Ok(Json(ExportTifResponse {
        status: "success".to_string(),
        filename,
    }))
}

/// POST /download_tif_from_drive - Download an exported file and stream it back
pub async fn download_tif_from_drive(
    State(state): State<ImageryAppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ImageryErrorResponse> {
    let Json(request) = payload?;

    let filename = sanitize_filename(&request.filename).ok_or_else(|| {
        ImageryErrorResponse::new(
            format!("Invalid filename: {:?}", request.filename),
            "bad_request",
        )
    })?;

    tracing::info!("Downloading {} from Google Drive...", filename);
    let Some(path) = state
        .drive
        .fetch_from_drive(&request.public_link, &filename)
        .await
    else {
        return Err(ImageryErrorResponse::new(
            "Failed to download file from Google Drive.",
            "download_failed",
        ));
    };

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::error!("Failed to open downloaded file {}: {}", path.display(), e);
        ImageryErrorResponse::from(ImageryError::IoError(e))
    })?;

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Build imagery API routes
pub fn imagery_routes(state: ImageryAppState) -> Router {
    Router::new()
        .route("/export_tif", post(export_tif))
        .route("/download_tif_from_drive", post(download_tif_from_drive))
        .with_state(state)
}
