//! HTTP route handlers for prediction overlays

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use serde::Serialize;

use super::pipeline::PredictionPipeline;
use super::types::InferenceError;

/// Application state for the prediction routes
#[derive(Clone)]
pub struct PredictAppState {
    pub pipeline: Arc<PredictionPipeline>,
}

/// Error response for prediction API
#[derive(Debug, Serialize)]
pub struct InferenceErrorResponse {
    pub error: String,
    pub code: String,
}

impl InferenceErrorResponse {
    fn bad_request(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: "bad_request".to_string(),
        }
    }
}

impl From<InferenceError> for InferenceErrorResponse {
    fn from(e: InferenceError) -> Self {
        let code = match &e {
            InferenceError::Decode(_) => "decode_error",
            InferenceError::Shape(_) => "shape_error",
            InferenceError::Remote { .. } => "remote_error",
            InferenceError::InvalidResponse { .. } => "invalid_response",
            InferenceError::Http(_) => "http_error",
            InferenceError::Encode(_) => "encode_error",
            InferenceError::Internal(_) => "internal_error",
        };
        Self {
            error: e.to_string(),
            code: code.to_string(),
        }
    }
}

impl From<MultipartRejection> for InferenceErrorResponse {
    fn from(rejection: MultipartRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartError> for InferenceErrorResponse {
    fn from(e: MultipartError) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl IntoResponse for InferenceErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "bad_request" | "decode_error" | "shape_error" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// POST /predict_and_show - Classify an uploaded GeoTIFF and return the overlay PNG
///
/// Multipart fields: `file` (the raster) and `model_name`.
pub async fn predict_and_show(
    State(state): State<PredictAppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, InferenceErrorResponse> {
    let mut multipart = multipart?;

    let mut raster: Option<Bytes> = None;
    let mut model_name: Option<String> = None;
    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let data = field.bytes().await?;
                if !data.is_empty() {
                    raster = Some(data);
                }
            }
            Some("model_name") => {
                let name = field.text().await?;
                if !name.trim().is_empty() {
                    model_name = Some(name.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let raster =
        raster.ok_or_else(|| InferenceErrorResponse::bad_request("No GeoTIFF file uploaded."))?;
    let model_name =
        model_name.ok_or_else(|| InferenceErrorResponse::bad_request("No model_name provided."))?;

    tracing::info!(
        "Predicting {} byte raster with model '{}'",
        raster.len(),
        model_name
    );
    let png = state
        .pipeline
        .predict_and_render(raster, &model_name)
        .await
        .map_err(|e| {
            tracing::error!("Prediction with model '{}' failed: {}", model_name, e);
            InferenceErrorResponse::from(e)
        })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CONTENT_DISPOSITION, "inline; filename=\"overlay.png\""),
        ],
        png,
    )
        .into_response())
}

/// Build prediction API routes
pub fn inference_routes(state: PredictAppState) -> Router {
    Router::new()
        .route("/predict_and_show", post(predict_and_show))
        .with_state(state)
}
