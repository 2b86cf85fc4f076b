//! HTTP route handlers proxying the model registry

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::client::ModelRegistryClient;
use super::types::{ModelUpload, RegistryError};

/// Application state for the registry routes
#[derive(Clone)]
pub struct RegistryAppState {
    pub registry: Arc<ModelRegistryClient>,
}

/// Error response for registry API
#[derive(Debug, Serialize)]
pub struct RegistryErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl RegistryErrorResponse {
    fn bad_request(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: "bad_request".to_string(),
            status: StatusCode::BAD_REQUEST,
        }
    }
}

impl From<RegistryError> for RegistryErrorResponse {
    fn from(e: RegistryError) -> Self {
        let (code, status) = match &e {
            RegistryError::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            // Upstream failures keep the upstream status
            RegistryError::Remote { status, .. } => (
                "remote_error",
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            ),
            RegistryError::InvalidResponse(_) => {
                ("invalid_response", StatusCode::INTERNAL_SERVER_ERROR)
            }
            RegistryError::Http(_) => ("http_error", StatusCode::INTERNAL_SERVER_ERROR),
            RegistryError::IoError(_) => ("io_error", StatusCode::INTERNAL_SERVER_ERROR),
        };
        let error = match e {
            RegistryError::Remote { body, .. } => body,
            other => other.to_string(),
        };
        Self {
            error,
            code: code.to_string(),
            status,
        }
    }
}

impl From<MultipartRejection> for RegistryErrorResponse {
    fn from(rejection: MultipartRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartError> for RegistryErrorResponse {
    fn from(e: MultipartError) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl From<JsonRejection> for RegistryErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for RegistryErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

fn log_failure(operation: &str) -> impl FnOnce(RegistryError) -> RegistryErrorResponse + '_ {
    move |e| {
        tracing::error!("Registry {} failed: {}", operation, e);
        RegistryErrorResponse::from(e)
    }
}

/// POST /flask_upload_model - Forward an uploaded model and its metadata
///
/// Multipart fields: `file` (the model) and `metadata` (JSON text).
pub async fn upload_model(
    State(state): State<RegistryAppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, RegistryErrorResponse> {
    let mut multipart = multipart?;

    let mut file: Option<(String, Option<String>, Bytes)> = None;
    let mut metadata: Option<String> = None;
    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("model").to_string();
                let content_type = field.content_type().map(str::to_string);
                let content = field.bytes().await?;
                file = Some((file_name, content_type, content));
            }
            Some("metadata") => {
                let text = field.text().await?;
                if !text.is_empty() {
                    metadata = Some(text);
                }
            }
            _ => {}
        }
    }

    let (file_name, content_type, content) =
        file.ok_or_else(|| RegistryErrorResponse::bad_request("No file uploaded"))?;
    let metadata_json =
        metadata.ok_or_else(|| RegistryErrorResponse::bad_request("No metadata provided"))?;

    let response = state
        .registry
        .upload_model(ModelUpload {
            file_name,
            content_type,
            content,
            metadata_json,
        })
        .await
        .map_err(log_failure("upload"))?;
    Ok(Json(response))
}

/// GET /models - List registered models
pub async fn list_models(
    State(state): State<RegistryAppState>,
) -> Result<Json<Value>, RegistryErrorResponse> {
    let models = state
        .registry
        .list_models()
        .await
        .map_err(log_failure("list"))?;
    Ok(Json(models))
}

/// DELETE /models/:id - Delete a registered model
pub async fn delete_model(
    State(state): State<RegistryAppState>,
    Path(model_id): Path<String>,
) -> Result<Json<Value>, RegistryErrorResponse> {
    let response = state
        .registry
        .delete_model(&model_id)
        .await
        .map_err(log_failure("delete"))?;
    Ok(Json(response))
}

/// POST /models/:id/predict - Run a registered model on a JSON input
pub async fn run_model(
    State(state): State<RegistryAppState>,
    Path(model_id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, RegistryErrorResponse> {
    let Json(input) = payload?;
    let response = state
        .registry
        .run_inference(&model_id, &input)
        .await
        .map_err(log_failure("inference"))?;
    Ok(Json(response))
}

/// Build model registry routes
pub fn registry_routes(state: RegistryAppState) -> Router {
    Router::new()
        .route("/flask_upload_model", post(upload_model))
        .route("/models", get(list_models))
        .route("/models/:id", delete(delete_model))
        .route("/models/:id/predict", post(run_model))
        .with_state(state)
}
