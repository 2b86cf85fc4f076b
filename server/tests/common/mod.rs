//! Common Test Utilities for Integration Tests
//!
//! Shared helpers used across integration test modules: local mock servers
//! standing in for the remote services, a mock imagery catalog, and fixture
//! builders for multipart bodies and multi-band GeoTIFFs.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use landcover_server::config::{Config, DriveConfig, ImageryConfig, InferenceConfig, RegistryConfig};
use landcover_server::imagery::{
    DriveClient, ExportBridge, ExportJob, ExportRequest, ImageryAppState, ImageryError,
    ImageryService, JobState, JobStatus, Region, Scene, imagery_routes,
};
use landcover_server::inference::{
    PredictAppState, PredictionPipeline, RemoteInferenceClient, inference_routes,
};
use landcover_server::registry::{ModelRegistryClient, RegistryAppState, registry_routes};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tiff::encoder::TiffEncoder;
use tiff::encoder::colortype::ColorType;
use tiff::tags::{PhotometricInterpretation, SampleFormat};
use tower_http::cors::{Any, CorsLayer};

pub const MULTIPART_BOUNDARY: &str = "landcover-test-boundary";

/// File id the mock share-link endpoint knows about
pub const DRIVE_FILE_ID: &str = "ABC123";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Serve `app` on an ephemeral local port and return its base URL
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().expect("Mock server has no address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

// ============================================================================
// Mock prediction service
// ============================================================================

/// Last payload received by the mock prediction service
pub type RecordedPayload = Arc<Mutex<Option<Value>>>;

fn tensor_dims(value: &Value) -> Vec<usize> {
    let mut dims = Vec::new();
    let mut current = value;
    while let Some(items) = current.as_array() {
        dims.push(items.len());
        match items.first() {
            Some(first) => current = first,
            None => break,
        }
    }
    dims
}

/// Prediction endpoint that labels the top half of the image as class 1.
///
/// Model name `broken` answers 500.
pub async fn spawn_prediction_server() -> (String, RecordedPayload) {
    let recorded: RecordedPayload = Arc::new(Mutex::new(None));
    let sink = recorded.clone();

    let app = Router::new().route(
        "/predict",
        post(move |Json(payload): Json<Value>| {
            let sink = sink.clone();
            async move {
                let model = payload["model_name"].as_str().unwrap_or_default().to_string();
                let dims = tensor_dims(&payload["inputs"]);
                *sink.lock().unwrap() = Some(payload);

                if model == "broken" {
                    return (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response();
                }
                if dims.len() != 4 {
                    return (StatusCode::UNPROCESSABLE_ENTITY, "inputs must be 4-D").into_response();
                }

                let size = dims[2];
                let half = size / 2;
                let scores: Vec<Vec<Vec<f32>>> = (0..2)
                    .map(|class| {
                        (0..size)
                            .map(|y| {
                                let hit = (y < half) == (class == 1);
                                vec![if hit { 0.9 } else { 0.1 }; size]
                            })
                            .collect()
                    })
                    .collect();
                Json(json!({ "result": [scores] })).into_response()
            }
        }),
    )
    .layer(DefaultBodyLimit::disable());

    (spawn_server(app).await, recorded)
}

// ============================================================================
// Mock model registry
// ============================================================================

async fn registry_upload(mut multipart: Multipart) -> impl IntoResponse {
    let mut filename = None;
    let mut metadata = None;
    let mut size = 0usize;
    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("model_file") => {
                filename = field.file_name().map(str::to_string);
                size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
            }
            Some("metadata_json") => metadata = field.text().await.ok(),
            _ => {}
        }
    }

    let Some(metadata) = metadata.and_then(|m| serde_json::from_str::<Value>(&m).ok()) else {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "detail": "metadata_json is not valid JSON" })),
        )
            .into_response();
    };

    Json(json!({
        "status": "uploaded",
        "filename": filename,
        "size": size,
        "metadata": metadata,
    }))
    .into_response()
}

async fn registry_list() -> Json<Value> {
    Json(json!([
        { "id": "m1", "name": "cereal-unet" },
        { "id": "m2", "name": "cereal-segformer" }
    ]))
}

async fn registry_delete(Path(id): Path<String>) -> impl IntoResponse {
    if id == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Model not found" })),
        )
            .into_response();
    }
    Json(json!({ "deleted": id })).into_response()
}

async fn registry_predict(Path(id): Path<String>, Json(input): Json<Value>) -> Json<Value> {
    Json(json!({ "model_id": id, "echo": input }))
}

/// Model-management service with canned answers
pub async fn spawn_registry_server() -> String {
    let app = Router::new()
        .route("/upload_model", post(registry_upload))
        .route("/models", get(registry_list))
        .route("/models/:id", delete(registry_delete))
        .route("/predict/:id", post(registry_predict));
    spawn_server(app).await
}

// ============================================================================
// Mock share-link download endpoint
// ============================================================================

/// Download endpoint serving `content` for [`DRIVE_FILE_ID`]
pub async fn spawn_drive_server(content: Vec<u8>) -> String {
    let app = Router::new().route(
        "/uc",
        get(move |Query(query): Query<HashMap<String, String>>| {
            let content = content.clone();
            async move {
                let is_download = query.get("export").map(String::as_str) == Some("download");
                match query.get("id") {
                    Some(id) if is_download && id == DRIVE_FILE_ID => (
                        StatusCode::OK,
                        [(header::CONTENT_TYPE, "application/octet-stream")],
                        content,
                    )
                        .into_response(),
                    _ => (StatusCode::NOT_FOUND, "file not found").into_response(),
                }
            }
        }),
    );
    spawn_server(app).await
}

// ============================================================================
// Mock imagery catalog
// ============================================================================

/// Imagery catalog whose export jobs settle in a fixed state
pub struct MockImageryService {
    /// Terminal state reported for every job
    final_state: JobState,
    /// Export requests received, in order
    pub submitted: Mutex<Vec<ExportRequest>>,
}

impl MockImageryService {
    pub fn new(final_state: JobState) -> Self {
        Self {
            final_state,
            submitted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ImageryService for MockImageryService {
    async fn least_cloudy_scene(&self, _region: &Region, year: i32) -> Result<Scene, ImageryError> {
        // The archive starts in 2015
        if year < 2015 {
            return Err(ImageryError::NoSceneFound);
        }
        Ok(Scene {
            id: format!("COPERNICUS/S2_SR_HARMONIZED/{}0612T101559_TEST", year),
            cloud_percentage: 0.4,
            start_time: None,
        })
    }

    async fn start_export(&self, request: &ExportRequest) -> Result<ExportJob, ImageryError> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(ExportJob {
            name: "projects/test-project/operations/EXPORT1".to_string(),
            description: request.file_prefix.clone(),
        })
    }

    async fn job_status(&self, _job: &ExportJob) -> Result<JobStatus, ImageryError> {
        Ok(JobStatus {
            state: self.final_state,
            error_message: (self.final_state == JobState::Failed)
                .then(|| "Quota exceeded".to_string()),
        })
    }
}

// ============================================================================
// Application
// ============================================================================

/// Backends wired into a test application
pub struct TestBackends {
    pub imagery: Arc<dyn ImageryService>,
    pub prediction_url: String,
    pub registry_url: String,
    pub drive_url: String,
    pub download_dir: TempDir,
}

impl TestBackends {
    /// Backends whose remote URLs all point at an unused local port
    pub fn offline(imagery: Arc<dyn ImageryService>) -> Self {
        let unreachable = "http://127.0.0.1:9".to_string();
        Self {
            imagery,
            prediction_url: unreachable.clone(),
            registry_url: unreachable.clone(),
            drive_url: format!("{}/uc", unreachable),
            download_dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    pub fn config(&self) -> Config {
        Config {
            imagery: ImageryConfig {
                project: "test-project".to_string(),
                export_folder: Some("landcover-exports".to_string()),
                poll_interval: Duration::from_millis(1),
                ..ImageryConfig::default()
            },
            drive: DriveConfig {
                download_url: self.drive_url.clone(),
                download_dir: self.download_dir.path().to_path_buf(),
                ..DriveConfig::default()
            },
            inference: InferenceConfig {
                service_url: self.prediction_url.clone(),
                ..InferenceConfig::default()
            },
            registry: RegistryConfig {
                base_url: self.registry_url.clone(),
            },
            ..Config::default()
        }
    }
}

/// Create a test application router with all routes configured
pub fn create_test_app(backends: &TestBackends) -> Router {
    let config = backends.config();
    let http = reqwest::Client::new();

    let imagery_state = ImageryAppState {
        export: Arc::new(ExportBridge::new(backends.imagery.clone(), &config.imagery)),
        drive: Arc::new(DriveClient::new(http.clone(), &config.drive)),
    };
    let predict_state = PredictAppState {
        pipeline: Arc::new(PredictionPipeline::new(
            Arc::new(RemoteInferenceClient::new(http.clone(), &config.inference)),
            config.inference.clone(),
        )),
    };
    let registry_state = RegistryAppState {
        registry: Arc::new(ModelRegistryClient::new(http, &config.registry)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(imagery_routes(imagery_state))
        .merge(inference_routes(predict_state))
        .merge(registry_routes(registry_state))
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .layer(cors)
}

// ============================================================================
// Fixtures
// ============================================================================

/// A field of a hand-built multipart body
pub struct FormField<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

impl<'a> FormField<'a> {
    pub fn text(name: &'a str, value: &'a str) -> Self {
        Self {
            name,
            file_name: None,
            data: value.as_bytes(),
        }
    }

    pub fn file(name: &'a str, file_name: &'a str, data: &'a [u8]) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            data,
        }
    }
}

/// Encode `fields` as `multipart/form-data`, returning the content type and body
pub fn multipart_body(fields: &[FormField<'_>]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for field in fields {
        body.extend_from_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        match field.file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        field.name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
            }
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", field.name).as_bytes(),
            ),
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(field.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

    (
        format!("multipart/form-data; boundary={}", MULTIPART_BOUNDARY),
        body,
    )
}

/// Six 16-bit unsigned samples per pixel
struct SixBand16;

impl ColorType for SixBand16 {
    type Inner = u16;
    const TIFF_VALUE: PhotometricInterpretation = PhotometricInterpretation::BlackIsZero;
    const BITS_PER_SAMPLE: &'static [u16] = &[16; 6];
    const SAMPLE_FORMAT: &'static [SampleFormat] = &[SampleFormat::Uint; 6];
}

/// Encode a six-band uint16 GeoTIFF-like raster with a per-band gradient
pub fn six_band_tiff(width: u32, height: u32) -> Vec<u8> {
    let mut samples = Vec::with_capacity(width as usize * height as usize * 6);
    for y in 0..height {
        for x in 0..width {
            for band in 0..6u32 {
                samples.push((band * 500 + y * 7 + x * 3) as u16);
            }
        }
    }

    let mut buffer = Cursor::new(Vec::new());
    TiffEncoder::new(&mut buffer)
        .expect("Failed to create TIFF encoder")
        .write_image::<SixBand16>(width, height, &samples)
        .expect("Failed to encode TIFF");
    buffer.into_inner()
}

/// A polygon over farmland near Beja, Tunisia
pub fn test_coords() -> Value {
    json!([[9.18, 36.72], [9.24, 36.72], [9.24, 36.76], [9.18, 36.76]])
}
