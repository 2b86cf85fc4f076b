use axum::{Json, Router, extract::DefaultBodyLimit, response::IntoResponse, routing::get};
use landcover_server::config::Config;
use landcover_server::imagery::{
    DriveClient, EarthEngineService, ExportBridge, ImageryAppState, imagery_routes,
};
use landcover_server::inference::{
    PredictAppState, PredictionPipeline, RemoteInferenceClient, inference_routes,
};
use landcover_server::registry::{ModelRegistryClient, RegistryAppState, registry_routes};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Ensure a directory exists, creating it if necessary.
fn ensure_directory(path: &Path, name: &str) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created {} directory: {:?}", name, path);
        Ok(())
    } else if path.is_dir() {
        Ok(())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} path {:?} exists but is not a directory", name, path),
        ))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn health() -> Json<HealthResponse> {
    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: uptime,
    })
}

/// Prometheus metrics handle for exposing metrics in Prometheus format
static PROMETHEUS_HANDLE: std::sync::OnceLock<PrometheusHandle> = std::sync::OnceLock::new();

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    START_TIME.set(Instant::now()).ok();

    // Install the Prometheus recorder before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    PROMETHEUS_HANDLE.set(prometheus_handle).ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "landcover_server=debug,landcover=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}",
        config.host, config.port
    );
    if config.imagery.project.is_empty() {
        warn!("GEE_PROJECT is not set - exports will fail until it is configured");
    }
    info!(
        "Prediction service: {}, model registry: {}",
        config.inference.service_url, config.registry.base_url
    );
    if let Some(name) = config.inference.highlight_class_name() {
        info!(
            "Highlighting class {} ({})",
            config.inference.highlight_class, name
        );
    }

    // Downloads land here; create it for a dev-friendly startup
    let download_dir = &config.drive.download_dir;
    if let Err(e) = ensure_directory(download_dir, "downloads") {
        warn!(
            "Failed to create downloads directory {:?}: {}",
            download_dir, e
        );
    }

    // One HTTP client shared by every outbound integration
    let mut client_builder = reqwest::Client::builder();
    if let Some(timeout) = config.http_timeout {
        info!("Outbound HTTP timeout: {:?}", timeout);
        client_builder = client_builder.timeout(timeout);
    }
    let http = client_builder.build()?;

    let imagery_service = Arc::new(EarthEngineService::new(http.clone(), &config.imagery));
    let imagery_state = ImageryAppState {
        export: Arc::new(ExportBridge::new(imagery_service, &config.imagery)),
        drive: Arc::new(DriveClient::new(http.clone(), &config.drive)),
    };

    let inference_client = Arc::new(RemoteInferenceClient::new(http.clone(), &config.inference));
    let predict_state = PredictAppState {
        pipeline: Arc::new(PredictionPipeline::new(
            inference_client,
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

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .merge(imagery_routes(imagery_state))
        .merge(inference_routes(predict_state))
        .merge(registry_routes(registry_state))
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Front-end assets, with index.html for unmatched paths
    let app = if let Some(ref static_dir) = config.static_files.dir {
        if static_dir.exists() {
            info!("Serving static files from: {:?}", static_dir);

            let index_path = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_path));

            let static_service = ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .service(serve_dir);

            app.fallback_service(static_service)
        } else {
            warn!(
                "Static files directory not found: {:?} - static file serving disabled",
                static_dir
            );
            app
        }
    } else {
        info!("Static file serving disabled (STATIC_FILES_DIR not set)");
        app
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Land-cover server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
