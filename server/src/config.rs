//! Server configuration
//!
//! Configuration is loaded from environment variables. A `.env` file in the
//! working directory is read first if present.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Maximum multipart upload size in bytes
    pub max_upload_size: usize,
    /// Total timeout applied to outbound HTTP calls (none by default)
    pub http_timeout: Option<Duration>,

    /// Imagery export configuration
    pub imagery: ImageryConfig,

    /// Shared-folder download configuration
    pub drive: DriveConfig,

    /// Prediction pipeline configuration
    pub inference: InferenceConfig,

    /// Model registry configuration
    pub registry: RegistryConfig,

    /// Static front-end configuration
    pub static_files: StaticFilesConfig,
}

/// Imagery catalog and export job runner configuration
#[derive(Debug, Clone)]
pub struct ImageryConfig {
    /// Cloud project the imagery service bills and exports under
    pub project: String,
    /// Shared folder that receives exported files
    pub export_folder: Option<String>,
    /// REST base URL of the imagery service
    pub api_url: String,
    /// OAuth bearer token for the imagery service
    pub access_token: Option<String>,
    /// Image collection queried for scenes
    pub collection: String,
    /// Delay between export status checks
    pub poll_interval: Duration,
    /// Export resolution in meters per pixel
    pub export_scale: f64,
    /// Upper bound on exported pixels
    pub max_pixels: f64,
}

/// File-sharing download configuration
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// Direct-download endpoint (`?export=download&id=...` is appended)
    pub download_url: String,
    /// Local directory that receives downloaded rasters
    pub download_dir: PathBuf,
    /// Write buffer size for streamed downloads
    pub chunk_size: usize,
}

/// Prediction pipeline configuration
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Base URL of the prediction service (`/predict` is appended)
    pub service_url: String,
    /// Device hint forwarded to the prediction service
    pub device: String,
    /// 1-based band indices read from the uploaded raster
    pub bands: Vec<usize>,
    /// Square model input size in pixels
    pub input_size: usize,
    /// 0-based tensor band indices rendered as (R, G, B)
    pub rgb_bands: [usize; 3],
    /// Class names indexed by class value
    pub class_names: Vec<String>,
    /// Class value highlighted in the overlay
    pub highlight_class: u8,
    /// Overlay highlight color
    pub overlay_color: [u8; 3],
    /// Overlay highlight alpha
    pub overlay_alpha: u8,
}

/// Model registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the model-management service
    pub base_url: String,
}

/// Static file serving configuration
#[derive(Debug, Clone, Default)]
pub struct StaticFilesConfig {
    /// Directory with the front-end (`index.html` served at `/`)
    pub dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            max_upload_size: 512 * 1024 * 1024, // 512 MB
            http_timeout: None,
            imagery: ImageryConfig::default(),
            drive: DriveConfig::default(),
            inference: InferenceConfig::default(),
            registry: RegistryConfig::default(),
            static_files: StaticFilesConfig::default(),
        }
    }
}

impl Default for ImageryConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            export_folder: None,
            api_url: "https://earthengine.googleapis.com".to_string(),
            access_token: None,
            collection: "COPERNICUS/S2_SR_HARMONIZED".to_string(),
            poll_interval: Duration::from_secs(30),
            export_scale: 10.0,
            max_pixels: 1e13,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            download_url: "https://drive.google.com/uc".to_string(),
            download_dir: PathBuf::from("downloads"),
            chunk_size: 1024 * 1024, // 1 MiB
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8000".to_string(),
            device: "cpu".to_string(),
            bands: vec![1, 2, 3, 4, 5, 6],
            input_size: 256,
            rgb_bands: [2, 1, 0],
            class_names: vec!["non_cereal".to_string(), "cereal".to_string()],
            highlight_class: 1,
            overlay_color: [255, 0, 0],
            overlay_alpha: 128,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

impl InferenceConfig {
    /// Full URL of the prediction endpoint
    pub fn predict_url(&self) -> String {
        format!("{}/predict", self.service_url.trim_end_matches('/'))
    }

    /// Name of the highlighted class, if it is a known class value
    pub fn highlight_class_name(&self) -> Option<&str> {
        self.class_names
            .get(self.highlight_class as usize)
            .map(String::as_str)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        // A missing .env file is the normal case in production
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }
        if let Ok(val) = env::var("MAX_UPLOAD_MB")
            && let Ok(mb) = val.parse::<usize>()
        {
            config.max_upload_size = mb * 1024 * 1024;
        }
        if let Ok(val) = env::var("HTTP_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.http_timeout = Some(Duration::from_secs(secs));
        }

        // Imagery config
        if let Ok(project) = env::var("GEE_PROJECT") {
            config.imagery.project = project;
        }
        if let Ok(folder) = env::var("GDRIVE_FOLDER")
            && !folder.is_empty()
        {
            config.imagery.export_folder = Some(folder);
        }
        if let Ok(url) = env::var("EE_API_URL") {
            config.imagery.api_url = url;
        }
        if let Ok(token) = env::var("EE_ACCESS_TOKEN")
            && !token.is_empty()
        {
            config.imagery.access_token = Some(token);
        }
        if let Ok(val) = env::var("EXPORT_POLL_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.imagery.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("EXPORT_SCALE")
            && let Ok(scale) = val.parse()
        {
            config.imagery.export_scale = scale;
        }

        // Drive config
        if let Ok(url) = env::var("DRIVE_DOWNLOAD_URL") {
            config.drive.download_url = url;
        }
        if let Ok(dir) = env::var("DOWNLOAD_DIR")
            && !dir.is_empty()
        {
            config.drive.download_dir = PathBuf::from(dir);
        }

        // Inference config
        if let Ok(url) = env::var("PREDICTION_SERVICE_URL") {
            config.inference.service_url = url;
        }
        if let Ok(device) = env::var("PREDICTION_DEVICE")
            && !device.is_empty()
        {
            config.inference.device = device;
        }
        if let Ok(val) = env::var("HIGHLIGHT_CLASS")
            && let Ok(class) = val.parse()
        {
            config.inference.highlight_class = class;
        }

        // Registry config
        if let Ok(url) = env::var("MODEL_REGISTRY_URL") {
            config.registry.base_url = url;
        }

        // Static files
        if let Ok(dir) = env::var("STATIC_FILES_DIR")
            && !dir.is_empty()
        {
            config.static_files.dir = Some(PathBuf::from(dir));
        }

        config
    }
}
