//! Imagery service backed by the Earth Engine REST API

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::ImageryConfig;

use super::region::Region;
use super::service::ImageryService;
use super::types::{ExportJob, ExportRequest, ImageryError, JobState, JobStatus, Scene};

/// Public catalog assets live under this project
const CATALOG_PROJECT: &str = "earthengine-public";

/// Catalog property ranked when picking a scene
const CLOUD_PROPERTY: &str = "CLOUDY_PIXEL_PERCENTAGE";

const LIST_PAGE_SIZE: u32 = 1000;

/// Earth Engine REST client
pub struct EarthEngineService {
    client: Client,
    api_url: String,
    project: String,
    collection: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListImagesResponse {
    #[serde(default)]
    images: Vec<CatalogImage>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogImage {
    id: Option<String>,
    name: Option<String>,
    start_time: Option<String>,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    metadata: Option<OperationMetadata>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
struct OperationMetadata {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    message: Option<String>,
}

impl EarthEngineService {
    pub fn new(client: Client, config: &ImageryConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            collection: config.collection.clone(),
            access_token: config.access_token.clone(),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("x-goog-user-project", &self.project);
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn require_project(&self) -> Result<(), ImageryError> {
        if self.project.is_empty() {
            return Err(ImageryError::NotConfigured(
                "GEE_PROJECT is not set".to_string(),
            ));
        }
        Ok(())
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ImageryError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(ImageryError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ImageryError::InvalidResponse(e.to_string()))
    }
}

/// Serialized expression graph for the exported image:
/// `clipToBoundsAndScale(toUint16(Image.load(id)), polygon, scale)`
pub(crate) fn export_expression(request: &ExportRequest) -> Value {
    let image = json!({
        "functionInvocationValue": {
            "functionName": "Image.load",
            "arguments": { "id": { "constantValue": request.scene.id } }
        }
    });
    let image = json!({
        "functionInvocationValue": {
            "functionName": "Image.toUint16",
            "arguments": { "value": image }
        }
    });
    let geometry = json!({
        "functionInvocationValue": {
            "functionName": "GeometryConstructors.Polygon",
            "arguments": { "coordinates": { "constantValue": [request.region.ring()] } }
        }
    });
    let clipped = json!({
        "functionInvocationValue": {
            "functionName": "Image.clipToBoundsAndScale",
            "arguments": {
                "input": image,
                "geometry": geometry,
                "scale": { "constantValue": request.scale }
            }
        }
    });

    json!({ "result": "0", "values": { "0": clipped } })
}

fn cloud_percentage(image: &CatalogImage) -> Option<f64> {
    image.properties.get(CLOUD_PROPERTY).and_then(Value::as_f64)
}

/// Catalog ids are `<collection>/<index>`; older responses only carry the
/// resource name `projects/<p>/assets/<id>`.
fn image_id(image: &CatalogImage) -> Option<String> {
    image.id.clone().or_else(|| {
        image
            .name
            .as_deref()
            .and_then(|n| n.split_once("/assets/"))
            .map(|(_, id)| id.to_string())
    })
}

#[async_trait]
impl ImageryService for EarthEngineService {
    async fn least_cloudy_scene(&self, region: &Region, year: i32) -> Result<Scene, ImageryError> {
        let url = format!(
            "{}/v1/projects/{}/assets/{}:listImages",
            self.api_url, CATALOG_PROJECT, self.collection
        );
        let start_time = format!("{:04}-01-01T00:00:00Z", year);
        let end_time = format!("{:04}-12-31T00:00:00Z", year);
        let region_json = region.to_geojson().to_string();

        let mut best: Option<Scene> = None;
        let mut page_token: Option<String> = None;
        let mut scanned = 0usize;

        loop {
            let mut query = vec![
                ("startTime", start_time.clone()),
                ("endTime", end_time.clone()),
                ("region", region_json.clone()),
                ("pageSize", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let page: ListImagesResponse =
                self.send_json(self.client.get(&url).query(&query)).await?;
            scanned += page.images.len();

            for image in &page.images {
                let (Some(id), Some(cloud)) = (image_id(image), cloud_percentage(image)) else {
                    continue;
                };
                if best.as_ref().is_none_or(|b| cloud < b.cloud_percentage) {
                    best = Some(Scene {
                        id,
                        cloud_percentage: cloud,
                        start_time: image.start_time.clone(),
                    });
                }
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Scanned {} catalog images for year {}", scanned, year);
        best.ok_or(ImageryError::NoSceneFound)
    }

    async fn start_export(&self, request: &ExportRequest) -> Result<ExportJob, ImageryError> {
        self.require_project()?;

        let url = format!("{}/v1/projects/{}/image:export", self.api_url, self.project);

        let mut drive_destination = json!({ "filenamePrefix": request.file_prefix });
        if let Some(folder) = &request.folder {
            drive_destination["folder"] = json!(folder);
        }

        let body = json!({
            "expression": export_expression(request),
            "description": request.file_prefix,
            "fileExportOptions": {
                "fileFormat": "GEO_TIFF",
                "driveDestination": drive_destination,
            },
            // int64 fields travel as strings
            "maxPixels": format!("{}", request.max_pixels as i64),
        });

        let operation: Operation = self.send_json(self.client.post(&url).json(&body)).await?;
        info!(
            "Export task '{}' started as {}",
            request.file_prefix, operation.name
        );

        Ok(ExportJob {
            name: operation.name,
            description: request.file_prefix.clone(),
        })
    }

    async fn job_status(&self, job: &ExportJob) -> Result<JobStatus, ImageryError> {
        let url = format!("{}/v1/{}", self.api_url, job.name);
        let operation: Operation = self.send_json(self.client.get(&url)).await?;

        let reported = operation
            .metadata
            .and_then(|m| m.state)
            .map(|s| JobState::from_remote(&s));
        let error_message = operation.error.and_then(|e| e.message);

        let state = match (reported, operation.done, &error_message) {
            (_, true, Some(_)) => JobState::Failed,
            (Some(state), _, _) => state,
            (None, true, None) => JobState::Completed,
            (None, false, _) => JobState::Pending,
        };

        Ok(JobStatus {
            state,
            error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::region::PolygonCoords;

    fn test_request() -> ExportRequest {
        let region = Region::from_coords(PolygonCoords::Ring(vec![
            [10.1, 36.8],
            [10.2, 36.8],
            [10.2, 36.9],
        ]))
        .unwrap();
        ExportRequest {
            scene: Scene {
                id: "COPERNICUS/S2_SR_HARMONIZED/20240101T000000_X".to_string(),
                cloud_percentage: 0.5,
                start_time: None,
            },
            region,
            file_prefix: "sentinel2_20240101_000000".to_string(),
            folder: Some("exports".to_string()),
            scale: 10.0,
            max_pixels: 1e13,
        }
    }

    #[test]
    fn test_export_expression_shape() {
        let expr = export_expression(&test_request());
        let root = &expr["values"]["0"]["functionInvocationValue"];
        assert_eq!(root["functionName"], "Image.clipToBoundsAndScale");
        assert_eq!(root["arguments"]["scale"]["constantValue"], 10.0);

        let cast = &root["arguments"]["input"]["functionInvocationValue"];
        assert_eq!(cast["functionName"], "Image.toUint16");
        let load = &cast["arguments"]["value"]["functionInvocationValue"];
        assert_eq!(load["functionName"], "Image.load");
        assert_eq!(
            load["arguments"]["id"]["constantValue"],
            "COPERNICUS/S2_SR_HARMONIZED/20240101T000000_X"
        );

        let ring = &root["arguments"]["geometry"]["functionInvocationValue"]["arguments"]
            ["coordinates"]["constantValue"][0];
        assert_eq!(ring.as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_image_id_falls_back_to_name() {
        let image: CatalogImage = serde_json::from_value(json!({
            "name": "projects/earthengine-public/assets/COPERNICUS/S2_SR_HARMONIZED/ABC",
            "properties": { "CLOUDY_PIXEL_PERCENTAGE": 3.5 }
        }))
        .unwrap();
        assert_eq!(
            image_id(&image).as_deref(),
            Some("COPERNICUS/S2_SR_HARMONIZED/ABC")
        );
        assert_eq!(cloud_percentage(&image), Some(3.5));
    }

    #[tokio::test]
    async fn test_start_export_requires_project() {
        let service = EarthEngineService::new(Client::new(), &ImageryConfig::default());
        let result = service.start_export(&test_request()).await;
        assert!(matches!(result, Err(ImageryError::NotConfigured(_))));
    }
}
