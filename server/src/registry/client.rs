//! HTTP client for the model-management service

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::RegistryConfig;

use super::types::{ModelUpload, RegistryError};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upload, list, delete and run models held by the registry
pub struct ModelRegistryClient {
    client: Client,
    base_url: String,
}

impl ModelRegistryClient {
    pub fn new(client: Client, config: &RegistryConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Upload a model with its metadata document
    pub async fn upload_model(&self, upload: ModelUpload) -> Result<Value, RegistryError> {
        info!(
            "Uploading model {} ({} bytes) to registry",
            upload.file_name,
            upload.content.len()
        );
        let content_type = upload.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        let part = Part::bytes(upload.content.to_vec())
            .file_name(upload.file_name)
            .mime_str(content_type)?;
        let form = Form::new()
            .part("model_file", part)
            .text("metadata_json", upload.metadata_json);

        let response = self
            .client
            .post(self.url("/upload_model"))
            .multipart(form)
            .send()
            .await?;
        json_body(response).await
    }

    /// Upload a model file from disk
    pub async fn upload_model_file(
        &self,
        path: &Path,
        metadata: &Value,
    ) -> Result<Value, RegistryError> {
        if !tokio::fs::try_exists(path).await? {
            return Err(RegistryError::NotFound(path.to_path_buf()));
        }
        let content = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());

        self.upload_model(ModelUpload {
            file_name,
            content_type: None,
            content: content.into(),
            metadata_json: metadata.to_string(),
        })
        .await
    }

    /// List all registered models
    pub async fn list_models(&self) -> Result<Value, RegistryError> {
        let response = self.client.get(self.url("/models")).send().await?;
        json_body(response).await
    }

    /// Delete a model by id
    pub async fn delete_model(&self, model_id: &str) -> Result<Value, RegistryError> {
        info!("Deleting model {} from registry", model_id);
        let response = self
            .client
            .delete(self.url(&format!("/models/{}", model_id)))
            .send()
            .await?;
        json_body(response).await
    }

    /// Run a registered model on a JSON input document
    pub async fn run_inference(
        &self,
        model_id: &str,
        input: &Value,
    ) -> Result<Value, RegistryError> {
        let response = self
            .client
            .post(self.url(&format!("/predict/{}", model_id)))
            .json(input)
            .send()
            .await?;
        json_body(response).await
    }
}

/// Parse a 200 response as JSON; any other status is a remote error
async fn json_body(response: Response) -> Result<Value, RegistryError> {
    let status = response.status();
    let url = response.url().clone();
    let body = response.text().await?;
    debug!("Registry {} responded {}", url, status);

    if status != StatusCode::OK {
        return Err(RegistryError::Remote {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| RegistryError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> ModelRegistryClient {
        ModelRegistryClient::new(
            Client::new(),
            &RegistryConfig {
                base_url: base_url.to_string(),
            },
        )
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let registry = client("http://registry:8000/");
        assert_eq!(registry.base_url(), "http://registry:8000");
        assert_eq!(registry.url("/models"), "http://registry:8000/models");
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.onnx");

        // Unroutable base: the existence check must fail before any request
        let result = client("http://127.0.0.1:9")
            .upload_model_file(&missing, &serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(RegistryError::NotFound(path)) if path == missing));
    }
}
