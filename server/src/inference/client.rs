//! Remote inference client

use async_trait::async_trait;
use ndarray::{Array4, ArrayD, ArrayViewD, Axis};
use reqwest::{Client, StatusCode};
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::InferenceConfig;

use super::postprocess::scores_from_json;
use super::types::InferenceError;

/// Trait for prediction backends
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Run `model_name` on a batched (1, bands, H, W) tensor and return the
    /// raw class scores.
    async fn predict(
        &self,
        model_name: &str,
        input: &Array4<f32>,
    ) -> Result<ArrayD<f32>, InferenceError>;
}

/// Serializes an n-dimensional view as nested JSON arrays
struct NestedArray<'a>(ArrayViewD<'a, f32>);

impl Serialize for NestedArray<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.ndim() == 0 {
            return serializer.serialize_f32(self.0.iter().next().copied().unwrap_or_default());
        }
        let mut seq = serializer.serialize_seq(Some(self.0.len_of(Axis(0))))?;
        for sub in self.0.outer_iter() {
            seq.serialize_element(&NestedArray(sub))?;
        }
        seq.end()
    }
}

#[derive(Serialize)]
struct PredictParams<'a> {
    device: &'a str,
}

#[derive(Serialize)]
struct PredictPayload<'a> {
    model_name: &'a str,
    inputs: NestedArray<'a>,
    params: PredictParams<'a>,
    save_result: bool,
}

/// HTTP client for the model-serving prediction endpoint
pub struct RemoteInferenceClient {
    client: Client,
    endpoint: String,
    device: String,
}

impl RemoteInferenceClient {
    pub fn new(client: Client, config: &InferenceConfig) -> Self {
        Self {
            client,
            endpoint: config.predict_url(),
            device: config.device.clone(),
        }
    }
}

#[async_trait]
impl InferenceService for RemoteInferenceClient {
    async fn predict(
        &self,
        model_name: &str,
        input: &Array4<f32>,
    ) -> Result<ArrayD<f32>, InferenceError> {
        let payload = PredictPayload {
            model_name,
            inputs: NestedArray(input.view().into_dyn()),
            params: PredictParams {
                device: &self.device,
            },
            save_result: false,
        };

        info!(
            "Sending {:?} tensor to remote model '{}'",
            input.dim(),
            model_name
        );
        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(InferenceError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let invalid = |reason: String, body: String| InferenceError::InvalidResponse { reason, body };

        let parsed: Value = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => return Err(invalid(e.to_string(), body)),
        };
        let Some(result) = parsed.get("result") else {
            return Err(invalid("missing \"result\" field".to_string(), body));
        };
        let scores = match scores_from_json(result) {
            Ok(scores) => scores,
            Err(reason) => return Err(invalid(reason, body)),
        };

        debug!("Received prediction with shape {:?}", scores.shape());
        Ok(scores)
    }
}
