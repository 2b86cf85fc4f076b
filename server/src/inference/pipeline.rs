//! End-to-end prediction pipeline: raster in, overlay PNG out

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::info;

use crate::config::InferenceConfig;

use super::client::InferenceService;
use super::postprocess::postprocess_output;
use super::preprocess::preprocess_raster;
use super::render::{create_overlay, create_rgb_display, encode_png};
use super::types::{InferenceError, OverlayStyle};

/// Runs preprocessing, remote inference and overlay rendering for one upload
pub struct PredictionPipeline {
    service: Arc<dyn InferenceService>,
    config: InferenceConfig,
}

impl PredictionPipeline {
    pub fn new(service: Arc<dyn InferenceService>, config: InferenceConfig) -> Self {
        Self { service, config }
    }

    /// Classify an uploaded raster with `model_name` and return the overlay as PNG
    pub async fn predict_and_render(
        &self,
        raster: Bytes,
        model_name: &str,
    ) -> Result<Vec<u8>, InferenceError> {
        counter!("landcover_predictions_total").increment(1);

        let result = self.run(raster, model_name).await;
        if result.is_err() {
            counter!("landcover_prediction_errors_total").increment(1);
        }
        result
    }

    async fn run(&self, raster: Bytes, model_name: &str) -> Result<Vec<u8>, InferenceError> {
        let preprocess_start = Instant::now();
        let bands = self.config.bands.clone();
        let size = self.config.input_size;
        let (batched, display) =
            tokio::task::spawn_blocking(move || preprocess_raster(&raster, &bands, size))
                .await
                .map_err(|e| InferenceError::Internal(e.to_string()))??;
        histogram!("landcover_prediction_phase_duration_seconds", "phase" => "preprocess")
            .record(preprocess_start.elapsed());

        let predict_start = Instant::now();
        let scores = self.service.predict(model_name, &batched).await?;
        histogram!("landcover_prediction_phase_duration_seconds", "phase" => "predict")
            .record(predict_start.elapsed());
        info!("Received prediction from remote model '{}'", model_name);

        let render_start = Instant::now();
        let rgb_bands = self.config.rgb_bands;
        let style = OverlayStyle::from(&self.config);
        let png = tokio::task::spawn_blocking(move || {
            let mask = postprocess_output(&scores)?;
            let (_, height, width) = display.dim();
            if mask.dim() != (height, width) {
                return Err(InferenceError::Shape(format!(
                    "model returned a {:?} mask for a {}x{} input",
                    mask.dim(),
                    height,
                    width
                )));
            }
            let rgb = create_rgb_display(&display, rgb_bands)?;
            let overlay = create_overlay(&rgb, &mask, &style)?;
            encode_png(&overlay)
        })
        .await
        .map_err(|e| InferenceError::Internal(e.to_string()))??;
        histogram!("landcover_prediction_phase_duration_seconds", "phase" => "render")
            .record(render_start.elapsed());

        Ok(png)
    }
}
