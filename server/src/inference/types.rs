//! Prediction pipeline types and error definitions

use image::Rgb;
use ndarray::{Array2, Array3};
use thiserror::Error;

use crate::config::InferenceConfig;

/// Errors that can occur while running the prediction pipeline
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Failed to decode raster: {0}")]
    Decode(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Remote model error ({status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Malformed prediction response ({reason}): {body}")]
    InvalidResponse { reason: String, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to encode overlay: {0}")]
    Encode(String),

    #[error("Pipeline task failed: {0}")]
    Internal(String),
}

/// A decoded multi-band raster, samples cast to `f32`
#[derive(Debug, Clone)]
pub struct Raster {
    /// Samples as (bands, height, width)
    pub data: Array3<f32>,
    /// Sample type of the source file, e.g. `uint16`
    pub sample_type: &'static str,
}

impl Raster {
    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }
}

/// Per-pixel predicted class indices, (height, width)
pub type ClassMask = Array2<u8>;

/// How the highlighted class is painted over the RGB render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStyle {
    /// Class value that gets highlighted
    pub class_value: u8,
    pub color: Rgb<u8>,
    pub alpha: u8,
}

impl From<&InferenceConfig> for OverlayStyle {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            class_value: config.highlight_class,
            color: Rgb(config.overlay_color),
            alpha: config.overlay_alpha,
        }
    }
}
