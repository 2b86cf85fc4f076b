//! Model registry types and error definitions

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when talking to the model registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Registry error ({status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Malformed registry response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A model file to forward to the registry
#[derive(Debug, Clone)]
pub struct ModelUpload {
    /// File name reported by the uploader
    pub file_name: String,
    /// MIME type reported by the uploader, if any
    pub content_type: Option<String>,
    pub content: bytes::Bytes,
    /// Metadata document, forwarded verbatim
    pub metadata_json: String,
}
