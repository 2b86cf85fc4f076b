//! Shared-drive link resolution and streamed downloads

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use metrics::counter;
use reqwest::{Client, StatusCode, header};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::DriveConfig;

use super::types::ImageryError;

/// Link markers that precede a file id, in lookup order
const ID_MARKERS: &[&str] = &["/d/", "id="];

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Extract the file id from a share link.
///
/// Supports `.../d/<id>/...` and `...?id=<id>...`; the `/d/` form wins when a
/// link carries both.
pub fn get_drive_file_id(url: &str) -> Option<String> {
    for marker in ID_MARKERS {
        for (start, _) in url.match_indices(marker) {
            let rest = &url[start + marker.len()..];
            let end = rest.find(|c: char| !is_id_char(c)).unwrap_or(rest.len());
            if end > 0 {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}

/// Reduce a user-supplied filename to a safe basename inside the download dir
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        None
    } else {
        Some(sanitized)
    }
}

/// Downloads shared files into the local download directory
pub struct DriveClient {
    client: Client,
    download_url: String,
    download_dir: PathBuf,
    chunk_size: usize,
}

impl DriveClient {
    pub fn new(client: Client, config: &DriveConfig) -> Self {
        Self {
            client,
            download_url: config.download_url.clone(),
            download_dir: config.download_dir.clone(),
            chunk_size: config.chunk_size,
        }
    }

    /// Resolve `public_link` and download it as `filename`.
    ///
    /// Returns the local path, or `None` if the link is unusable or the
    /// download failed; failures are logged.
    pub async fn fetch_from_drive(&self, public_link: &str, filename: &str) -> Option<PathBuf> {
        let Some(file_id) = get_drive_file_id(public_link) else {
            error!("No file id found in share link: {}", public_link);
            counter!("landcover_drive_downloads_total", "outcome" => "bad_link").increment(1);
            return None;
        };

        match self.download_file(&file_id, filename).await {
            Ok(path) => {
                counter!("landcover_drive_downloads_total", "outcome" => "ok").increment(1);
                Some(path)
            }
            Err(e) => {
                error!("Error downloading file {} from Drive: {}", file_id, e);
                counter!("landcover_drive_downloads_total", "outcome" => "error").increment(1);
                None
            }
        }
    }

    /// Stream file `file_id` into `<download_dir>/<filename>`
    pub async fn download_file(
        &self,
        file_id: &str,
        filename: &str,
    ) -> Result<PathBuf, ImageryError> {
        let response = self
            .client
            .get(&self.download_url)
            .query(&[("export", "download"), ("id", file_id)])
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ImageryError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/html"));
        if is_html {
            warn!(
                "Drive returned an HTML page for {}; the file may need a download confirmation",
                file_id
            );
        }

        fs::create_dir_all(&self.download_dir).await?;
        let final_path = self.download_dir.join(filename);
        // Concurrent downloads of the same name each get their own partial file
        let partial_path = self
            .download_dir
            .join(format!(".{}.{}.partial", filename, Uuid::new_v4()));

        let written = match self.write_stream(response, &partial_path).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&partial_path).await;
                return Err(e);
            }
        };
        fs::rename(&partial_path, &final_path).await?;

        info!(
            "Downloaded '{}' ({} bytes) to {}",
            filename,
            written,
            final_path.display()
        );
        Ok(final_path)
    }

    async fn write_stream(
        &self,
        response: reqwest::Response,
        path: &Path,
    ) -> Result<u64, ImageryError> {
        let file = fs::File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        debug!("Wrote {} bytes to {}", written, path.display());

        Ok(written)
    }
}
