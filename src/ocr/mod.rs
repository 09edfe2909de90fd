//! OCR collaborator client.
//!
//! Extracted images are sent one per request to an OCR server (`POST /analyze/ocr`, multipart
//! `file`, `lang` query). Batches run concurrently and aggregate into a map keyed by image path;
//! a failed image records its error and never aborts the batch.

use crate::config::{ConfigError, OcrConfig};
use crate::retry::{RemoteCallError, RetryPolicy, Sleeper, TokioSleeper, send_with_retry};
use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp"];

/// Text recognized in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    /// Recognized text.
    #[serde(default)]
    pub text: String,
    /// Engine confidence, when reported.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Language the engine used.
    #[serde(default)]
    pub language: Option<String>,
    /// Server-side processing time.
    #[serde(default)]
    pub process_time_seconds: Option<f64>,
}

/// Per-image OCR outcomes keyed by image path.
pub type OcrResults = BTreeMap<PathBuf, Result<OcrResult, String>>;

/// Errors raised by the OCR collaborator.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The image could not be read.
    #[error("cannot read image {path}: {source}")]
    Io {
        /// Image path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The OCR server failed or was unreachable.
    #[error("OCR request failed: {0}")]
    Remote(#[from] RemoteCallError),
    /// The server answered with an unexpected body.
    #[error("malformed OCR response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by OCR providers.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Recognize the text in a single image file.
    async fn recognize(&self, image: &Path) -> Result<OcrResult, OcrError>;
}

/// HTTP client for the OCR server.
pub struct HttpOcrClient {
    http: Client,
    base_url: String,
    language: String,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpOcrClient {
    /// Build a client for the configured OCR server.
    pub fn new(config: &OcrConfig, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .user_agent("parsenote/ocr")
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            retry,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Whether the server answers its health endpoint.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "OCR server health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, image: &Path) -> Result<OcrResult, OcrError> {
        let bytes = tokio::fs::read(image).await.map_err(|source| OcrError::Io {
            path: image.to_path_buf(),
            source,
        })?;
        let file_name = image
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let mime = mime_for(image);
        let url = format!("{}/analyze/ocr", self.base_url);

        let response = send_with_retry(&self.retry, self.sleeper.as_ref(), &url, || {
            let part = Part::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str(mime)
                .map_err(|err| RemoteCallError::Request(err.to_string()))?;
            Ok(self
                .http
                .post(&url)
                .query(&[("lang", self.language.as_str())])
                .multipart(Form::new().part("file", part)))
        })
        .await?;

        let mut result: OcrResult = response
            .json()
            .await
            .map_err(|err| OcrError::InvalidResponse(err.to_string()))?;
        if result.language.is_none() {
            result.language = Some(self.language.clone());
        }
        Ok(result)
    }
}

fn mime_for(path: &Path) -> &'static str {
    match extension(path).as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Recognize every image concurrently; individual failures are recorded, not raised.
pub async fn recognize_batch(client: &dyn OcrClient, images: &[PathBuf]) -> OcrResults {
    let outcomes = join_all(images.iter().map(|image| async move {
        let outcome = client.recognize(image).await.map_err(|err| {
            tracing::warn!(image = %image.display(), error = %err, "OCR failed for image");
            err.to_string()
        });
        (image.clone(), outcome)
    }))
    .await;
    outcomes.into_iter().collect()
}

/// Image files under `dir`, recursively, in path order.
pub fn collect_images(dir: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            extension(path).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        })
        .collect();
    images.sort();
    images
}

/// Recognize every image found under `dir`.
pub async fn recognize_directory(client: &dyn OcrClient, dir: &Path) -> OcrResults {
    let images = collect_images(dir);
    tracing::debug!(dir = %dir.display(), images = images.len(), "Running OCR over directory");
    recognize_batch(client, &images).await
}

/// Render OCR outcomes as Markdown grouped by page, pages parsed from `page{N}_...` names.
///
/// Returns an empty string when there is nothing to render.
pub fn render_ocr_text(results: &OcrResults) -> String {
    let mut pages: BTreeMap<u32, Vec<(&PathBuf, &Result<OcrResult, String>)>> = BTreeMap::new();
    for (path, outcome) in results {
        pages.entry(page_of(path)).or_default().push((path, outcome));
    }

    let mut out = String::new();
    for (page, entries) in pages {
        if page == 0 {
            out.push_str("#### Other images\n\n");
        } else {
            out.push_str(&format!("#### Page {page}\n\n"));
        }
        for (path, outcome) in entries {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            match outcome {
                Ok(result) if result.text.trim().is_empty() => {
                    out.push_str(&format!("- **{name}**: no text found\n\n"));
                }
                Ok(result) => {
                    out.push_str(&format!("- **{name}**:\n\n{}\n\n", result.text.trim()));
                }
                Err(error) => out.push_str(&format!("- **{name}**: OCR failed ({error})\n\n")),
            }
        }
    }
    out.trim_end().to_string()
}

fn page_of(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.strip_prefix("page"))
        .and_then(|rest| rest.split('_').next())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}
