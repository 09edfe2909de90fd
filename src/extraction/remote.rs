//! Remote document-digitization client.

use super::ExtractionStrategy;
use super::images::write_payloads;
use super::response::{extract_images, extract_text};
use super::types::{ExtractionError, ExtractionMethod, ExtractionResult};
use crate::config::{ConfigError, DigitizerConfig};
use crate::retry::{RemoteCallError, RetryPolicy, Sleeper, TokioSleeper, send_with_retry};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const OUTPUT_FORMATS: &str = "['html', 'text', 'markdown']";

/// Submits whole PDFs to the digitization service and normalizes its response.
pub struct RemoteExtractor {
    http: Client,
    url: String,
    api_key: String,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RemoteExtractor {
    /// Build a client; the service credential is required.
    pub fn new(config: &DigitizerConfig, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingVariable("DIGITIZER_API_KEY".into()))?;
        let http = Client::builder()
            .user_agent("parsenote/extract")
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        tracing::debug!(url = %config.url, "Initialized digitization client");

        Ok(Self {
            http,
            url: config.url.clone(),
            api_key,
            retry,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Upload the document and return the parsed JSON response.
    pub async fn fetch(&self, source: &Path) -> Result<Value, ExtractionError> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|err| ExtractionError::SourceUnavailable {
                path: source.to_path_buf(),
                reason: err.to_string(),
            })?;
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        let response = send_with_retry(&self.retry, self.sleeper.as_ref(), &self.url, || {
            let part = Part::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str("application/pdf")
                .map_err(|err| RemoteCallError::Request(err.to_string()))?;
            let form = Form::new()
                .part("document", part)
                .text("ocr", "force")
                .text("model", "document-parse")
                .text("chart_recognition", "true")
                .text("coordinates", "true")
                .text("output_formats", OUTPUT_FORMATS)
                .text("base64_encoding", "['figure']");
            Ok(self
                .http
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .multipart(form))
        })
        .await?;

        response
            .json::<Value>()
            .await
            .map_err(|err| ExtractionError::InvalidResponse(err.to_string()))
    }
}

#[async_trait]
impl ExtractionStrategy for RemoteExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Remote
    }

    async fn extract(
        &self,
        source: &Path,
        images_dir: &Path,
    ) -> Result<ExtractionResult, ExtractionError> {
        let response = self.fetch(source).await?;
        let (text, strategy) = extract_text(&response);
        let images = write_payloads(images_dir, &extract_images(&response)).await?;
        tracing::debug!(
            source = %source.display(),
            strategy,
            chars = text.len(),
            images = images.len(),
            "Remote extraction finished"
        );
        Ok(ExtractionResult::new(text, images))
    }
}
