//! Local inference backend talking to an Ollama runtime through `POST /api/generate`.
//!
//! Requests are non-streaming; an empty or malformed response is retried once with the
//! fallback model when one is configured.

use super::{BackendError, GenerationRequest, SummaryBackend, generate_with_fallback};
use crate::config::{ConfigError, SummaryBackendKind, SummaryConfig};
use crate::retry::{RemoteCallError, RetryPolicy, Sleeper, TokioSleeper, send_with_retry};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Local inference backend talking to an Ollama runtime.
pub struct LocalInferenceBackend {
    http: Client,
    base_url: String,
    model: String,
    fallback_model: Option<String>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

impl LocalInferenceBackend {
    /// Build the backend for the configured runtime URL.
    pub fn new(config: &SummaryConfig, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .user_agent("parsenote/summary")
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model_name(),
            fallback_model: config.fallback_model.clone(),
            retry,
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    async fn call(&self, model: &str, request: &GenerationRequest) -> Result<String, BackendError> {
        let payload = json!({
            "model": model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_output_tokens,
            }
        });
        let endpoint = self.endpoint();

        let response = send_with_retry(&self.retry, self.sleeper.as_ref(), &endpoint, || {
            Ok(self.http.post(&endpoint).json(&payload))
        })
        .await
        .map_err(|error| match error {
            RemoteCallError::Status { status, .. } if status == StatusCode::NOT_FOUND => {
                BackendError::Unavailable(format!(
                    "Ollama endpoint {endpoint} returned 404 (is model '{model}' pulled?)"
                ))
            }
            other => BackendError::Remote(other),
        })?;

        let body: OllamaResponse = response.json().await.map_err(|error| {
            BackendError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(BackendError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }
        let text = body.response.trim();
        if text.is_empty() {
            return Err(BackendError::EmptyResponse {
                model: model.to_string(),
            });
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl SummaryBackend for LocalInferenceBackend {
    fn kind(&self) -> SummaryBackendKind {
        SummaryBackendKind::LocalInference
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        generate_with_fallback(&self.model, self.fallback_model.as_deref(), |model| {
            self.call(model, request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn backend(server: &MockServer, fallback: Option<&str>) -> LocalInferenceBackend {
        let config = SummaryConfig {
            ollama_url: server.base_url(),
            model: Some("llama3:latest".into()),
            fallback_model: fallback.map(str::to_string),
            ..SummaryConfig::default()
        };
        let retry = RetryPolicy {
            max_retries: 1,
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        LocalInferenceBackend::new(&config, retry)
            .expect("backend")
            .with_sleeper(Arc::new(RecordingSleeper::default()))
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "system".into(),
            prompt: "Summarize".into(),
            temperature: 0.3,
            max_output_tokens: 1000,
        }
    }

    #[tokio::test]
    async fn handles_successful_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"stream": false, "options": {"num_predict": 1000}}"#);
                then.status(200).json_body(json!({
                    "response": "Summary text",
                    "done": true
                }));
            })
            .await;

        let summary = backend(&server, None).generate(&request()).await.expect("summary");
        mock.assert_async().await;
        assert_eq!(summary, "Summary text");
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = backend(&server, None).generate(&request()).await.unwrap_err();
        mock.assert_hits_async(2).await;
        assert!(matches!(error, BackendError::Remote(RemoteCallError::Exhausted { .. })));
        assert!(error.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn missing_model_maps_to_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(404).body("model not found");
            })
            .await;

        let error = backend(&server, Some("llama3.2:latest"))
            .generate(&request())
            .await
            .unwrap_err();
        assert!(matches!(error, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn empty_response_retries_with_alternate_model() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model": "llama3:latest"}"#);
                then.status(200).json_body(json!({"response": "  ", "done": true}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model": "llama3.2:latest"}"#);
                then.status(200)
                    .json_body(json!({"response": "fallback summary", "done": true}));
            })
            .await;

        let summary = backend(&server, Some("llama3.2:latest"))
            .generate(&request())
            .await
            .expect("summary");
        assert_eq!(summary, "fallback summary");
    }
}
