//! Remote chat-completions backend (`POST {base}/chat/completions` with a bearer credential).

use super::{BackendError, GenerationRequest, SummaryBackend, generate_with_fallback};
use crate::config::{ConfigError, SummaryBackendKind, SummaryConfig};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper, send_with_retry};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Hosted chat-completions backend.
pub struct RemoteChatBackend {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    fallback_model: Option<String>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteChatBackend {
    /// Build the backend; `CHAT_API_KEY` must be configured.
    pub fn new(config: &SummaryConfig, retry: RetryPolicy) -> Result<Self, ConfigError> {
        let api_key = config
            .chat_api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingVariable("CHAT_API_KEY".into()))?;
        let http = Client::builder()
            .user_agent("parsenote/summary")
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.chat_api_url.trim_end_matches('/').to_string(),
            api_key,
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
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, model: &str, request: &GenerationRequest) -> Result<String, BackendError> {
        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt}
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });
        let endpoint = self.endpoint();

        let response = send_with_retry(&self.retry, self.sleeper.as_ref(), &endpoint, || {
            Ok(self
                .http
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&payload))
        })
        .await?;

        let body: ChatResponse = response.json().await.map_err(|error| {
            BackendError::InvalidResponse(format!("failed to decode chat response: {error}"))
        })?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(BackendError::EmptyResponse {
                model: model.to_string(),
            });
        }
        Ok(content)
    }
}

#[async_trait]
impl SummaryBackend for RemoteChatBackend {
    fn kind(&self) -> SummaryBackendKind {
        SummaryBackendKind::RemoteChat
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
        generate_with_fallback(&self.model, self.fallback_model.as_deref(), |model| {
            self.complete(model, request)
        })
        .await
    }
}
