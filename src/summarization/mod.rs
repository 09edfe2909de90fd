//! Summarization backends and the chunk-and-merge [`Summarizer`].
//!
//! Backends are interchangeable behind [`SummaryBackend`]: a hosted chat-completions API or a
//! local Ollama runtime, selected by [`SummaryBackendKind`]. Both issue plain HTTP requests and
//! fall back once to an alternate model when the primary returns an empty or malformed answer.

mod chat;
mod ollama;
pub mod prompts;
mod summarizer;

pub use chat::RemoteChatBackend;
pub use ollama::LocalInferenceBackend;
pub use summarizer::{
    ChunkTiming, NoopObserver, SourceModel, Summarizer, SummarizerSettings, SummaryObserver,
    SummaryResult,
};

use crate::config::{ConfigError, SummaryBackendKind, SummaryConfig};
use crate::processing::ChunkingError;
use crate::retry::{RemoteCallError, RetryPolicy};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by summarization backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend could not be reached or is not set up.
    #[error("Summarization backend unavailable: {0}")]
    Unavailable(String),
    /// Remote call failed after retries; carries the backend's diagnostic.
    #[error("Summarization request failed: {0}")]
    Remote(#[from] RemoteCallError),
    /// Response could not be parsed.
    #[error("Malformed backend response: {0}")]
    InvalidResponse(String),
    /// Chunk parameters are invalid; a configuration fault, not an outage.
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ChunkingError),
    /// Response parsed but carried no text.
    #[error("Backend returned an empty response for model '{model}'")]
    EmptyResponse {
        /// Model that answered.
        model: String,
    },
}

impl BackendError {
    /// Whether trying an alternate model may help.
    fn is_model_specific(&self) -> bool {
        matches!(self, Self::InvalidResponse(_) | Self::EmptyResponse { .. })
    }
}

/// One generation call: instruction, content, and sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// System instruction.
    pub system: String,
    /// User content.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum generated length.
    pub max_output_tokens: u32,
}

/// Interface implemented by summarization providers.
#[async_trait]
pub trait SummaryBackend: Send + Sync {
    /// Backend identity, used for chunk-policy lookup.
    fn kind(&self) -> SummaryBackendKind;

    /// Primary model identity.
    fn model(&self) -> &str;

    /// Whether chunk summaries can be synthesized by a second call.
    fn supports_merge(&self) -> bool {
        true
    }

    /// Whether image inputs are understood.
    fn supports_images(&self) -> bool {
        false
    }

    /// Generate text for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError>;
}

/// Construct the configured backend; missing credentials fail here, before any document runs.
pub fn build_backend(
    config: &SummaryConfig,
    retry: &RetryPolicy,
) -> Result<Arc<dyn SummaryBackend>, ConfigError> {
    let backend: Arc<dyn SummaryBackend> = match config.backend {
        SummaryBackendKind::RemoteChat => Arc::new(RemoteChatBackend::new(config, retry.clone())?),
        SummaryBackendKind::LocalInference => {
            Arc::new(LocalInferenceBackend::new(config, retry.clone())?)
        }
    };
    tracing::debug!(
        backend = backend.kind().as_str(),
        model = backend.model(),
        "Initialized summarization backend"
    );
    Ok(backend)
}

/// Run `call` with the primary model, retrying once with `fallback` on model-specific failures.
pub(crate) async fn generate_with_fallback<'a, F, Fut>(
    primary: &'a str,
    fallback: Option<&'a str>,
    call: F,
) -> Result<String, BackendError>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<String, BackendError>>,
{
    match call(primary).await {
        Ok(text) => Ok(text),
        Err(err) if err.is_model_specific() => match fallback {
            Some(alternate) if alternate != primary => {
                tracing::warn!(
                    model = primary,
                    alternate,
                    error = %err,
                    "Retrying generation with alternate model"
                );
                call(alternate).await
            }
            _ => Err(err),
        },
        Err(err) => Err(err),
    }
}
