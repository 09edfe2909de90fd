//! Chunk-and-merge orchestration over a [`SummaryBackend`].

use super::prompts;
use super::{BackendError, GenerationRequest, SummaryBackend, build_backend};
use crate::config::{ConfigError, SummaryBackendKind, SummaryConfig};
use crate::processing::chunking::{ChunkPolicy, chunk_policy_for, chunk_text};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of the model that produced a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceModel {
    /// Backend variant.
    #[serde(rename = "type")]
    pub kind: SummaryBackendKind,
    /// Model identity.
    pub name: String,
}

/// Final summary of a text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    /// Summary text.
    pub text: String,
    /// Model that produced it.
    pub source_model: SourceModel,
    /// Chunks summarized; 1 when the text fit in a single call.
    pub chunk_count: usize,
    /// Whether a merge call synthesized the chunk summaries.
    pub merged: bool,
}

/// Wall-clock timing of one chunk summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTiming {
    /// 1-based chunk position.
    pub index: usize,
    /// Number of chunks in the document.
    pub total: usize,
    /// Characters in the chunk.
    pub chars: usize,
    /// Time spent in the backend call.
    pub duration: Duration,
}

/// Instrumentation hook notified as chunked summarization progresses.
pub trait SummaryObserver: Send + Sync {
    /// A chunk summary finished.
    fn chunk_summarized(&self, _timing: &ChunkTiming) {}

    /// A merge call finished.
    fn merge_completed(&self, _parts: usize, _duration: Duration) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SummaryObserver for NoopObserver {}

/// Tunables of a [`Summarizer`].
#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    /// When and how to chunk.
    pub policy: ChunkPolicy,
    /// Whether chunk summaries are synthesized by a merge call.
    pub merge_enabled: bool,
    /// Output language requested in prompts.
    pub language: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum generated length per call.
    pub max_output_tokens: u32,
}

impl SummarizerSettings {
    /// Settings for `config`, with the chunk policy looked up by backend identity.
    pub fn from_config(config: &SummaryConfig) -> Self {
        let policy = chunk_policy_for(config.backend.as_str()).with_overrides(
            config.chunk_threshold,
            config.chunk_size,
            config.chunk_overlap,
        );
        Self {
            policy,
            merge_enabled: config.merge_enabled,
            language: config.language.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// Summarizes texts of any length through one backend.
#[derive(Clone)]
pub struct Summarizer {
    backend: Arc<dyn SummaryBackend>,
    settings: SummarizerSettings,
    observer: Arc<dyn SummaryObserver>,
}

impl Summarizer {
    /// Wrap `backend`; invalid chunk parameters are rejected here.
    pub fn new(
        backend: Arc<dyn SummaryBackend>,
        settings: SummarizerSettings,
    ) -> Result<Self, ConfigError> {
        settings.policy.validate()?;
        Ok(Self {
            backend,
            settings,
            observer: Arc::new(NoopObserver),
        })
    }

    /// Build the configured backend and wrap it.
    pub fn from_config(config: &SummaryConfig, retry: &RetryPolicy) -> Result<Self, ConfigError> {
        let backend = build_backend(config, retry)?;
        Self::new(backend, SummarizerSettings::from_config(config))
    }

    /// Attach an instrumentation observer.
    pub fn with_observer(mut self, observer: Arc<dyn SummaryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Identity of the backend model.
    pub fn source_model(&self) -> SourceModel {
        SourceModel {
            kind: self.backend.kind(),
            name: self.backend.model().to_string(),
        }
    }

    /// Active settings.
    pub fn settings(&self) -> &SummarizerSettings {
        &self.settings
    }

    /// Summarize `text`, chunking and merging when it exceeds the backend's threshold.
    ///
    /// Images are accepted for forward compatibility; backends without image support only
    /// have their count mentioned in the prompt.
    pub async fn summarize(
        &self,
        text: &str,
        images: &[PathBuf],
    ) -> Result<SummaryResult, BackendError> {
        let image_count = if images.is_empty() || self.backend.supports_images() {
            0
        } else {
            tracing::debug!(
                images = images.len(),
                backend = self.backend.kind().as_str(),
                "Backend ignores image inputs"
            );
            images.len()
        };

        let length = text.chars().count();
        if length <= self.settings.policy.threshold {
            let prompt = prompts::summary_prompt(text, &self.settings.language, image_count);
            let summary = self.backend.generate(&self.request(prompt)).await?;
            return Ok(self.result(summary, 1, false));
        }

        let ChunkPolicy {
            target_size,
            overlap,
            ..
        } = self.settings.policy;
        let chunks = chunk_text(text, target_size, overlap)?;
        let total = chunks.len();
        tracing::info!(
            chars = length,
            threshold = self.settings.policy.threshold,
            chunks = total,
            "Text exceeds threshold; summarizing in chunks"
        );

        let mut summaries = Vec::with_capacity(total);
        for chunk in &chunks {
            let prompt =
                prompts::chunk_prompt(&chunk.text, &self.settings.language, chunk.index + 1, total);
            let started = Instant::now();
            let summary = self.backend.generate(&self.request(prompt)).await?;
            let timing = ChunkTiming {
                index: chunk.index + 1,
                total,
                chars: chunk.end - chunk.start,
                duration: started.elapsed(),
            };
            self.observer.chunk_summarized(&timing);
            summaries.push(summary);
        }

        if summaries.len() == 1 {
            let only = summaries.remove(0);
            return Ok(self.result(only, 1, false));
        }
        if !(self.settings.merge_enabled && self.backend.supports_merge()) {
            return Ok(self.result(prompts::concatenate_parts(&summaries), total, false));
        }

        let started = Instant::now();
        let prompt = prompts::merge_prompt(&summaries, &self.settings.language);
        let merged = self.backend.generate(&self.request(prompt)).await?;
        self.observer.merge_completed(total, started.elapsed());
        Ok(self.result(merged, total, true))
    }

    /// Answer `question` using `context` as the only source.
    pub async fn answer(&self, question: &str, context: &str) -> Result<String, BackendError> {
        let request = GenerationRequest {
            system: prompts::QA_SYSTEM.to_string(),
            prompt: prompts::qa_prompt(question, context, &self.settings.language),
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        };
        self.backend.generate(&request).await
    }

    fn request(&self, prompt: String) -> GenerationRequest {
        GenerationRequest {
            system: prompts::SUMMARY_SYSTEM.to_string(),
            prompt,
            temperature: self.settings.temperature,
            max_output_tokens: self.settings.max_output_tokens,
        }
    }

    fn result(&self, text: String, chunk_count: usize, merged: bool) -> SummaryResult {
        SummaryResult {
            text,
            source_model: self.source_model(),
            chunk_count,
            merged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ChunkingError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend answering each call with `summary-{n}` and recording prompts.
    struct Recording {
        prompts: Mutex<Vec<String>>,
        merge: bool,
    }

    impl Recording {
        fn new(merge: bool) -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
                merge,
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl SummaryBackend for Recording {
        fn kind(&self) -> SummaryBackendKind {
            SummaryBackendKind::LocalInference
        }

        fn model(&self) -> &str {
            "recording"
        }

        fn supports_merge(&self) -> bool {
            self.merge
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
            let mut prompts = self.prompts.lock().expect("lock");
            prompts.push(request.prompt.clone());
            Ok(format!("summary-{}", prompts.len()))
        }
    }

    #[derive(Default)]
    struct Counting {
        chunks: Mutex<Vec<usize>>,
        merges: Mutex<usize>,
    }

    impl SummaryObserver for Counting {
        fn chunk_summarized(&self, timing: &ChunkTiming) {
            self.chunks.lock().expect("lock").push(timing.index);
        }

        fn merge_completed(&self, _parts: usize, _duration: Duration) {
            *self.merges.lock().expect("lock") += 1;
        }
    }

    fn settings(threshold: usize, target_size: usize, overlap: usize) -> SummarizerSettings {
        SummarizerSettings {
            policy: ChunkPolicy {
                threshold,
                target_size,
                overlap,
            },
            merge_enabled: true,
            language: "English".into(),
            temperature: 0.3,
            max_output_tokens: 2000,
        }
    }

    fn document(chars: usize) -> String {
        let unit = format!(" {}.", "a".repeat(98));
        unit.repeat(chars / 100)
    }

    #[tokio::test]
    async fn short_text_uses_a_single_call() {
        let backend = Recording::new(true);
        let summarizer = Summarizer::new(backend.clone(), settings(2000, 1000, 100)).expect("ok");

        let result = summarizer.summarize(&document(1500), &[]).await.expect("summary");
        assert_eq!(backend.prompts().len(), 1);
        assert_eq!(result.text, "summary-1");
        assert_eq!(result.chunk_count, 1);
        assert!(!result.merged);
        assert_eq!(result.source_model.name, "recording");
    }

    #[tokio::test]
    async fn long_text_is_chunked_then_merged() {
        let backend = Recording::new(true);
        let observer = Arc::new(Counting::default());
        let summarizer = Summarizer::new(backend.clone(), settings(2000, 1000, 100))
            .expect("ok")
            .with_observer(observer.clone());

        let result = summarizer.summarize(&document(5000), &[]).await.expect("summary");
        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 6);
        assert!(prompts[5].contains("[Part 1]\nsummary-1"));
        assert!(prompts[5].contains("[Part 5]\nsummary-5"));
        assert_eq!(result.text, "summary-6");
        assert!(result.merged);
        assert_eq!(*observer.chunks.lock().expect("lock"), vec![1, 2, 3, 4, 5]);
        assert_eq!(*observer.merges.lock().expect("lock"), 1);
    }

    #[tokio::test]
    async fn backends_without_merge_get_labeled_concatenation() {
        let backend = Recording::new(false);
        let summarizer = Summarizer::new(backend.clone(), settings(2000, 1000, 100)).expect("ok");

        let result = summarizer.summarize(&document(3000), &[]).await.expect("summary");
        assert_eq!(backend.prompts().len(), 3);
        assert_eq!(
            result.text,
            "=== Part 1 ===\nsummary-1\n\n=== Part 2 ===\nsummary-2\n\n=== Part 3 ===\nsummary-3"
        );
        assert!(!result.merged);
    }

    #[tokio::test]
    async fn images_are_noted_but_not_sent() {
        let backend = Recording::new(true);
        let summarizer = Summarizer::new(backend.clone(), settings(2000, 1000, 100)).expect("ok");
        summarizer
            .summarize("short text", &[PathBuf::from("images/page1_img1.png")])
            .await
            .expect("summary");
        assert!(backend.prompts()[0].contains("1 image(s)"));
    }

    #[tokio::test]
    async fn invalid_chunk_parameters_surface_as_configuration_faults() {
        let backend = Recording::new(true);
        let summarizer = Summarizer {
            backend: backend.clone(),
            settings: settings(100, 50, 50),
            observer: Arc::new(NoopObserver),
        };
        let error = summarizer.summarize(&"word ".repeat(40), &[]).await.unwrap_err();

        assert!(matches!(error, BackendError::Chunking(ChunkingError::OverlapTooLarge { .. })));
        assert!(backend.prompts().is_empty());
    }

    #[test]
    fn invalid_policy_is_rejected_eagerly() {
        let error = Summarizer::new(Recording::new(true), settings(10, 10, 10))
            .err()
            .expect("invalid");
        assert!(matches!(error, ConfigError::Chunking(_)));
    }
}
