//! Processing service coordinating extraction, OCR, summarization, and the document registry.

use crate::{
    config::{Config, ParserPolicy},
    extraction::{ExtractionMethod, Extractor},
    metrics::{MetricsSnapshot, PipelineMetrics},
    ocr::{HttpOcrClient, OcrClient, recognize_batch, render_ocr_text},
    processing::{
        combine::{COMBINED_FILE, render_corpus},
        context::truncate_context,
        persist,
        registry::{DocType, Document, DocumentRegistry, DocumentStatus, ProcessedData},
        types::{PipelineError, ProcessOptions, ProcessingOutcome, QueryAnswer},
    },
    summarization::Summarizer,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Components the pipeline runs with, assembled from configuration or by tests.
pub struct PipelineComponents {
    /// Text and image extraction.
    pub extractor: Extractor,
    /// Summarization and question answering.
    pub summarizer: Summarizer,
    /// OCR collaborator; `None` disables OCR.
    pub ocr: Option<Arc<dyn OcrClient>>,
    /// Parser policy used when a call does not override it.
    pub default_parser: ParserPolicy,
    /// Token budget of the query context.
    pub context_token_budget: usize,
}

/// Owns the document registry and runs extract → OCR → summarize → persist per document.
///
/// Construct the service once near process start and share it through an `Arc`; every
/// registry mutation is synchronized, so documents can be processed concurrently.
pub struct ProcessingService {
    workspace: PathBuf,
    registry: DocumentRegistry,
    extractor: Extractor,
    summarizer: Summarizer,
    ocr: Option<Arc<dyn OcrClient>>,
    default_parser: ParserPolicy,
    context_token_budget: usize,
    metrics: Arc<PipelineMetrics>,
}

/// Abstraction over the pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait ProcessingApi: Send + Sync {
    /// Register a source file; re-adding the same resolved path returns the existing id.
    async fn add_document(&self, path: PathBuf) -> Result<String, PipelineError>;

    /// Snapshot of every registered document.
    async fn list_documents(&self) -> Vec<Document>;

    /// Snapshot of one document.
    async fn get_document(&self, doc_id: &str) -> Result<Document, PipelineError>;

    /// Remove a document and its output storage. Returns `false` for unknown ids.
    async fn remove_document(&self, doc_id: &str) -> Result<bool, PipelineError>;

    /// Run the pipeline for one document. Stage failures land in the outcome, not in `Err`.
    async fn process_document(
        &self,
        doc_id: &str,
        options: ProcessOptions,
    ) -> Result<ProcessingOutcome, PipelineError>;

    /// Render processed documents into the combined corpus and store it in the workspace.
    async fn combine(&self) -> Result<String, PipelineError>;

    /// Answer a question from the budget-truncated combined corpus.
    async fn query(&self, question: &str) -> Result<QueryAnswer, PipelineError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

struct StageFailure {
    output_dir: Option<PathBuf>,
    message: String,
}

impl StageFailure {
    fn new(output_dir: Option<&Path>, message: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.map(Path::to_path_buf),
            message: message.into(),
        }
    }
}

impl ProcessingService {
    /// Build every component from configuration and open the workspace registry.
    ///
    /// Missing credentials for the selected backend fail here, before any document runs.
    pub async fn open(config: &Config) -> Result<Self, PipelineError> {
        let extractor = Extractor::from_config(config)?;
        let summarizer = Summarizer::from_config(&config.summary, &config.retry)?;
        let ocr = match &config.ocr {
            Some(ocr_config) => {
                let client = HttpOcrClient::new(ocr_config, config.retry.clone())?;
                if !client.health().await {
                    tracing::warn!(url = %ocr_config.url, "OCR server did not answer its health check");
                }
                Some(Arc::new(client) as Arc<dyn OcrClient>)
            }
            None => None,
        };
        tracing::info!(
            workspace = %config.workspace_dir.display(),
            backend = config.summary.backend.as_str(),
            remote_parser = extractor.has_remote(),
            ocr = ocr.is_some(),
            "Initializing processing service"
        );

        Self::with_components(
            &config.workspace_dir,
            PipelineComponents {
                extractor,
                summarizer,
                ocr,
                default_parser: config.digitizer.policy,
                context_token_budget: config.context_token_budget,
            },
        )
        .await
    }

    /// Open the registry in `workspace` and run with explicit components.
    pub async fn with_components(
        workspace: &Path,
        components: PipelineComponents,
    ) -> Result<Self, PipelineError> {
        let registry = DocumentRegistry::open(workspace).await?;
        let metrics = Arc::new(PipelineMetrics::new());
        let summarizer = components.summarizer.with_observer(metrics.clone());
        Ok(Self {
            workspace: workspace.to_path_buf(),
            registry,
            extractor: components.extractor,
            summarizer,
            ocr: components.ocr,
            default_parser: components.default_parser,
            context_token_budget: components.context_token_budget,
            metrics,
        })
    }

    /// Workspace directory.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Register a source file.
    pub async fn add(&self, path: &Path) -> Result<String, PipelineError> {
        let (doc_id, _) = self.registry.add(path).await?;
        Ok(doc_id)
    }

    /// Snapshot of every document.
    pub async fn list(&self) -> Vec<Document> {
        self.registry.list().await
    }

    /// Snapshot of one document.
    pub async fn get(&self, doc_id: &str) -> Result<Document, PipelineError> {
        self.registry
            .get(doc_id)
            .await
            .ok_or_else(|| PipelineError::NotFound(doc_id.to_string()))
    }

    /// Remove a document from any state, deleting its output directory.
    pub async fn remove(&self, doc_id: &str) -> Result<bool, PipelineError> {
        let Some(document) = self.registry.remove(doc_id).await? else {
            return Ok(false);
        };
        if let Some(dir) = &document.output_dir {
            if let Err(err) = persist::remove_output(dir).await {
                tracing::warn!(doc_id, error = %err, "Failed to delete output directory");
            }
        }
        tracing::info!(doc_id, filename = %document.filename, "Document removed");
        Ok(true)
    }

    /// Process one document.
    ///
    /// Only registry-level problems (unknown id, a run already in flight) are returned as
    /// `Err`; extraction and summarization failures mark the document failed and come back in
    /// the outcome.
    pub async fn process(
        &self,
        doc_id: &str,
        options: &ProcessOptions,
    ) -> Result<ProcessingOutcome, PipelineError> {
        let document = self.registry.begin_processing(doc_id).await?;
        let started = Instant::now();
        tracing::info!(
            doc_id,
            filename = %document.filename,
            doc_type = document.doc_type.as_str(),
            "Processing document"
        );

        let outcome = match self.run_pipeline(&document, options).await {
            Ok((output_dir, data)) => {
                let parser = data.parser;
                let (chunk_count, merged) = data
                    .summary
                    .as_ref()
                    .map_or((0, false), |summary| (summary.chunk_count, summary.merged));
                match self.registry.complete(doc_id, output_dir.clone(), data).await {
                    Ok(()) => {
                        self.metrics.record_processed();
                        tracing::info!(
                            doc_id,
                            chunks = chunk_count,
                            merged,
                            duration_ms = started.elapsed().as_millis() as u64,
                            "Document processed"
                        );
                        ProcessingOutcome {
                            doc_id: doc_id.to_string(),
                            status: DocumentStatus::Processed,
                            parser,
                            chunk_count,
                            merged,
                            output_dir: Some(output_dir),
                            error: None,
                        }
                    }
                    Err(PipelineError::NotFound(_)) => {
                        self.discard_removed_output(doc_id, Some(output_dir)).await
                    }
                    Err(err) => {
                        self.metrics.record_failed();
                        tracing::warn!(doc_id, error = %err, "Could not record processed document");
                        failed_outcome(doc_id, Some(output_dir), err.to_string())
                    }
                }
            }
            Err(failure) => {
                match self
                    .registry
                    .fail(doc_id, failure.output_dir.clone(), failure.message.clone())
                    .await
                {
                    Err(PipelineError::NotFound(_)) => {
                        self.discard_removed_output(doc_id, failure.output_dir).await
                    }
                    recorded => {
                        self.metrics.record_failed();
                        tracing::error!(doc_id, error = %failure.message, "Document processing failed");
                        if let Err(err) = recorded {
                            tracing::warn!(doc_id, error = %err, "Could not record failed document");
                        }
                        failed_outcome(doc_id, failure.output_dir, failure.message)
                    }
                }
            }
        };
        Ok(outcome)
    }

    /// The document was removed while its run was in flight: drop the run's output directory.
    async fn discard_removed_output(
        &self,
        doc_id: &str,
        output_dir: Option<PathBuf>,
    ) -> ProcessingOutcome {
        if let Some(dir) = &output_dir {
            if let Err(err) = persist::remove_output(dir).await {
                tracing::warn!(doc_id, error = %err, "Failed to delete output of removed document");
            }
        }
        tracing::info!(doc_id, "Document removed during processing; output discarded");
        failed_outcome(doc_id, None, "document was removed while processing".into())
    }

    /// Process `doc_id` on a background task.
    pub fn spawn_process(
        self: &Arc<Self>,
        doc_id: String,
        options: ProcessOptions,
    ) -> JoinHandle<Result<ProcessingOutcome, PipelineError>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.process(&doc_id, &options).await })
    }

    /// Render the combined corpus of processed documents and write it to the workspace.
    pub async fn combine(&self) -> Result<String, PipelineError> {
        let documents = self.registry.processed().await;
        if documents.is_empty() {
            return Err(PipelineError::NoProcessedDocuments);
        }
        let corpus = render_corpus(&documents);
        let path = self.workspace.join(COMBINED_FILE);
        tokio::fs::write(&path, &corpus)
            .await
            .map_err(|err| PipelineError::io(&path, err))?;
        tracing::info!(
            documents = documents.len(),
            chars = corpus.chars().count(),
            path = %path.display(),
            "Combined corpus written"
        );
        Ok(corpus)
    }

    /// Answer `question` from the combined corpus, truncated to the context budget.
    ///
    /// A backend failure yields an unsuccessful answer rather than an error.
    pub async fn query(&self, question: &str) -> Result<QueryAnswer, PipelineError> {
        let corpus = self.combine().await?;
        let context = truncate_context(&corpus, self.context_token_budget);
        let truncated = context.len() != corpus.len();
        if truncated {
            tracing::info!(
                budget = self.context_token_budget,
                corpus_chars = corpus.chars().count(),
                context_chars = context.chars().count(),
                "Query context truncated"
            );
        }

        let model = self.summarizer.source_model();
        let answer = match self.summarizer.answer(question, &context).await {
            Ok(answer) => QueryAnswer {
                question: question.to_string(),
                answer: Some(answer),
                error: None,
                model,
                success: true,
                truncated,
            },
            Err(err) => {
                tracing::error!(error = %err, "Question answering failed");
                QueryAnswer {
                    question: question.to_string(),
                    answer: None,
                    error: Some(err.to_string()),
                    model,
                    success: false,
                    truncated,
                }
            }
        };
        Ok(answer)
    }

    /// Save an answer under the workspace's `queries/` directory as Markdown and JSON.
    pub async fn save_query_result(
        &self,
        answer: &QueryAnswer,
    ) -> Result<(PathBuf, PathBuf), PipelineError> {
        persist::save_query_result(&self.workspace, answer).await
    }

    /// Return the current pipeline metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn run_pipeline(
        &self,
        document: &Document,
        options: &ProcessOptions,
    ) -> Result<(PathBuf, ProcessedData), StageFailure> {
        let label = match document.doc_type {
            DocType::Pdf => self
                .summarizer
                .source_model()
                .kind
                .as_str()
                .to_uppercase()
                .replace('-', "_"),
            DocType::Text => "TEXT".to_string(),
            DocType::Unknown => {
                return Err(StageFailure::new(
                    None,
                    format!("unsupported document type: {}", document.filename),
                ));
            }
        };
        let stem = document
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| document.doc_id.clone());
        let output_dir = persist::create_output_dir(&self.workspace, &stem, &label)
            .await
            .map_err(|err| StageFailure::new(None, err.to_string()))?;
        let dir = Some(output_dir.as_path());

        let (text, images, parser) = match document.doc_type {
            DocType::Pdf => {
                let policy = options.parser.unwrap_or(self.default_parser);
                let extraction = self
                    .extractor
                    .extract(&document.path, &output_dir, policy)
                    .await
                    .map_err(|err| StageFailure::new(dir, format!("extraction failed: {err}")))?;
                let method = extraction.method;
                let (text, images) = extraction.result.into_parts();
                (text, images, method)
            }
            _ => {
                let text = tokio::fs::read_to_string(&document.path)
                    .await
                    .map_err(|err| {
                        StageFailure::new(dir, format!("cannot read {}: {err}", document.filename))
                    })?;
                (text, Vec::new(), ExtractionMethod::Text)
            }
        };

        let ocr_text = match (&self.ocr, options.skip_ocr || images.is_empty()) {
            (Some(ocr), false) => {
                let results = recognize_batch(ocr.as_ref(), &images).await;
                let failures = results.values().filter(|result| result.is_err()).count();
                tracing::info!(
                    doc_id = %document.doc_id,
                    images = results.len(),
                    failures,
                    "OCR finished"
                );
                Some(render_ocr_text(&results)).filter(|text| !text.trim().is_empty())
            }
            _ => None,
        };

        let summary_input = match &ocr_text {
            Some(ocr) => format!("{text}\n\n## Text recognized in images\n\n{ocr}"),
            None => text.clone(),
        };
        if summary_input.trim().is_empty() {
            return Err(StageFailure::new(dir, "no text available to summarize"));
        }

        let summary = self
            .summarizer
            .summarize(&summary_input, &images)
            .await
            .map_err(|err| StageFailure::new(dir, format!("summarization failed: {err}")))?;

        let data = ProcessedData {
            extracted_text: text,
            extracted_images: images,
            ocr_text,
            summary: Some(summary),
            parser: Some(parser),
        };
        persist::write_artifacts(&output_dir, document, &data)
            .await
            .map_err(|err| StageFailure::new(dir, err.to_string()))?;
        Ok((output_dir, data))
    }
}

fn failed_outcome(doc_id: &str, output_dir: Option<PathBuf>, error: String) -> ProcessingOutcome {
    ProcessingOutcome {
        doc_id: doc_id.to_string(),
        status: DocumentStatus::Failed,
        parser: None,
        chunk_count: 0,
        merged: false,
        output_dir,
        error: Some(error),
    }
}

#[async_trait]
impl ProcessingApi for ProcessingService {
    async fn add_document(&self, path: PathBuf) -> Result<String, PipelineError> {
        ProcessingService::add(self, &path).await
    }

    async fn list_documents(&self) -> Vec<Document> {
        ProcessingService::list(self).await
    }

    async fn get_document(&self, doc_id: &str) -> Result<Document, PipelineError> {
        ProcessingService::get(self, doc_id).await
    }

    async fn remove_document(&self, doc_id: &str) -> Result<bool, PipelineError> {
        ProcessingService::remove(self, doc_id).await
    }

    async fn process_document(
        &self,
        doc_id: &str,
        options: ProcessOptions,
    ) -> Result<ProcessingOutcome, PipelineError> {
        ProcessingService::process(self, doc_id, &options).await
    }

    async fn combine(&self) -> Result<String, PipelineError> {
        ProcessingService::combine(self).await
    }

    async fn query(&self, question: &str) -> Result<QueryAnswer, PipelineError> {
        ProcessingService::query(self, question).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        ProcessingService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryBackendKind;
    use crate::extraction::LocalExtractor;
    use crate::processing::chunking::ChunkPolicy;
    use crate::summarization::{
        BackendError, GenerationRequest, SummarizerSettings, SummaryBackend,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes a fixed summary and fails on prompts containing `FAIL`.
    struct Canned {
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl Canned {
        fn new() -> Self {
            Self::slow(Duration::ZERO)
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                delay,
            }
        }
    }

    #[async_trait]
    impl SummaryBackend for Canned {
        fn kind(&self) -> SummaryBackendKind {
            SummaryBackendKind::LocalInference
        }

        fn model(&self) -> &str {
            "canned"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, BackendError> {
            self.calls.lock().expect("lock").push(request.prompt.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if request.prompt.contains("FAIL") {
                return Err(BackendError::Unavailable("backend offline".into()));
            }
            Ok("canned answer".into())
        }
    }

    async fn service(workspace: &Path, budget: usize) -> ProcessingService {
        service_with(workspace, budget, Canned::new()).await
    }

    async fn service_with(workspace: &Path, budget: usize, backend: Canned) -> ProcessingService {
        let summarizer = Summarizer::new(
            Arc::new(backend),
            SummarizerSettings {
                policy: ChunkPolicy {
                    threshold: 2000,
                    target_size: 1000,
                    overlap: 100,
                },
                merge_enabled: true,
                language: "English".into(),
                temperature: 0.3,
                max_output_tokens: 500,
            },
        )
        .expect("summarizer");
        ProcessingService::with_components(
            workspace,
            PipelineComponents {
                extractor: Extractor::new(Arc::new(LocalExtractor), None, false),
                summarizer,
                ocr: None,
                default_parser: ParserPolicy::Local,
                context_token_budget: budget,
            },
        )
        .await
        .expect("service")
    }

    fn write_source(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write source");
        path
    }

    #[tokio::test]
    async fn text_documents_are_processed_and_persisted() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let source = write_source(workspace.path(), "notes.txt", "Quarterly notes.");
        let service = service(workspace.path(), 8000).await;

        let doc_id = service.add(&source).await.expect("add");
        let outcome = service
            .process(&doc_id, &ProcessOptions::default())
            .await
            .expect("outcome");
        assert!(outcome.is_success());
        assert_eq!(outcome.parser, Some(ExtractionMethod::Text));
        let output_dir = outcome.output_dir.expect("output dir");
        assert!(output_dir.join(persist::SUMMARY_JSON).is_file());
        let name = output_dir.file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with("notes_TEXT_"));

        let document = service.get(&doc_id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Processed);
        assert_eq!(service.metrics_snapshot().documents_processed, 1);
    }

    #[tokio::test]
    async fn summarization_failure_marks_document_failed() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let source = write_source(workspace.path(), "bad.md", "FAIL please");
        let service = service(workspace.path(), 8000).await;

        let doc_id = service.add(&source).await.expect("add");
        let outcome = service
            .process(&doc_id, &ProcessOptions::default())
            .await
            .expect("outcome");
        assert_eq!(outcome.status, DocumentStatus::Failed);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("backend offline"));
        let document = service.get(&doc_id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Failed);
        assert!(document.error.is_some());
        assert!(matches!(
            service.combine().await.unwrap_err(),
            PipelineError::NoProcessedDocuments
        ));
    }

    #[tokio::test]
    async fn unknown_types_fail_without_output() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let source = write_source(workspace.path(), "sheet.xlsx", "cells");
        let service = service(workspace.path(), 8000).await;

        let doc_id = service.add(&source).await.expect("add");
        let outcome = service
            .process(&doc_id, &ProcessOptions::default())
            .await
            .expect("outcome");
        assert!(!outcome.is_success());
        assert!(outcome.output_dir.is_none());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let service = service(workspace.path(), 8000).await;
        let error = service
            .process("missing", &ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::NotFound(_)));
        assert!(!service.remove("missing").await.expect("remove"));
    }

    #[tokio::test]
    async fn remove_deletes_output_storage() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let source = write_source(workspace.path(), "a.txt", "Alpha body.");
        let service = service(workspace.path(), 8000).await;
        let doc_id = service.add(&source).await.expect("add");
        let outcome = service
            .process(&doc_id, &ProcessOptions::default())
            .await
            .expect("outcome");
        let output_dir = outcome.output_dir.expect("output dir");

        assert!(service.remove(&doc_id).await.expect("remove"));
        assert!(!output_dir.exists());
        assert!(service.list().await.is_empty());
    }

    #[tokio::test]
    async fn removal_during_processing_discards_the_run_output() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let source = write_source(workspace.path(), "a.txt", "Alpha body.");
        let service = Arc::new(
            service_with(workspace.path(), 8000, Canned::slow(Duration::from_millis(300))).await,
        );
        let doc_id = service.add(&source).await.expect("add");

        let handle = service.spawn_process(doc_id.clone(), ProcessOptions::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(service.remove(&doc_id).await.expect("remove"));
        let outcome = handle.await.expect("join").expect("outcome");

        assert!(!outcome.is_success());
        assert!(outcome.output_dir.is_none());
        let output_root = workspace.path().join(persist::OUTPUT_DIR);
        let leftovers = match std::fs::read_dir(&output_root) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        };
        assert_eq!(leftovers, 0);
        assert!(service.list().await.is_empty());
        assert_eq!(service.metrics_snapshot().documents_failed, 0);
    }

    #[tokio::test]
    async fn failed_registry_save_does_not_leave_document_processing() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let source = write_source(workspace.path(), "a.txt", "Alpha body.");
        let service = service(workspace.path(), 8000).await;
        let doc_id = service.add(&source).await.expect("add");

        let staging = workspace.path().join("documents_metadata.json.tmp");
        std::fs::create_dir(&staging).expect("block staging file");
        let error = service
            .process(&doc_id, &ProcessOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, PipelineError::Io { .. }));
        let document = service.get(&doc_id).await.expect("document");
        assert_eq!(document.status, DocumentStatus::Unprocessed);

        std::fs::remove_dir(&staging).expect("unblock staging file");
        let outcome = service
            .process(&doc_id, &ProcessOptions::default())
            .await
            .expect("outcome");
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn query_answers_from_combined_corpus_and_saves_results() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let service = Arc::new(service(workspace.path(), 8000).await);
        let mut handles = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            let source = write_source(workspace.path(), name, &format!("Body of {name}."));
            let doc_id = service.add(&source).await.expect("add");
            handles.push(service.spawn_process(doc_id, ProcessOptions::default()));
        }
        for handle in handles {
            assert!(handle.await.expect("join").expect("outcome").is_success());
        }

        let answer = service.query("What is in the documents?").await.expect("answer");
        assert!(answer.success);
        assert_eq!(answer.answer.as_deref(), Some("canned answer"));
        assert!(!answer.truncated);
        assert!(workspace.path().join(COMBINED_FILE).is_file());

        let (md, json) = service.save_query_result(&answer).await.expect("save");
        assert!(md.is_file() && json.is_file());
    }

    #[tokio::test]
    async fn tight_budget_truncates_query_context() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let service = service(workspace.path(), 60).await;
        for name in ["a.txt", "b.txt"] {
            let source = write_source(workspace.path(), name, "Some body text.");
            let doc_id = service.add(&source).await.expect("add");
            service
                .process(&doc_id, &ProcessOptions::default())
                .await
                .expect("outcome");
        }
        let answer = service.query("Summarize").await.expect("answer");
        assert!(answer.truncated);
    }
}
