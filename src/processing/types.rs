//! Core data types and error definitions for the processing pipeline.

use crate::config::{ConfigError, ParserPolicy};
use crate::extraction::ExtractionMethod;
use crate::summarization::SourceModel;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use super::registry::DocumentStatus;

/// Errors produced by invalid chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingError {
    /// Target size of zero can never make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for new text in every chunk.
    #[error("chunk overlap {overlap} must be smaller than chunk size {target_size}")]
    OverlapTooLarge {
        /// Requested overlap.
        overlap: usize,
        /// Requested target size.
        target_size: usize,
    },
}

/// Errors emitted by the document pipeline's public operations.
///
/// Extraction and summarization failures are not here: `process` records them in the
/// [`ProcessingOutcome`] and on the document itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No document with that id is registered.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// `combine` was requested before any document was processed.
    #[error("No processed documents available to combine")]
    NoProcessedDocuments,
    /// A run for this document is already in flight.
    #[error("Document is already being processed: {0}")]
    AlreadyProcessing(String),
    /// The source path to add does not exist.
    #[error("Source file does not exist: {0}")]
    MissingSource(PathBuf),
    /// Workspace storage could not be read or written.
    #[error("Workspace I/O failed for {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted record could not be encoded or decoded.
    #[error("Failed to (de)serialize {path}: {source}")]
    Serialization {
        /// File being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
    /// Components could not be constructed from configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }
}

/// Per-call options for processing a document.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Parser policy override; `None` uses the configured default.
    pub parser: Option<ParserPolicy>,
    /// Skip OCR even when an OCR collaborator is configured.
    pub skip_ocr: bool,
}

/// Result of one `process` call. Failures are captured here instead of being raised.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    /// Document that was processed.
    pub doc_id: String,
    /// Status after the run: `processed` or `failed`.
    pub status: DocumentStatus,
    /// Strategy that produced the extracted content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<ExtractionMethod>,
    /// Chunks summarized (1 when no chunking was needed).
    pub chunk_count: usize,
    /// Whether chunk summaries were synthesized by a merge call.
    pub merged: bool,
    /// Output directory holding this run's artifacts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Failure description when `status` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingOutcome {
    /// Whether the document ended up processed.
    pub fn is_success(&self) -> bool {
        self.status == DocumentStatus::Processed
    }
}

/// Answer to a cross-document question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    /// Question as asked.
    pub question: String,
    /// Generated answer on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Backend diagnostic on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model that was asked.
    pub model: SourceModel,
    /// Whether an answer was produced.
    pub success: bool,
    /// Whether the corpus had to be cut to fit the context budget.
    pub truncated: bool,
}
