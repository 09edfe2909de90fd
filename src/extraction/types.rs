//! Extraction results and error definitions.

use crate::retry::RemoteCallError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Text and image files obtained from one extraction attempt.
///
/// Immutable once built; a new attempt produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    text: String,
    images: Vec<PathBuf>,
}

impl ExtractionResult {
    /// Bundle extracted text with the image files written for it.
    pub fn new(text: String, images: Vec<PathBuf>) -> Self {
        Self { text, images }
    }

    /// Extracted text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Image files, in extraction order.
    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    /// Whether the text is empty or whitespace only.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// Whether anything usable was obtained.
    pub fn has_content(&self) -> bool {
        self.has_text() || !self.images.is_empty()
    }

    /// Consume the result into its parts.
    pub fn into_parts(self) -> (String, Vec<PathBuf>) {
        (self.text, self.images)
    }
}

/// Strategy that actually produced an extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// Local PDF rendering.
    Local,
    /// Remote digitization service.
    Remote,
    /// Plain-text source read directly.
    Text,
}

impl ExtractionMethod {
    /// Label used in logs and output directory names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Text => "text",
        }
    }
}

/// Successful extraction together with the strategy that produced it.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Extracted content.
    pub result: ExtractionResult,
    /// Strategy that produced `result`.
    pub method: ExtractionMethod,
}

/// Errors raised while extracting content from a source document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The source document could not be opened.
    #[error("cannot open source {path}: {reason}")]
    SourceUnavailable {
        /// Source path.
        path: PathBuf,
        /// Underlying diagnostic.
        reason: String,
    },
    /// The local PDF parser failed.
    #[error("PDF parsing failed: {0}")]
    Pdf(String),
    /// The remote service could not be reached or kept failing.
    #[error("remote extraction failed: {0}")]
    Remote(#[from] RemoteCallError),
    /// Remote extraction is selected but not configured.
    #[error("remote extraction unavailable: {0}")]
    RemoteUnavailable(String),
    /// The remote response body was not JSON.
    #[error("unreadable extraction response: {0}")]
    InvalidResponse(String),
    /// Under `auto`, the remote attempt and the local fallback both failed.
    #[error("remote extraction failed ({remote}); local fallback failed ({local})")]
    AllStrategiesFailed {
        /// Remote diagnostic.
        remote: String,
        /// Local diagnostic.
        local: String,
    },
    /// Every configured strategy ran but yielded neither text nor images.
    #[error("no content could be extracted from {0}")]
    NoContent(PathBuf),
    /// Writing extracted artifacts failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being written or created.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractionError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
