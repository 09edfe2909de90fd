//! Document registry owned by the pipeline, persisted to `documents_metadata.json`.
//!
//! All mutations go through one `RwLock`, so status flips and processed-data writes from
//! concurrently processing documents never interleave within a document. Readers get cloned
//! snapshots. Every mutation re-saves the metadata file; saves are serialized so the file always
//! reflects a complete snapshot.

use super::persist;
use super::types::PipelineError;
use crate::extraction::ExtractionMethod;
use crate::summarization::SummaryResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Metadata file name inside the workspace.
pub const METADATA_FILE: &str = "documents_metadata.json";

/// Source document type, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// PDF; goes through extraction.
    Pdf,
    /// Plain text or Markdown; read directly.
    Text,
    /// Anything else; processing fails.
    Unknown,
}

impl DocType {
    /// Classify `path` by extension.
    pub fn detect(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("pdf") => Self::Pdf,
            Some("txt" | "md" | "markdown") => Self::Text,
            _ => Self::Unknown,
        }
    }

    /// Lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Unknown => "unknown",
        }
    }
}

/// Lifecycle position of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Added, never processed.
    Unprocessed,
    /// A pipeline run is in flight.
    Processing,
    /// Last run succeeded.
    Processed,
    /// Last run failed; `error` says why.
    Failed,
}

impl DocumentStatus {
    /// Lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unprocessed => "unprocessed",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

/// Everything a successful run produced for a document. Stored as `summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessedData {
    /// Extracted (or read) text.
    #[serde(rename = "text")]
    pub extracted_text: String,
    /// Image files written during extraction.
    #[serde(rename = "images", default)]
    pub extracted_images: Vec<PathBuf>,
    /// Rendered OCR text of the images.
    #[serde(rename = "ocr", default)]
    pub ocr_text: Option<String>,
    /// Summary of the document.
    #[serde(default)]
    pub summary: Option<SummaryResult>,
    /// Strategy that produced the text.
    #[serde(default)]
    pub parser: Option<ExtractionMethod>,
}

/// A registered document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque identity.
    pub doc_id: String,
    /// File name of the source.
    pub filename: String,
    /// Resolved source path.
    pub path: PathBuf,
    /// Detected type.
    pub doc_type: DocType,
    /// Lifecycle status.
    pub status: DocumentStatus,
    /// Output directory of the latest run.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// RFC 3339 timestamp of registration.
    pub added_date: String,
    /// Failure description of the latest run.
    #[serde(default)]
    pub error: Option<String>,
    /// Results of the latest successful run; persisted separately in the output directory.
    #[serde(skip)]
    pub processed: Option<ProcessedData>,
}

impl Document {
    fn new(path: PathBuf) -> Self {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            doc_id: Uuid::new_v4().to_string(),
            filename,
            doc_type: DocType::detect(&path),
            path,
            status: DocumentStatus::Unprocessed,
            output_dir: None,
            added_date: now_rfc3339(),
            error: None,
            processed: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MetadataFile {
    last_updated: String,
    #[serde(default)]
    documents: Vec<Document>,
}

/// Authoritative, persisted set of documents.
pub struct DocumentRegistry {
    metadata_path: PathBuf,
    documents: RwLock<Vec<Document>>,
    save_lock: Mutex<()>,
}

impl DocumentRegistry {
    /// Open the registry stored in `workspace`, creating the workspace when missing.
    ///
    /// Entries whose source file vanished are skipped. Processed entries get their results
    /// reloaded from the output directory; a run interrupted mid-flight is recorded as failed.
    pub async fn open(workspace: &Path) -> Result<Self, PipelineError> {
        tokio::fs::create_dir_all(workspace)
            .await
            .map_err(|err| PipelineError::io(workspace, err))?;
        let metadata_path = workspace.join(METADATA_FILE);

        let mut documents = Vec::new();
        match tokio::fs::read(&metadata_path).await {
            Ok(bytes) => {
                let file: MetadataFile = serde_json::from_slice(&bytes)
                    .map_err(|err| PipelineError::serialization(&metadata_path, err))?;
                for mut document in file.documents {
                    if !document.path.exists() {
                        tracing::warn!(
                            doc_id = %document.doc_id,
                            path = %document.path.display(),
                            "Source file missing; dropping document from registry"
                        );
                        continue;
                    }
                    restore(&mut document).await;
                    documents.push(document);
                }
                tracing::info!(documents = documents.len(), "Loaded document registry");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %metadata_path.display(), "No registry yet; starting empty");
            }
            Err(err) => return Err(PipelineError::io(&metadata_path, err)),
        }

        Ok(Self {
            metadata_path,
            documents: RwLock::new(documents),
            save_lock: Mutex::new(()),
        })
    }

    /// Register `path`, or return the existing id when the resolved path is already known.
    ///
    /// The boolean is `true` when a new entry was created.
    pub async fn add(&self, path: &Path) -> Result<(String, bool), PipelineError> {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|_| PipelineError::MissingSource(path.to_path_buf()))?;
        if !resolved.is_file() {
            return Err(PipelineError::MissingSource(path.to_path_buf()));
        }

        let doc_id = {
            let mut documents = self.documents.write().await;
            if let Some(existing) = documents.iter().find(|doc| doc.path == resolved) {
                tracing::debug!(doc_id = %existing.doc_id, "Document already registered");
                return Ok((existing.doc_id.clone(), false));
            }
            let document = Document::new(resolved);
            tracing::info!(
                doc_id = %document.doc_id,
                filename = %document.filename,
                doc_type = document.doc_type.as_str(),
                "Document added"
            );
            let doc_id = document.doc_id.clone();
            documents.push(document);
            doc_id
        };
        self.save().await?;
        Ok((doc_id, true))
    }

    /// Snapshot of one document.
    pub async fn get(&self, doc_id: &str) -> Option<Document> {
        self.documents
            .read()
            .await
            .iter()
            .find(|doc| doc.doc_id == doc_id)
            .cloned()
    }

    /// Snapshot of every document, in registration order.
    pub async fn list(&self) -> Vec<Document> {
        self.documents.read().await.clone()
    }

    /// Snapshot of processed documents that carry results, in registration order.
    pub async fn processed(&self) -> Vec<Document> {
        self.documents
            .read()
            .await
            .iter()
            .filter(|doc| doc.status == DocumentStatus::Processed && doc.processed.is_some())
            .cloned()
            .collect()
    }

    /// Remove a document, returning it when it existed.
    pub async fn remove(&self, doc_id: &str) -> Result<Option<Document>, PipelineError> {
        let removed = {
            let mut documents = self.documents.write().await;
            documents
                .iter()
                .position(|doc| doc.doc_id == doc_id)
                .map(|index| documents.remove(index))
        };
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }

    /// Move a document into `processing`, rejecting a second concurrent run.
    ///
    /// When the registry cannot be saved the previous status is restored, so a later call can
    /// start the run once storage recovers.
    pub async fn begin_processing(&self, doc_id: &str) -> Result<Document, PipelineError> {
        let mut previous = None;
        let document = self
            .update(doc_id, |doc| {
                if doc.status == DocumentStatus::Processing {
                    return Err(PipelineError::AlreadyProcessing(doc.doc_id.clone()));
                }
                previous = Some((doc.status, doc.error.take()));
                doc.status = DocumentStatus::Processing;
                Ok(())
            })
            .await?;
        if let Err(err) = self.save().await {
            if let Some((status, error)) = previous {
                let rollback = self
                    .update(doc_id, |doc| {
                        doc.status = status;
                        doc.error = error;
                        Ok(())
                    })
                    .await;
                if let Err(rollback_err) = rollback {
                    tracing::debug!(doc_id, error = %rollback_err, "Nothing to roll back");
                }
            }
            tracing::warn!(doc_id, error = %err, "Could not persist processing state");
            return Err(err);
        }
        Ok(document)
    }

    /// Record a successful run.
    pub async fn complete(
        &self,
        doc_id: &str,
        output_dir: PathBuf,
        data: ProcessedData,
    ) -> Result<(), PipelineError> {
        self.update(doc_id, |doc| {
            doc.status = DocumentStatus::Processed;
            doc.output_dir = Some(output_dir);
            doc.processed = Some(data);
            doc.error = None;
            Ok(())
        })
        .await?;
        self.save().await
    }

    /// Record a failed run; results of earlier runs are discarded.
    pub async fn fail(
        &self,
        doc_id: &str,
        output_dir: Option<PathBuf>,
        error: String,
    ) -> Result<(), PipelineError> {
        self.update(doc_id, |doc| {
            doc.status = DocumentStatus::Failed;
            if output_dir.is_some() {
                doc.output_dir = output_dir;
            }
            doc.processed = None;
            doc.error = Some(error);
            Ok(())
        })
        .await?;
        self.save().await
    }

    async fn update<F>(&self, doc_id: &str, mutate: F) -> Result<Document, PipelineError>
    where
        F: FnOnce(&mut Document) -> Result<(), PipelineError>,
    {
        let mut documents = self.documents.write().await;
        let document = documents
            .iter_mut()
            .find(|doc| doc.doc_id == doc_id)
            .ok_or_else(|| PipelineError::NotFound(doc_id.to_string()))?;
        mutate(document)?;
        Ok(document.clone())
    }

    async fn save(&self) -> Result<(), PipelineError> {
        let _guard = self.save_lock.lock().await;
        let file = MetadataFile {
            last_updated: now_rfc3339(),
            documents: self.documents.read().await.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)
            .map_err(|err| PipelineError::serialization(&self.metadata_path, err))?;

        let staging = self.metadata_path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|err| PipelineError::io(&staging, err))?;
        tokio::fs::rename(&staging, &self.metadata_path)
            .await
            .map_err(|err| PipelineError::io(&self.metadata_path, err))?;
        tracing::debug!(documents = file.documents.len(), "Registry saved");
        Ok(())
    }
}

async fn restore(document: &mut Document) {
    match document.status {
        DocumentStatus::Processing => {
            document.status = DocumentStatus::Failed;
            document.error = Some("processing was interrupted".into());
        }
        DocumentStatus::Processed => {
            let loaded = match &document.output_dir {
                Some(dir) => persist::load_processed(dir).await,
                None => Err("no output directory recorded".to_string()),
            };
            match loaded {
                Ok(data) => document.processed = Some(data),
                Err(reason) => {
                    tracing::warn!(
                        doc_id = %document.doc_id,
                        reason = %reason,
                        "Processed results unavailable; document must be reprocessed"
                    );
                    document.status = DocumentStatus::Failed;
                    document.error = Some(format!("processed results unavailable: {reason}"));
                }
            }
        }
        DocumentStatus::Unprocessed | DocumentStatus::Failed => {}
    }
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
