//! Per-document output directories and the artifacts written into them.

use super::registry::{Document, ProcessedData, now_rfc3339};
use super::types::{PipelineError, QueryAnswer};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;

/// Workspace subdirectory holding one directory per processing run.
pub const OUTPUT_DIR: &str = "output";
/// Workspace subdirectory holding saved query answers.
pub const QUERIES_DIR: &str = "queries";
/// Rendered Markdown report.
pub const SUMMARY_MD: &str = "summary.md";
/// Plain summary text.
pub const SUMMARY_TXT: &str = "summary.txt";
/// Machine-readable results, reloaded when the registry opens.
pub const SUMMARY_JSON: &str = "summary.json";

const REPORT_TEXT_PREVIEW: usize = 2000;

/// Compact UTC timestamp used in directory and file names.
pub fn timestamp() -> String {
    let format = format_description!("[year][month][day]_[hour][minute][second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "00000000_000000".into())
}

/// Create a fresh `output/{stem}_{label}_{timestamp}` directory, suffixing `_n` on collision.
///
/// Existing directories from earlier runs are never reused.
pub async fn create_output_dir(
    workspace: &Path,
    stem: &str,
    label: &str,
) -> Result<PathBuf, PipelineError> {
    let root = workspace.join(OUTPUT_DIR);
    tokio::fs::create_dir_all(&root)
        .await
        .map_err(|err| PipelineError::io(&root, err))?;

    let base = format!("{stem}_{label}_{}", timestamp());
    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => base.clone(),
            n => format!("{base}_{n}"),
        };
        let candidate = root.join(name);
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(PipelineError::io(&candidate, err)),
        }
    }
}

/// Write `summary.md`, `summary.txt`, and `summary.json` into `dir`.
pub async fn write_artifacts(
    dir: &Path,
    document: &Document,
    data: &ProcessedData,
) -> Result<(), PipelineError> {
    let report = render_report(document, data);
    write(dir.join(SUMMARY_MD), report.into_bytes()).await?;

    let summary_text = data
        .summary
        .as_ref()
        .map(|summary| summary.text.clone())
        .unwrap_or_default();
    write(dir.join(SUMMARY_TXT), summary_text.into_bytes()).await?;

    let json_path = dir.join(SUMMARY_JSON);
    let json = serde_json::to_vec_pretty(data)
        .map_err(|err| PipelineError::serialization(&json_path, err))?;
    write(json_path, json).await
}

/// Reload the results of a processed run.
pub async fn load_processed(dir: &Path) -> Result<ProcessedData, String> {
    let path = dir.join(SUMMARY_JSON);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|err| format!("{}: {err}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|err| format!("{}: {err}", path.display()))
}

/// Delete an output directory; a directory that is already gone is not an error.
pub async fn remove_output(dir: &Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PipelineError::io(dir, err)),
    }
}

/// Save a query answer as Markdown and JSON under `queries/`, returning both paths.
pub async fn save_query_result(
    workspace: &Path,
    answer: &QueryAnswer,
) -> Result<(PathBuf, PathBuf), PipelineError> {
    let dir = workspace.join(QUERIES_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|err| PipelineError::io(&dir, err))?;
    let stem = format!("query_{}", timestamp());

    let mut markdown = format!("# Query\n\n{}\n\n", answer.question);
    markdown.push_str(&format!(
        "- **Model**: {} ({})\n- **Answered**: {}\n\n",
        answer.model.name,
        answer.model.kind.as_str(),
        now_rfc3339()
    ));
    match (&answer.answer, &answer.error) {
        (Some(text), _) => markdown.push_str(&format!("## Answer\n\n{text}\n")),
        (None, Some(error)) => markdown.push_str(&format!("## Error\n\n{error}\n")),
        (None, None) => {}
    }
    let md_path = unique_file(&dir, &stem, "md");
    write(md_path.clone(), markdown.into_bytes()).await?;

    let json_path = md_path.with_extension("json");
    let json = serde_json::to_vec_pretty(answer)
        .map_err(|err| PipelineError::serialization(&json_path, err))?;
    write(json_path.clone(), json).await?;
    Ok((md_path, json_path))
}

/// Markdown report of one processed document.
pub fn render_report(document: &Document, data: &ProcessedData) -> String {
    let mut out = format!("# Document Analysis: {}\n\n", document.filename);
    out.push_str("## Document Info\n\n");
    out.push_str(&format!("- **File**: {}\n", document.filename));
    out.push_str(&format!("- **Type**: {}\n", document.doc_type.as_str()));
    if let Some(parser) = data.parser {
        out.push_str(&format!("- **Parser**: {}\n", parser.as_str()));
    }
    if let Some(summary) = &data.summary {
        out.push_str(&format!(
            "- **Model**: {} ({})\n",
            summary.source_model.name,
            summary.source_model.kind.as_str()
        ));
        if summary.chunk_count > 1 {
            out.push_str(&format!("- **Chunks**: {}\n", summary.chunk_count));
        }
    }
    out.push_str(&format!("- **Processed**: {}\n", now_rfc3339()));
    out.push_str(&format!(
        "- **Text length**: {} characters\n",
        data.extracted_text.chars().count()
    ));
    out.push_str(&format!("- **Images**: {}\n\n", data.extracted_images.len()));

    if let Some(summary) = &data.summary {
        out.push_str(&format!("## Summary\n\n{}\n\n", summary.text.trim()));
    }
    if let Some(ocr) = data.ocr_text.as_deref().filter(|text| !text.trim().is_empty()) {
        out.push_str(&format!("## Image Analysis\n\n{}\n\n", ocr.trim()));
    }

    let preview: String = data.extracted_text.chars().take(REPORT_TEXT_PREVIEW).collect();
    out.push_str(&format!("## Extracted Text\n\n{}", preview.trim_end()));
    if data.extracted_text.chars().count() > REPORT_TEXT_PREVIEW {
        out.push_str("\n\n(only the first 2000 characters are shown)");
    }
    out.push('\n');
    out
}

fn unique_file(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{extension}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{n}.{extension}"));
        n += 1;
    }
    candidate
}

async fn write(path: PathBuf, bytes: Vec<u8>) -> Result<(), PipelineError> {
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|err| PipelineError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SummaryBackendKind;
    use crate::extraction::ExtractionMethod;
    use crate::processing::registry::{DocType, DocumentStatus};
    use crate::summarization::{SourceModel, SummaryResult};

    fn document() -> Document {
        Document {
            doc_id: "doc-1".into(),
            filename: "report.pdf".into(),
            path: PathBuf::from("/tmp/report.pdf"),
            doc_type: DocType::Pdf,
            status: DocumentStatus::Processing,
            output_dir: None,
            added_date: now_rfc3339(),
            error: None,
            processed: None,
        }
    }

    fn data() -> ProcessedData {
        ProcessedData {
            extracted_text: "Body text.".into(),
            extracted_images: vec![PathBuf::from("images/page1_img1.png")],
            ocr_text: Some("#### Page 1\n\n- **page1_img1.png**:\n\nchart".into()),
            summary: Some(SummaryResult {
                text: "Short summary.".into(),
                source_model: SourceModel {
                    kind: SummaryBackendKind::LocalInference,
                    name: "llama3:latest".into(),
                },
                chunk_count: 1,
                merged: false,
            }),
            parser: Some(ExtractionMethod::Local),
        }
    }

    #[tokio::test]
    async fn output_dirs_are_never_reused() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let first = create_output_dir(workspace.path(), "report", "LOCAL_INFERENCE")
            .await
            .expect("first");
        let second = create_output_dir(workspace.path(), "report", "LOCAL_INFERENCE")
            .await
            .expect("second");
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
        let name = first.file_name().expect("name").to_string_lossy().into_owned();
        assert!(name.starts_with("report_LOCAL_INFERENCE_"));
    }

    #[tokio::test]
    async fn artifacts_round_trip_through_summary_json() {
        let workspace = tempfile::tempdir().expect("tempdir");
        write_artifacts(workspace.path(), &document(), &data())
            .await
            .expect("write");

        let report = std::fs::read_to_string(workspace.path().join(SUMMARY_MD)).expect("md");
        assert!(report.contains("## Summary\n\nShort summary."));
        assert!(report.contains("## Image Analysis"));
        let text = std::fs::read_to_string(workspace.path().join(SUMMARY_TXT)).expect("txt");
        assert_eq!(text, "Short summary.");
        let loaded = load_processed(workspace.path()).await.expect("load");
        assert_eq!(loaded, data());
    }

    #[tokio::test]
    async fn removing_a_missing_output_dir_is_fine() {
        let workspace = tempfile::tempdir().expect("tempdir");
        remove_output(&workspace.path().join("gone")).await.expect("ok");
    }
}
