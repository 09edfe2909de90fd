//! Rendering of processed documents into the combined corpus used as query context.

use super::context::{SECTION_MARKER, SUMMARY_MARKER};
use super::registry::{Document, now_rfc3339};

/// File name of the combined corpus inside the workspace.
pub const COMBINED_FILE: &str = "combined_results.md";

const TEXT_FALLBACK_CHARS: usize = 1000;

/// Render `documents` (processed, in order) as the combined corpus.
///
/// Each document gets a section opened by `## Document {i}: {filename}` whose summary
/// sub-block holds the summary, or the first 1000 characters of the text when none exists.
pub fn render_corpus(documents: &[Document]) -> String {
    let mut out = String::from("# Combined Document Analysis\n\n");
    out.push_str(&format!("Generated: {}\n", now_rfc3339()));
    out.push_str(&format!("Documents: {}\n\n", documents.len()));

    out.push_str("## Documents\n\n");
    for (i, document) in documents.iter().enumerate() {
        out.push_str(&format!(
            "{}. **{}** (type: {})\n",
            i + 1,
            document.filename,
            document.doc_type.as_str()
        ));
    }
    out.push('\n');

    for (i, document) in documents.iter().enumerate() {
        out.push_str(&render_section(i + 1, document));
    }
    out
}

fn render_section(position: usize, document: &Document) -> String {
    let mut out = format!("{SECTION_MARKER}{position}: {}\n\n", document.filename);
    out.push_str("### Document Info\n\n");
    out.push_str(&format!("- **File**: {}\n", document.filename));
    out.push_str(&format!("- **Type**: {}\n", document.doc_type.as_str()));
    if let Some(dir) = &document.output_dir {
        out.push_str(&format!("- **Output**: {}\n", dir.display()));
    }
    out.push('\n');

    let Some(data) = &document.processed else {
        return out;
    };

    let summary = data
        .summary
        .as_ref()
        .map(|summary| summary.text.trim().to_string())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| text_excerpt(&data.extracted_text));
    if !summary.is_empty() {
        out.push_str(&format!("{SUMMARY_MARKER}\n\n{summary}\n\n"));
    }

    match data.ocr_text.as_deref().map(str::trim) {
        Some(ocr) if !ocr.is_empty() => {
            out.push_str(&format!("### Image Analysis\n\n{ocr}\n\n"));
        }
        _ if !data.extracted_images.is_empty() => {
            out.push_str(&format!(
                "### Images\n\n{} image(s) extracted.\n\n",
                data.extracted_images.len()
            ));
        }
        _ => {}
    }
    out
}

fn text_excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= TEXT_FALLBACK_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(TEXT_FALLBACK_CHARS).collect();
    format!("{head}...\n\n(text shortened; showing the first {TEXT_FALLBACK_CHARS} characters)")
}
