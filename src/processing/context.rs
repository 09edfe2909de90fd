//! Token-budget truncation of the combined corpus used as question-answering context.
//!
//! The corpus is a header followed by per-document sections, each starting on its own line with
//! [`SECTION_MARKER`]. Sections are kept greedily in order; a section that does not fit is
//! reduced to its heading plus its [`SUMMARY_MARKER`] block, then cut to the remaining budget.
//! Whenever anything is dropped or cut, a single [`TRUNCATION_NOTICE`] closes the result.

/// Marker opening each per-document section.
pub const SECTION_MARKER: &str = "## Document ";
/// Marker opening the summary sub-block of a section.
pub const SUMMARY_MARKER: &str = "### Summary";
/// Notice appended once when the corpus did not fit.
pub const TRUNCATION_NOTICE: &str = "\n\n(content truncated to fit the context budget)\n";

const CHARS_PER_TOKEN: usize = 3;

/// Estimated token count of `text` (characters / 3, rounded up).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Truncate `corpus` so that its estimated token count does not exceed `budget_tokens`.
///
/// Returns the corpus unchanged when it already fits.
pub fn truncate_context(corpus: &str, budget_tokens: usize) -> String {
    let limit = budget_tokens.saturating_mul(CHARS_PER_TOKEN);
    if corpus.chars().count() <= limit {
        return corpus.to_string();
    }

    let notice_len = TRUNCATION_NOTICE.chars().count();
    if limit <= notice_len {
        return take_chars(corpus, limit).to_string();
    }
    let mut remaining = limit - notice_len;

    let (header, sections) = split_sections(corpus);
    let header_len = header.chars().count();
    if header_len > remaining {
        let mut out = take_chars(header, remaining).to_string();
        out.push_str(TRUNCATION_NOTICE);
        return out;
    }

    let mut out = String::with_capacity(limit * 4);
    out.push_str(header);
    remaining -= header_len;

    let mut truncated = false;
    for section in sections {
        if remaining == 0 {
            truncated = true;
            break;
        }

        let cost = section.chars().count();
        if cost <= remaining {
            out.push_str(section);
            remaining -= cost;
            continue;
        }

        truncated = true;
        let Some(condensed) = condensed_section(section) else {
            break;
        };
        let condensed_len = condensed.chars().count();
        if condensed_len <= remaining {
            out.push_str(&condensed);
            remaining -= condensed_len;
        } else {
            out.push_str(take_chars(&condensed, remaining));
            break;
        }
    }

    if truncated {
        out.push_str(TRUNCATION_NOTICE);
    }
    out
}

/// Split the corpus into its header and marker-delimited sections.
fn split_sections(corpus: &str) -> (&str, Vec<&str>) {
    let mut starts: Vec<usize> = corpus
        .match_indices(&format!("\n{SECTION_MARKER}"))
        .map(|(offset, _)| offset + 1)
        .collect();
    if corpus.starts_with(SECTION_MARKER) {
        starts.insert(0, 0);
    }

    let Some(&first) = starts.first() else {
        return (corpus, Vec::new());
    };
    let sections = starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(corpus.len());
            &corpus[start..end]
        })
        .collect();
    (&corpus[..first], sections)
}

/// Heading line plus the summary block, when the section carries one.
fn condensed_section(section: &str) -> Option<String> {
    let heading_end = section.find('\n').map_or(section.len(), |i| i + 1);
    let summary_start = section.find(SUMMARY_MARKER)?;
    let after_marker = summary_start + SUMMARY_MARKER.len();
    let summary_end = section[after_marker..]
        .find("\n### ")
        .map_or(section.len(), |i| after_marker + i + 1);

    let mut condensed = String::with_capacity(heading_end + summary_end - summary_start + 1);
    condensed.push_str(&section[..heading_end]);
    if !condensed.ends_with('\n') {
        condensed.push('\n');
    }
    condensed.push_str(&section[summary_start..summary_end]);
    Some(condensed)
}

fn take_chars(text: &str, count: usize) -> &str {
    match text.char_indices().nth(count) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}
