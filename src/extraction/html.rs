//! Minimal HTML to Markdown normalization for HTML-only extraction responses.
//!
//! Handles headings, paragraphs, line breaks, list items, and tables; any other tag is dropped
//! and its text kept.

use regex::{Captures, Regex};
use std::sync::LazyLock;

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("static pattern compiles")
}

static TABLE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<table(?:\s[^>]*)?>(.*?)</table>"));
static ROW: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<tr(?:\s[^>]*)?>(.*?)</tr>"));
static CELL: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?is)<t[hd](?:\s[^>]*)?>(.*?)</t[hd]>"));
static HEADING: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?is)<h([1-6])(?:\s[^>]*)?>(.*?)</h[1-6]>"));
static BREAK: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<br\s*/?>"));
static PARAGRAPH_OPEN: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<p(\s[^>]*)?>"));
static PARAGRAPH_CLOSE: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)</p\s*>"));
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)<li(\s[^>]*)?>"));
static BLOCK_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)</(ul|ol|div|section|article|blockquote)\s*>"));
static TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?s)<[^>]+>"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| pattern(r"\n[ \t]*(\n[ \t]*)+\n"));

/// Convert an HTML fragment into plain Markdown.
pub fn html_to_markdown(html: &str) -> String {
    let text = TABLE.replace_all(html, |caps: &Captures| format!("\n\n{}\n\n", table(&caps[1])));
    let text = HEADING.replace_all(&text, |caps: &Captures| {
        let level: usize = caps[1].parse().unwrap_or(1);
        format!("\n\n{} {}\n\n", "#".repeat(level), inline_text(&caps[2]))
    });
    let text = BREAK.replace_all(&text, "\n");
    let text = PARAGRAPH_OPEN.replace_all(&text, "\n\n");
    let text = PARAGRAPH_CLOSE.replace_all(&text, "\n\n");
    let text = LIST_ITEM.replace_all(&text, "\n- ");
    let text = BLOCK_CLOSE.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);

    let trimmed_lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let joined = trimmed_lines.join("\n");
    BLANK_RUN.replace_all(&joined, "\n\n").trim().to_string()
}

fn table(inner: &str) -> String {
    let rows: Vec<Vec<String>> = ROW
        .captures_iter(inner)
        .map(|row| {
            CELL.captures_iter(&row[1])
                .map(|cell| inline_text(&cell[1]).replace('|', "\\|"))
                .collect()
        })
        .filter(|cells: &Vec<String>| !cells.is_empty())
        .collect();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (index, cells) in rows.iter().enumerate() {
        lines.push(format!("| {} |", cells.join(" | ")));
        if index == 0 {
            lines.push(format!("|{}", " --- |".repeat(cells.len())));
        }
    }
    lines.join("\n")
}

/// Text content of an inline fragment on a single line.
fn inline_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
