//! Chunk-size policy and boundary-respecting text splitting.
//!
//! Oversized documents are split into overlapping character windows before summarization:
//!
//! - Per-backend sizing: each summarization backend tolerates a different context length, so
//!   the oversize threshold and target size are looked up by backend identity, with a default
//!   and optional overrides (`SUMMARY_CHUNK_THRESHOLD`, `SUMMARY_CHUNK_SIZE`,
//!   `SUMMARY_CHUNK_OVERLAP`).
//! - Boundaries: a cut prefers a sentence end or paragraph break, then any whitespace, within
//!   half a target size before the naive cut; dense text keeps the hard cut.
//! - Overlap: every chunk after the first repeats the last `overlap` characters of its
//!   predecessor, so spans around a cut stay visible to the model.
//!
//! All offsets are character offsets, so multi-byte text never splits inside a code point.

use super::types::ChunkingError;
use std::iter;

/// Overlap applied between neighbouring chunks unless overridden.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
const REMOTE_CHAT_CHUNK_SIZE: usize = 12_000;
const LOCAL_INFERENCE_CHUNK_SIZE: usize = 8_000;
const DEFAULT_CHUNK_SIZE: usize = 8_000;

/// Sizing parameters that decide when and how a text is chunked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    /// Texts longer than this many characters are chunked.
    pub threshold: usize,
    /// Target characters of fresh text per chunk.
    pub target_size: usize,
    /// Characters repeated from the previous chunk.
    pub overlap: usize,
}

impl ChunkPolicy {
    /// Reject parameters that cannot produce a terminating split.
    pub fn validate(&self) -> Result<(), ChunkingError> {
        validate(self.target_size, self.overlap)
    }

    /// Apply optional overrides on top of this policy.
    pub fn with_overrides(
        mut self,
        threshold: Option<usize>,
        target_size: Option<usize>,
        overlap: Option<usize>,
    ) -> Self {
        if let Some(target_size) = target_size {
            self.target_size = target_size;
        }
        // A bare size override keeps threshold and target in step.
        self.threshold = threshold.or(target_size).unwrap_or(self.threshold);
        if let Some(overlap) = overlap {
            self.overlap = overlap;
        }
        self
    }
}

/// Look up the chunk policy for a backend identity, falling back to a conservative default.
pub fn chunk_policy_for(backend: &str) -> ChunkPolicy {
    let size = match backend.to_lowercase().as_str() {
        "remote-chat" | "openai" => REMOTE_CHAT_CHUNK_SIZE,
        "local-inference" | "ollama" | "llama" => LOCAL_INFERENCE_CHUNK_SIZE,
        other => {
            tracing::trace!(backend = other, "Using default chunk policy");
            DEFAULT_CHUNK_SIZE
        }
    };
    ChunkPolicy {
        threshold: size,
        target_size: size,
        overlap: DEFAULT_CHUNK_OVERLAP,
    }
}

/// A contiguous slice of the source text, addressed by character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the chunk sequence.
    pub index: usize,
    /// Inclusive start offset, in characters.
    pub start: usize,
    /// Exclusive end offset, in characters.
    pub end: usize,
    /// Leading characters shared with the previous chunk.
    pub overlap: usize,
    /// Text covered by `start..end`.
    pub text: String,
}

impl Chunk {
    /// Portion of the chunk not already covered by its predecessor.
    pub fn fresh_text(&self) -> &str {
        match self.text.char_indices().nth(self.overlap) {
            Some((offset, _)) => &self.text[offset..],
            None => "",
        }
    }
}

fn validate(target_size: usize, overlap: usize) -> Result<(), ChunkingError> {
    if target_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if overlap >= target_size {
        return Err(ChunkingError::OverlapTooLarge {
            overlap,
            target_size,
        });
    }
    Ok(())
}

/// Split `text` into overlapping chunks of roughly `target_size` characters.
///
/// Each cut lands at most `target_size` characters after the previous one, moved back to a
/// sentence or whitespace break when one exists within `target_size / 2`. The next chunk then
/// begins `overlap` characters before that cut, always strictly after the previous start.
/// Concatenating [`Chunk::fresh_text`] over the result reproduces the input.
///
/// Returns an empty vector for empty input.
pub fn chunk_text(
    text: &str,
    target_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    validate(target_size, overlap)?;

    let chars: Vec<char> = text.chars().collect();
    let byte_offsets: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(iter::once(text.len()))
        .collect();
    let len = chars.len();

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut cut = 0;
    while cut < len {
        let naive = (cut + target_size).min(len);
        let end = if naive == len {
            len
        } else {
            find_boundary(&chars, cut, naive, target_size / 2)
        };
        let start = match chunks.last() {
            Some(previous) => cut.saturating_sub(overlap).max(previous.start + 1),
            None => 0,
        };

        chunks.push(Chunk {
            index: chunks.len(),
            start,
            end,
            overlap: cut - start,
            text: text[byte_offsets[start]..byte_offsets[end]].to_string(),
        });
        cut = end;
    }

    Ok(chunks)
}

/// Pick the cut for a window whose naive end is `naive`, never at or before `floor`.
fn find_boundary(chars: &[char], floor: usize, naive: usize, window: usize) -> usize {
    let lowest = naive.saturating_sub(window).max(floor + 1);
    let candidates = || (lowest..=naive).rev();

    candidates()
        .find(|&position| is_sentence_break(chars, position))
        .or_else(|| candidates().find(|&position| chars[position - 1].is_whitespace()))
        .unwrap_or(naive)
}

fn is_sentence_break(chars: &[char], position: usize) -> bool {
    let before = chars[position - 1];
    if before == '\n' {
        return true;
    }
    matches!(before, '.' | '!' | '?' | '。' | '！' | '？')
        && chars.get(position).is_some_and(|next| next.is_whitespace())
}
