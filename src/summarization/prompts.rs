//! Prompt templates for summarization, merging, and question answering.

/// System instruction for summarization calls.
pub const SUMMARY_SYSTEM: &str = "You are an assistant that summarizes documents in a clear, \
structured format. Cover the main points, key arguments, and important details.";

/// System instruction for question-answering calls.
pub const QA_SYSTEM: &str = "You answer questions using only the provided documents. When the \
documents do not contain the answer, say so plainly.";

/// Prompt summarizing a whole document.
pub fn summary_prompt(text: &str, language: &str, image_count: usize) -> String {
    let mut prompt = format!("Summarize the following document in detail in {language}.\n");
    push_image_note(&mut prompt, image_count);
    prompt.push_str("\nDocument:\n");
    prompt.push_str(text);
    prompt
}

/// Prompt summarizing part `index` (1-based) of `total` of a longer document.
pub fn chunk_prompt(text: &str, language: &str, index: usize, total: usize) -> String {
    format!(
        "The following is part {index} of {total} of a longer document. Summarize this part in \
         detail in {language}, keeping every key fact it contains.\n\nDocument part:\n{text}"
    )
}

/// Prompt asking the backend to synthesize labeled part summaries into one summary.
pub fn merge_prompt(summaries: &[String], language: &str) -> String {
    let parts = summaries
        .iter()
        .enumerate()
        .map(|(i, summary)| format!("[Part {}]\n{summary}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "The following are summaries of consecutive parts of one long document. Combine them into \
         a single coherent summary in {language}. Remove duplicated content and keep only the \
         important information, covering the overall topic and core content of the whole \
         document.\n\n{parts}"
    )
}

/// Deterministic, order-preserving concatenation used when no merge call is made.
pub fn concatenate_parts(summaries: &[String]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, summary)| format!("=== Part {} ===\n{summary}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt answering `question` from the combined document context.
pub fn qa_prompt(question: &str, context: &str, language: &str) -> String {
    format!(
        "Answer the question below in {language} using the documents provided.\n\n\
         Documents:\n{context}\n\nQuestion: {question}\n\nAnswer:"
    )
}

fn push_image_note(prompt: &mut String, image_count: usize) {
    if image_count > 0 {
        prompt.push_str(&format!(
            "The document also contains {image_count} image(s) that are not included here.\n"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prompt_labels_parts_in_order() {
        let prompt = merge_prompt(&["alpha".into(), "beta".into()], "English");
        let first = prompt.find("[Part 1]\nalpha").expect("part 1");
        let second = prompt.find("[Part 2]\nbeta").expect("part 2");
        assert!(first < second);
    }

    #[test]
    fn concatenation_is_labeled_and_ordered() {
        assert_eq!(
            concatenate_parts(&["one".into(), "two".into()]),
            "=== Part 1 ===\none\n\n=== Part 2 ===\ntwo"
        );
    }

    #[test]
    fn summary_prompt_notes_images_without_content() {
        let prompt = summary_prompt("body", "Korean", 2);
        assert!(prompt.contains("2 image(s)"));
        assert!(prompt.ends_with("Document:\nbody"));
        assert!(!summary_prompt("body", "Korean", 0).contains("image"));
    }
}
