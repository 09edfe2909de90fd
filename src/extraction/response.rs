//! Normalization of remote digitization responses into text and image payloads.
//!
//! The upstream service has returned text and images under several shapes over time, so each
//! known shape is an independent strategy, tried in a fixed priority order.

use super::html::html_to_markdown;
use super::images::ImagePayload;
use serde_json::Value;
use std::collections::HashSet;

/// One way of locating document text in a response.
pub struct TextStrategy {
    /// Label recorded in logs when this strategy wins.
    pub name: &'static str,
    extract: fn(&Value) -> Option<String>,
}

impl TextStrategy {
    /// Text found by this strategy; `Some("")` means the key exists but is blank.
    pub fn apply(&self, response: &Value) -> Option<String> {
        (self.extract)(response)
    }
}

/// Text strategies in priority order: plain text, then markdown, then HTML, then elements.
pub static TEXT_STRATEGIES: &[TextStrategy] = &[
    TextStrategy {
        name: "text",
        extract: |value| string_at(value, &["text"]),
    },
    TextStrategy {
        name: "content.text",
        extract: |value| string_at(value, &["content", "text"]),
    },
    TextStrategy {
        name: "markdown",
        extract: |value| string_at(value, &["markdown"]),
    },
    TextStrategy {
        name: "content.markdown",
        extract: |value| string_at(value, &["content", "markdown"]),
    },
    TextStrategy {
        name: "html",
        extract: |value| string_at(value, &["html"]).map(|html| html_to_markdown(&html)),
    },
    TextStrategy {
        name: "content.html",
        extract: |value| {
            string_at(value, &["content", "html"]).map(|html| html_to_markdown(&html))
        },
    },
    TextStrategy {
        name: "elements",
        extract: elements_text,
    },
];

/// Source label used when no strategy matched and the raw response was stringified.
pub const RAW_RESPONSE: &str = "raw";

/// Locate the document text, returning it with the name of the strategy that produced it.
///
/// The first strategy yielding non-blank text wins. When some key was present but blank the
/// result is empty; when no known key exists at all, a non-empty response is stringified.
pub fn extract_text(response: &Value) -> (String, &'static str) {
    let mut blank_match = None;
    for strategy in TEXT_STRATEGIES {
        match strategy.apply(response) {
            Some(text) if !text.trim().is_empty() => return (text, strategy.name),
            Some(_) => {
                blank_match.get_or_insert(strategy.name);
            }
            None => {}
        }
    }

    if let Some(name) = blank_match {
        return (String::new(), name);
    }
    if is_empty_response(response) {
        return (String::new(), RAW_RESPONSE);
    }
    let raw = match response {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    (raw, RAW_RESPONSE)
}

fn is_empty_response(response: &Value) -> bool {
    match response {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(value, |node, key| node.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn elements_text(response: &Value) -> Option<String> {
    let elements = response.get("elements")?.as_array()?;
    let parts: Vec<String> = elements
        .iter()
        .filter_map(|element| {
            string_at(element, &["content", "markdown"])
                .or_else(|| string_at(element, &["content", "text"]))
                .or_else(|| string_at(element, &["content", "html"]).map(|h| html_to_markdown(&h)))
                .or_else(|| string_at(element, &["text"]))
        })
        .filter(|part| !part.trim().is_empty())
        .collect();
    Some(parts.join("\n\n"))
}

/// An image located by a strategy, before naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundImage {
    /// Base64 payload.
    pub data: String,
    /// Explicit format or MIME type supplied next to the payload.
    pub format: Option<String>,
    /// 1-based page number, when the response carries one.
    pub page: Option<u64>,
}

/// One way of locating inline images in a response.
pub struct ImageStrategy {
    /// Label recorded in logs.
    pub name: &'static str,
    collect: fn(&Value) -> Vec<FoundImage>,
}

impl ImageStrategy {
    /// Images found by this strategy.
    pub fn apply(&self, response: &Value) -> Vec<FoundImage> {
        (self.collect)(response)
    }
}

/// Image strategies; every strategy contributes and duplicates are dropped.
pub static IMAGE_STRATEGIES: &[ImageStrategy] = &[
    ImageStrategy {
        name: "elements.base64_encoding",
        collect: element_images,
    },
    ImageStrategy {
        name: "images",
        collect: |value| image_list(value.get("images")),
    },
    ImageStrategy {
        name: "content.images",
        collect: |value| image_list(value.get("content").and_then(|c| c.get("images"))),
    },
    ImageStrategy {
        name: "figures",
        collect: |value| image_list(value.get("figures")),
    },
];

/// Collect image payloads from every strategy, de-duplicated and named deterministically.
///
/// Names are `page{p}_figure{n}` when the page is known, `figure{n}` otherwise, with `n`
/// counting from 1 across the whole response.
pub fn extract_images(response: &Value) -> Vec<ImagePayload> {
    let mut seen = HashSet::new();
    let mut payloads = Vec::new();
    for strategy in IMAGE_STRATEGIES {
        let found = strategy.apply(response);
        if !found.is_empty() {
            tracing::debug!(strategy = strategy.name, count = found.len(), "Found inline images");
        }
        for image in found {
            if !seen.insert(image.data.clone()) {
                continue;
            }
            let index = payloads.len() + 1;
            let name = match image.page {
                Some(page) => format!("page{page}_figure{index}"),
                None => format!("figure{index}"),
            };
            payloads.push(ImagePayload {
                name,
                data: image.data,
                format: image.format,
            });
        }
    }
    payloads
}

fn element_images(response: &Value) -> Vec<FoundImage> {
    let Some(elements) = response.get("elements").and_then(Value::as_array) else {
        return Vec::new();
    };
    elements
        .iter()
        .filter_map(|element| {
            let data = element.get("base64_encoding")?.as_str()?;
            (!data.trim().is_empty()).then(|| FoundImage {
                data: data.to_string(),
                format: string_at(element, &["format"]),
                page: element.get("page").and_then(Value::as_u64),
            })
        })
        .collect()
}

fn image_list(list: Option<&Value>) -> Vec<FoundImage> {
    let Some(items) = list.and_then(Value::as_array) else {
        return Vec::new();
    };
    items.iter().filter_map(image_entry).collect()
}

fn image_entry(item: &Value) -> Option<FoundImage> {
    let (data, format, page) = match item {
        Value::String(data) => (data.clone(), None, None),
        Value::Object(_) => {
            let data = ["base64", "data", "image", "content", "base64_encoding"]
                .iter()
                .find_map(|key| string_at(item, &[*key]))?;
            let format = string_at(item, &["format"]).or_else(|| string_at(item, &["mime_type"]));
            (data, format, item.get("page").and_then(Value::as_u64))
        }
        _ => return None,
    };
    (!data.trim().is_empty()).then_some(FoundImage { data, format, page })
}
