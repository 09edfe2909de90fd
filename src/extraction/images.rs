//! Inline base64 image payloads: decoding, format guessing, and writing to disk.

use super::types::ExtractionError;
use base64::{Engine as _, engine::general_purpose};
use std::path::{Path, PathBuf};

const DEFAULT_EXTENSION: &str = "png";

/// An image found inside a remote extraction response, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    /// File stem the image is written under.
    pub name: String,
    /// Base64 data, optionally with a `data:<mime>;base64,` prefix.
    pub data: String,
    /// Explicit format field supplied next to the payload.
    pub format: Option<String>,
}

/// Decoded image bytes with the extension they should be written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// File extension without a dot.
    pub extension: String,
}

/// Decode a payload, returning `None` (after logging) when it is not valid base64 or is empty.
pub fn decode_payload(payload: &ImagePayload) -> Option<DecodedImage> {
    let (mime, encoded) = split_data_uri(payload.data.trim());
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();

    let bytes = match general_purpose::STANDARD.decode(cleaned.as_bytes()) {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(image = %payload.name, error = %error, "Skipping undecodable image payload");
            return None;
        }
    };
    if bytes.is_empty() {
        tracing::warn!(image = %payload.name, "Skipping empty image payload");
        return None;
    }

    Some(DecodedImage {
        bytes,
        extension: guess_extension(payload.format.as_deref(), mime),
    })
}

/// Split a `data:<mime>;base64,` prefix off the payload, returning the MIME type if present.
fn split_data_uri(data: &str) -> (Option<&str>, &str) {
    let Some(rest) = data.strip_prefix("data:") else {
        return (None, data);
    };
    match rest.split_once(',') {
        Some((meta, encoded)) => {
            let mime = meta.split(';').next().filter(|mime| !mime.is_empty());
            (mime, encoded)
        }
        None => (None, data),
    }
}

/// Pick an extension from an explicit format, then a MIME type, then the default.
pub fn guess_extension(format: Option<&str>, mime: Option<&str>) -> String {
    let from_format = format
        .map(|format| format.trim().trim_start_matches('.').to_lowercase())
        .map(|format| {
            format
                .strip_prefix("image/")
                .map(str::to_string)
                .unwrap_or(format)
        });
    let from_mime = || {
        mime.and_then(|mime| mime.trim().to_lowercase().strip_prefix("image/").map(str::to_string))
    };

    match from_format.filter(|ext| !ext.is_empty()).or_else(from_mime) {
        Some(ext) => normalize_extension(&ext),
        None => DEFAULT_EXTENSION.to_string(),
    }
}

fn normalize_extension(ext: &str) -> String {
    match ext {
        "jpeg" | "jpg" | "pjpeg" => "jpg".to_string(),
        "svg+xml" => "svg".to_string(),
        "tif" | "tiff" => "tiff".to_string(),
        other if other.chars().all(|c| c.is_ascii_alphanumeric()) => other.to_string(),
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

/// Write image bytes as `{dir}/{stem}.{extension}`; blocking, for use inside `spawn_blocking`.
pub fn write_image(
    dir: &Path,
    stem: &str,
    extension: &str,
    bytes: &[u8],
) -> Result<PathBuf, ExtractionError> {
    let path = dir.join(format!("{stem}.{extension}"));
    std::fs::write(&path, bytes).map_err(|source| ExtractionError::io(&path, source))?;
    Ok(path)
}

/// Decode every payload and write the valid ones into `dir`, skipping failures.
pub async fn write_payloads(
    dir: &Path,
    payloads: &[ImagePayload],
) -> Result<Vec<PathBuf>, ExtractionError> {
    let mut written = Vec::with_capacity(payloads.len());
    for payload in payloads {
        if let Some(image) = decode_payload(payload) {
            let path = dir.join(format!("{}.{}", payload.name, image.extension));
            tokio::fs::write(&path, &image.bytes)
                .await
                .map_err(|source| ExtractionError::io(&path, source))?;
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &str, format: Option<&str>) -> ImagePayload {
        ImagePayload {
            name: "figure1".into(),
            data: data.into(),
            format: format.map(str::to_string),
        }
    }

    #[test]
    fn decodes_with_and_without_data_uri_prefix() {
        let encoded = general_purpose::STANDARD.encode(b"\x89PNG fake");
        let plain = decode_payload(&payload(&encoded, None)).expect("plain");
        assert_eq!(plain.bytes, b"\x89PNG fake");
        assert_eq!(plain.extension, "png");

        let prefixed = format!("data:image/jpeg;base64,{encoded}");
        let image = decode_payload(&payload(&prefixed, None)).expect("prefixed");
        assert_eq!(image.bytes, b"\x89PNG fake");
        assert_eq!(image.extension, "jpg");
    }

    #[test]
    fn tolerates_embedded_whitespace() {
        let encoded = general_purpose::STANDARD.encode(b"abcdefgh");
        let wrapped = format!("{}\n{}", &encoded[..4], &encoded[4..]);
        assert!(decode_payload(&payload(&wrapped, None)).is_some());
    }

    #[test]
    fn skips_invalid_and_empty_payloads() {
        assert!(decode_payload(&payload("not base64!!", None)).is_none());
        assert!(decode_payload(&payload("", None)).is_none());
        assert!(decode_payload(&payload("data:image/png;base64,", None)).is_none());
    }

    #[test]
    fn explicit_format_wins_over_mime() {
        assert_eq!(guess_extension(Some("JPEG"), Some("image/png")), "jpg");
        assert_eq!(guess_extension(None, Some("image/gif")), "gif");
        assert_eq!(guess_extension(Some("image/webp"), None), "webp");
        assert_eq!(guess_extension(None, None), "png");
        assert_eq!(guess_extension(Some("weird/format!"), None), "png");
    }

    #[tokio::test]
    async fn write_payloads_keeps_only_decodable_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = ImagePayload {
            name: "figure1".into(),
            data: general_purpose::STANDARD.encode(b"img"),
            format: Some("png".into()),
        };
        let bad = ImagePayload {
            name: "figure2".into(),
            data: "%%%".into(),
            format: None,
        };

        let written = write_payloads(dir.path(), &[good, bad])
            .await
            .expect("write");
        assert_eq!(written, vec![dir.path().join("figure1.png")]);
        assert_eq!(std::fs::read(&written[0]).expect("read"), b"img");
    }
}
