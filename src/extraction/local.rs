//! Local PDF extraction backed by `lopdf`.

use super::ExtractionStrategy;
use super::images::write_image;
use super::types::{ExtractionError, ExtractionMethod, ExtractionResult};
use async_trait::async_trait;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};

/// Renders PDFs in-process: per-page text plus every embedded raster image.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExtractor;

#[async_trait]
impl ExtractionStrategy for LocalExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Local
    }

    async fn extract(
        &self,
        source: &Path,
        images_dir: &Path,
    ) -> Result<ExtractionResult, ExtractionError> {
        let source = source.to_path_buf();
        let images_dir = images_dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract_pdf(&source, &images_dir))
            .await
            .map_err(|err| ExtractionError::Pdf(format!("extraction task failed: {err}")))?
    }
}

fn extract_pdf(source: &Path, images_dir: &Path) -> Result<ExtractionResult, ExtractionError> {
    let document = Document::load(source).map_err(|err| ExtractionError::SourceUnavailable {
        path: source.to_path_buf(),
        reason: err.to_string(),
    })?;

    let mut pages_text = Vec::new();
    let mut images = Vec::new();
    for (page_number, page_id) in document.get_pages() {
        match document.extract_text(&[page_number]) {
            Ok(text) if !text.trim().is_empty() => pages_text.push(text.trim_end().to_string()),
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(page = page_number, error = %err, "Failed to extract page text");
            }
        }
        images.extend(extract_page_images(&document, page_number, page_id, images_dir)?);
    }

    tracing::debug!(
        source = %source.display(),
        pages = pages_text.len(),
        images = images.len(),
        "Local extraction finished"
    );
    Ok(ExtractionResult::new(pages_text.join("\n\n"), images))
}

fn extract_page_images(
    document: &Document,
    page_number: u32,
    page_id: ObjectId,
    images_dir: &Path,
) -> Result<Vec<PathBuf>, ExtractionError> {
    let Some(xobjects) = page_xobjects(document, page_id) else {
        return Ok(Vec::new());
    };

    let mut written = Vec::new();
    for (_name, object) in xobjects.iter() {
        let Object::Stream(stream) = resolve(document, object) else {
            continue;
        };
        if !is_name(document, stream.dict.get(b"Subtype").ok(), b"Image") {
            continue;
        }

        let stem = format!("page{page_number}_img{}", written.len() + 1);
        match encode_image(document, stream) {
            Some((extension, bytes)) => {
                written.push(write_image(images_dir, &stem, extension, &bytes)?);
            }
            None => {
                tracing::warn!(page = page_number, image = %stem, "Skipping unsupported image encoding");
            }
        }
    }
    Ok(written)
}

fn page_xobjects(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let page = document.get_object(page_id).ok()?.as_dict().ok()?;
    let resources = resolve(document, page.get(b"Resources").ok()?).as_dict().ok()?;
    resolve(document, resources.get(b"XObject").ok()?)
        .as_dict()
        .ok()
}

/// Raw bytes and extension for an image stream, when its encoding can be written out.
fn encode_image(document: &Document, stream: &Stream) -> Option<(&'static str, Vec<u8>)> {
    let filters = filter_names(document, stream.dict.get(b"Filter").ok());
    if filters.iter().any(|filter| filter == b"DCTDecode") {
        return Some(("jpg", stream.content.clone()));
    }
    if filters.iter().any(|filter| filter == b"JPXDecode") {
        return Some(("jp2", stream.content.clone()));
    }

    let width = dict_u32(document, &stream.dict, b"Width")?;
    let height = dict_u32(document, &stream.dict, b"Height")?;
    let bits = dict_u32(document, &stream.dict, b"BitsPerComponent").unwrap_or(8);
    let color_space = stream.dict.get(b"ColorSpace").ok();
    let color = if is_name(document, color_space, b"DeviceRGB") {
        image::ColorType::Rgb8
    } else if is_name(document, color_space, b"DeviceGray") {
        image::ColorType::L8
    } else {
        return None;
    };
    if bits != 8 {
        return None;
    }

    let raw = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream.decompressed_content().ok()?
    };
    let expected = width as usize * height as usize * usize::from(color.channel_count());
    if raw.len() < expected {
        return None;
    }

    let mut png = Vec::new();
    image::write_buffer_with_format(
        &mut std::io::Cursor::new(&mut png),
        &raw[..expected],
        width,
        height,
        color,
        image::ImageFormat::Png,
    )
    .ok()?;
    Some(("png", png))
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        other => other,
    }
}

fn is_name(document: &Document, object: Option<&Object>, expected: &[u8]) -> bool {
    matches!(object.map(|o| resolve(document, o)), Some(Object::Name(name)) if name == expected)
}

fn filter_names(document: &Document, object: Option<&Object>) -> Vec<Vec<u8>> {
    match object.map(|o| resolve(document, o)) {
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match resolve(document, item) {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn dict_u32(document: &Document, dict: &Dictionary, key: &[u8]) -> Option<u32> {
    let value = resolve(document, dict.get(key).ok()?).as_i64().ok()?;
    u32::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::dictionary;

    /// Build a one-page PDF with a line of text and optionally one raw RGB image.
    fn sample_pdf(path: &Path, text: &str, with_image: bool) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });

        let mut xobjects = Dictionary::new();
        if with_image {
            let pixels = vec![255u8; 2 * 2 * 3];
            let image = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 2,
                    "Height" => 2,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                },
                pixels,
            );
            let image_id = doc.add_object(image);
            xobjects.set("Im1", image_id);
        }
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => xobjects,
        });

        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).expect("save pdf");
    }

    #[tokio::test]
    async fn extracts_text_and_raw_images() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf = dir.path().join("sample.pdf");
        sample_pdf(&pdf, "Quarterly revenue grew", true);
        let images_dir = dir.path().join("images");
        std::fs::create_dir_all(&images_dir).expect("images dir");

        let result = LocalExtractor
            .extract(&pdf, &images_dir)
            .await
            .expect("extract");

        assert!(result.text().contains("Quarterly revenue grew"));
        assert_eq!(result.images(), &[images_dir.join("page1_img1.png")]);
        assert!(result.images()[0].exists());
    }

    #[tokio::test]
    async fn missing_source_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = LocalExtractor
            .extract(&dir.path().join("absent.pdf"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractionError::SourceUnavailable { .. }));
    }
}
