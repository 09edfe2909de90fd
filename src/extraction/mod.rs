//! Text and image extraction from source documents.
//!
//! Two interchangeable strategies exist: [`LocalExtractor`] parses the PDF in-process and
//! [`RemoteExtractor`] submits it to the digitization service. [`Extractor`] applies the
//! caller's [`ParserPolicy`]; under `auto` it tries remote first and falls back to local when
//! the remote call fails or yields no text, reporting which strategy actually produced the
//! result.

pub mod html;
pub mod images;
mod local;
mod remote;
pub mod response;
mod types;

pub use local::LocalExtractor;
pub use remote::RemoteExtractor;
pub use types::{Extraction, ExtractionError, ExtractionMethod, ExtractionResult};

use crate::config::{Config, ConfigError, ParserPolicy};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Subdirectory of the output directory that receives extracted images.
pub const IMAGES_DIR: &str = "images";

/// A way of obtaining text and images from a PDF.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Which strategy this is.
    fn method(&self) -> ExtractionMethod;

    /// Extract `source`, writing images into the existing directory `images_dir`.
    async fn extract(
        &self,
        source: &Path,
        images_dir: &Path,
    ) -> Result<ExtractionResult, ExtractionError>;
}

/// Applies a parser policy over the local and (optional) remote strategies.
#[derive(Clone)]
pub struct Extractor {
    local: Arc<dyn ExtractionStrategy>,
    remote: Option<Arc<dyn ExtractionStrategy>>,
    retry_empty: bool,
}

impl Extractor {
    /// Assemble an extractor from explicit strategies.
    pub fn new(
        local: Arc<dyn ExtractionStrategy>,
        remote: Option<Arc<dyn ExtractionStrategy>>,
        retry_empty: bool,
    ) -> Self {
        Self {
            local,
            remote,
            retry_empty,
        }
    }

    /// Build from configuration.
    ///
    /// A missing digitization credential is an error when the default policy is `remote`; under
    /// `auto` or `local` the remote strategy is simply left out.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let remote = match RemoteExtractor::new(&config.digitizer, config.retry.clone()) {
            Ok(remote) => Some(Arc::new(remote) as Arc<dyn ExtractionStrategy>),
            Err(err) if config.digitizer.policy == ParserPolicy::Remote => return Err(err),
            Err(err) => {
                tracing::info!(reason = %err, "Remote extraction disabled; using local parser");
                None
            }
        };
        Ok(Self::new(
            Arc::new(LocalExtractor),
            remote,
            config.digitizer.retry_empty,
        ))
    }

    /// Whether a remote strategy is available.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Extract `source` into `output_dir/images` according to `policy`.
    pub async fn extract(
        &self,
        source: &Path,
        output_dir: &Path,
        policy: ParserPolicy,
    ) -> Result<Extraction, ExtractionError> {
        if !source.is_file() {
            return Err(ExtractionError::SourceUnavailable {
                path: source.to_path_buf(),
                reason: "file does not exist".into(),
            });
        }
        let images_dir = output_dir.join(IMAGES_DIR);
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(|err| ExtractionError::io(&images_dir, err))?;

        let extraction = match policy {
            ParserPolicy::Local => self.run(self.local.as_ref(), source, &images_dir).await?,
            ParserPolicy::Remote => {
                let remote = self.remote.as_deref().ok_or_else(|| {
                    ExtractionError::RemoteUnavailable("DIGITIZER_API_KEY is not set".into())
                })?;
                self.run(remote, source, &images_dir).await?
            }
            ParserPolicy::Auto => self.auto(source, &images_dir).await?,
        };

        if !extraction.result.has_content() {
            return Err(ExtractionError::NoContent(source.to_path_buf()));
        }
        tracing::info!(
            source = %source.display(),
            method = extraction.method.as_str(),
            chars = extraction.result.text().len(),
            images = extraction.result.images().len(),
            "Extraction complete"
        );
        Ok(extraction)
    }

    async fn run(
        &self,
        strategy: &dyn ExtractionStrategy,
        source: &Path,
        images_dir: &Path,
    ) -> Result<Extraction, ExtractionError> {
        let result = strategy.extract(source, images_dir).await?;
        Ok(Extraction {
            result,
            method: strategy.method(),
        })
    }

    async fn auto(&self, source: &Path, images_dir: &Path) -> Result<Extraction, ExtractionError> {
        let Some(remote) = self.remote.as_deref() else {
            return self.run(self.local.as_ref(), source, images_dir).await;
        };

        let attempts = if self.retry_empty { 2 } else { 1 };
        let mut remote_partial = None;
        let mut remote_images = Vec::new();
        let mut remote_error = None;
        for attempt in 1..=attempts {
            match self.run(remote, source, images_dir).await {
                Ok(extraction) if extraction.result.has_text() => return Ok(extraction),
                Ok(extraction) => {
                    tracing::warn!(
                        source = %source.display(),
                        attempt,
                        "Remote extraction returned empty text"
                    );
                    remote_images.extend_from_slice(extraction.result.images());
                    remote_partial = Some(extraction);
                }
                Err(err) => {
                    tracing::warn!(
                        source = %source.display(),
                        error = %err,
                        "Remote extraction failed; falling back to local parser"
                    );
                    remote_error = Some(err.to_string());
                    break;
                }
            }
        }

        let local = self.run(self.local.as_ref(), source, images_dir).await;
        match (local, remote_partial) {
            (Ok(local), Some(partial))
                if !local.result.has_content() && partial.result.has_content() =>
            {
                Ok(partial)
            }
            (Ok(local), _) => {
                discard_images(&remote_images, local.result.images()).await;
                Ok(local)
            }
            (Err(_), Some(partial)) if partial.result.has_content() => Ok(partial),
            (Err(err), _) => match remote_error {
                Some(remote) => Err(ExtractionError::AllStrategiesFailed {
                    remote,
                    local: err.to_string(),
                }),
                None => Err(err),
            },
        }
    }
}

/// Delete images written by a discarded remote attempt, sparing any the winning result uses.
async fn discard_images(images: &[PathBuf], keep: &[PathBuf]) {
    for image in images.iter().filter(|image| !keep.contains(image)) {
        if let Err(err) = tokio::fs::remove_file(image).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %image.display(), error = %err, "Failed to delete stale image");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        method: ExtractionMethod,
        outputs: std::sync::Mutex<Vec<Result<ExtractionResult, ExtractionError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(
            method: ExtractionMethod,
            outputs: Vec<Result<ExtractionResult, ExtractionError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                method,
                outputs: std::sync::Mutex::new(outputs),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ExtractionStrategy for Scripted {
        fn method(&self) -> ExtractionMethod {
            self.method
        }

        async fn extract(
            &self,
            _source: &Path,
            _images_dir: &Path,
        ) -> Result<ExtractionResult, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outputs = self.outputs.lock().expect("lock");
            if outputs.len() > 1 {
                outputs.remove(0)
            } else {
                match &outputs[0] {
                    Ok(result) => Ok(result.clone()),
                    Err(err) => Err(ExtractionError::Pdf(err.to_string())),
                }
            }
        }
    }

    fn remote(strategy: &Arc<Scripted>) -> Option<Arc<dyn ExtractionStrategy>> {
        Some(strategy.clone())
    }

    fn text(value: &str) -> Result<ExtractionResult, ExtractionError> {
        Ok(ExtractionResult::new(value.into(), Vec::new()))
    }

    fn source() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.pdf");
        std::fs::write(&path, b"%PDF").expect("write");
        (dir, path)
    }

    #[tokio::test]
    async fn auto_prefers_remote_text() {
        let (dir, path) = source();
        let local = Scripted::new(ExtractionMethod::Local, vec![text("local")]);
        let remote_strategy = Scripted::new(ExtractionMethod::Remote, vec![text("remote")]);
        let extractor = Extractor::new(local.clone(), remote(&remote_strategy), false);

        let extraction = extractor
            .extract(&path, dir.path(), ParserPolicy::Auto)
            .await
            .expect("extract");
        assert_eq!(extraction.method, ExtractionMethod::Remote);
        assert_eq!(extraction.result.text(), "remote");
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
        assert!(dir.path().join(IMAGES_DIR).is_dir());
    }

    #[tokio::test]
    async fn auto_falls_back_on_error_and_on_empty_text() {
        let (dir, path) = source();
        let local = Scripted::new(ExtractionMethod::Local, vec![text("local text")]);
        let failing = Scripted::new(
            ExtractionMethod::Remote,
            vec![Err(ExtractionError::InvalidResponse("boom".into()))],
        );
        let extractor = Extractor::new(local.clone(), remote(&failing), false);
        let extraction = extractor
            .extract(&path, dir.path(), ParserPolicy::Auto)
            .await
            .expect("extract");
        assert_eq!(extraction.method, ExtractionMethod::Local);

        let empty = Scripted::new(ExtractionMethod::Remote, vec![text("   ")]);
        let extractor = Extractor::new(local, remote(&empty), false);
        let extraction = extractor
            .extract(&path, dir.path(), ParserPolicy::Auto)
            .await
            .expect("extract");
        assert_eq!(extraction.method, ExtractionMethod::Local);
        assert_eq!(empty.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn local_fallback_clears_images_of_the_empty_remote_attempt() {
        let (dir, path) = source();
        let images_dir = dir.path().join(IMAGES_DIR);
        std::fs::create_dir_all(&images_dir).expect("images dir");
        let stale = images_dir.join("remote_0.png");
        std::fs::write(&stale, b"png").expect("stale image");

        let local = Scripted::new(ExtractionMethod::Local, vec![text("local text")]);
        let empty = Scripted::new(
            ExtractionMethod::Remote,
            vec![Ok(ExtractionResult::new(String::new(), vec![stale.clone()]))],
        );
        let extractor = Extractor::new(local, remote(&empty), false);
        let extraction = extractor
            .extract(&path, dir.path(), ParserPolicy::Auto)
            .await
            .expect("extract");

        assert_eq!(extraction.method, ExtractionMethod::Local);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn auto_failure_reports_both_strategies() {
        let (dir, path) = source();
        let local = Scripted::new(
            ExtractionMethod::Local,
            vec![Err(ExtractionError::Pdf("broken xref".into()))],
        );
        let failing = Scripted::new(
            ExtractionMethod::Remote,
            vec![Err(ExtractionError::InvalidResponse("gateway html".into()))],
        );
        let extractor = Extractor::new(local, remote(&failing), false);
        let error = extractor
            .extract(&path, dir.path(), ParserPolicy::Auto)
            .await
            .unwrap_err();

        assert!(matches!(error, ExtractionError::AllStrategiesFailed { .. }));
        let message = error.to_string();
        assert!(message.contains("gateway html"));
        assert!(message.contains("broken xref"));
    }

    #[tokio::test]
    async fn retry_empty_gives_remote_a_second_chance() {
        let (dir, path) = source();
        let local = Scripted::new(ExtractionMethod::Local, vec![text("local")]);
        let second_chance = Scripted::new(ExtractionMethod::Remote, vec![text(""), text("second")]);
        let extractor = Extractor::new(local, remote(&second_chance), true);

        let extraction = extractor
            .extract(&path, dir.path(), ParserPolicy::Auto)
            .await
            .expect("extract");
        assert_eq!(extraction.result.text(), "second");
        assert_eq!(second_chance.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_content_anywhere_is_an_error() {
        let (dir, path) = source();
        let local = Scripted::new(ExtractionMethod::Local, vec![text("")]);
        let extractor = Extractor::new(local, None, false);
        let error = extractor
            .extract(&path, dir.path(), ParserPolicy::Local)
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractionError::NoContent(_)));

        let error = extractor
            .extract(&path, dir.path(), ParserPolicy::Remote)
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractionError::RemoteUnavailable(_)));
    }

    #[tokio::test]
    async fn missing_source_fails_before_any_strategy_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let local = Scripted::new(ExtractionMethod::Local, vec![text("x")]);
        let extractor = Extractor::new(local.clone(), None, false);
        let error = extractor
            .extract(&dir.path().join("gone.pdf"), dir.path(), ParserPolicy::Auto)
            .await
            .unwrap_err();
        assert!(matches!(error, ExtractionError::SourceUnavailable { .. }));
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
    }
}
