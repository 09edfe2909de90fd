//! Tracing configuration and log routing.
//!
//! Logs go to stdout using a compact formatter, and optionally to a file. When
//! `PARSENOTE_LOG_FILE` is set, logs are appended to that path; otherwise a file logger is
//! created under `logs/parsenote.log`. The non-blocking writer's guard is handed back to the
//! caller, so dropping the [`LoggingGuard`] flushes and shuts the writer down.
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "parsenote.log";

/// Where and how verbosely to log.
#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    /// Explicit log file; `None` selects `logs/parsenote.log`.
    pub file: Option<PathBuf>,
    /// Disable the file layer entirely.
    pub stdout_only: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: Option<String>,
}

impl LoggingConfig {
    /// Read `PARSENOTE_LOG_FILE` from the environment.
    pub fn from_env() -> Self {
        Self {
            file: std::env::var_os("PARSENOTE_LOG_FILE").map(PathBuf::from),
            ..Self::default()
        }
    }
}

/// Keeps the file writer alive; logs are flushed when it drops.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Configure tracing subscribers for stdout and optional file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to `info`).
/// - Installs a compact stdout layer and, when available, a file layer.
/// - Repeated calls leave the first subscriber in place.
pub fn init_tracing(config: &LoggingConfig) -> LoggingGuard {
    let default_filter = config.default_filter.as_deref().unwrap_or("info");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let file = if config.stdout_only {
        None
    } else {
        configure_file_writer(config.file.as_deref())
    };

    match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            let _ = registry.with(file_layer).try_init();
            LoggingGuard { _file: Some(guard) }
        }
        None => {
            let _ = registry.try_init();
            LoggingGuard { _file: None }
        }
    }
}

/// Build a non-blocking writer for file logging.
///
/// Returns `None` when the logs directory cannot be created or the target file cannot be opened.
fn configure_file_writer(path: Option<&Path>) -> Option<(NonBlocking, WorkerGuard)> {
    if let Some(path) = path {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => Some(tracing_appender::non_blocking(file)),
            Err(err) => {
                eprintln!("Failed to open log file {}: {err}", path.display());
                None
            }
        }
    } else {
        if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
            eprintln!("Failed to create logs directory: {err}");
            return None;
        }
        let file_appender = tracing_appender::rolling::never(DEFAULT_LOG_DIR, DEFAULT_LOG_FILE);
        Some(tracing_appender::non_blocking(file_appender))
    }
}
