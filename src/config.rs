//! Environment-driven configuration.
//!
//! [`Config::from_env`] loads `.env` and reads every setting once; [`Config::from_lookup`] takes
//! any key lookup so tests can build configurations without touching the process environment.

use crate::processing::ChunkingError;
use crate::retry::RetryPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_WORKSPACE: &str = "workspace";
const DEFAULT_CHAT_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_DIGITIZER_URL: &str = "https://api.upstage.ai/v1/document-digitization";
const DEFAULT_OCR_LANGUAGE: &str = "kor+eng";
const DEFAULT_SUMMARY_LANGUAGE: &str = "English";
const DEFAULT_CONTEXT_TOKEN_BUDGET: usize = 8000;

/// Errors encountered while loading configuration or constructing backends from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable (usually a credential) was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Chunking parameters cannot produce a terminating split.
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ChunkingError),
    /// The HTTP client for a remote collaborator could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Runtime configuration for the ParseNote pipeline and its binaries.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace holding the metadata record, per-document output, and the combined corpus.
    pub workspace_dir: PathBuf,
    /// Summarization backend selection and sampling parameters.
    pub summary: SummaryConfig,
    /// Remote document-digitization service and parser policy.
    pub digitizer: DigitizerConfig,
    /// OCR collaborator; `None` disables OCR of extracted images.
    pub ocr: Option<OcrConfig>,
    /// Timeout and retry policy shared by every remote call.
    pub retry: RetryPolicy,
    /// Token budget for the cross-document query context.
    pub context_token_budget: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Interchangeable summarization backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryBackendKind {
    /// Hosted chat-completions API.
    RemoteChat,
    /// Local inference runtime (Ollama).
    LocalInference,
}

impl SummaryBackendKind {
    /// Stable identity used for threshold lookups and logging.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RemoteChat => "remote-chat",
            Self::LocalInference => "local-inference",
        }
    }

    /// Default model identity when none is configured.
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::RemoteChat => "gpt-4-turbo-preview",
            Self::LocalInference => "llama3:latest",
        }
    }
}

impl FromStr for SummaryBackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" | "remote-chat" | "openai" | "chat" => Ok(Self::RemoteChat),
            "local" | "local-inference" | "ollama" | "llama" => Ok(Self::LocalInference),
            _ => Err(()),
        }
    }
}

/// Extraction strategy selection policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserPolicy {
    /// Render the PDF locally.
    Local,
    /// Submit the PDF to the remote digitization service.
    Remote,
    /// Remote first, local on error or empty text.
    #[default]
    Auto,
}

impl FromStr for ParserPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" | "upstage" => Ok(Self::Remote),
            "auto" => Ok(Self::Auto),
            _ => Err(()),
        }
    }
}

/// Settings for the summarization backend.
#[derive(Debug, Clone)]
pub struct SummaryConfig {
    /// Which backend variant to construct.
    pub backend: SummaryBackendKind,
    /// Model identity; falls back to [`SummaryBackendKind::default_model`].
    pub model: Option<String>,
    /// Alternate model tried once when the primary returns an empty or malformed response.
    pub fallback_model: Option<String>,
    /// Base URL of the chat-completions API.
    pub chat_api_url: String,
    /// Credential for the chat-completions API.
    pub chat_api_key: Option<String>,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum generated length.
    pub max_output_tokens: u32,
    /// Output language requested in prompts.
    pub language: String,
    /// Override for the oversize threshold (characters).
    pub chunk_threshold: Option<usize>,
    /// Override for the chunk target size (characters).
    pub chunk_size: Option<usize>,
    /// Override for the chunk overlap (characters).
    pub chunk_overlap: Option<usize>,
    /// Whether chunk summaries are synthesized by a merge call.
    pub merge_enabled: bool,
}

impl SummaryConfig {
    /// Effective model identity for the configured backend.
    pub fn model_name(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.backend.default_model().to_string())
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            backend: SummaryBackendKind::LocalInference,
            model: None,
            fallback_model: None,
            chat_api_url: DEFAULT_CHAT_API_URL.to_string(),
            chat_api_key: None,
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            temperature: 0.3,
            max_output_tokens: 2000,
            language: DEFAULT_SUMMARY_LANGUAGE.to_string(),
            chunk_threshold: None,
            chunk_size: None,
            chunk_overlap: None,
            merge_enabled: true,
        }
    }
}

/// Settings for the remote document-digitization service.
#[derive(Debug, Clone)]
pub struct DigitizerConfig {
    /// Endpoint accepting multipart PDF uploads.
    pub url: String,
    /// Bearer credential; required by the `remote` and `auto` policies.
    pub api_key: Option<String>,
    /// Default extraction policy.
    pub policy: ParserPolicy,
    /// Retry the remote service once on an empty-but-successful response before falling back.
    pub retry_empty: bool,
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DIGITIZER_URL.to_string(),
            api_key: None,
            policy: ParserPolicy::Auto,
            retry_empty: false,
        }
    }
}

/// Settings for the OCR collaborator.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Base URL of the OCR server.
    pub url: String,
    /// Language code passed with every request.
    pub language: String,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let backend = match get("SUMMARY_BACKEND") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("SUMMARY_BACKEND".into()))?,
            None => SummaryBackendKind::LocalInference,
        };
        let policy = match get("PARSER_POLICY") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("PARSER_POLICY".into()))?,
            None => ParserPolicy::Auto,
        };

        let defaults = SummaryConfig::default();
        let summary = SummaryConfig {
            backend,
            model: get("SUMMARY_MODEL"),
            fallback_model: get("SUMMARY_FALLBACK_MODEL"),
            chat_api_url: get("CHAT_API_URL").unwrap_or(defaults.chat_api_url),
            chat_api_key: get("CHAT_API_KEY"),
            ollama_url: get("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            temperature: parse_optional(&get, "SUMMARY_TEMPERATURE")?
                .unwrap_or(defaults.temperature),
            max_output_tokens: parse_optional(&get, "SUMMARY_MAX_OUTPUT_TOKENS")?
                .unwrap_or(defaults.max_output_tokens),
            language: get("SUMMARY_LANGUAGE").unwrap_or(defaults.language),
            chunk_threshold: parse_optional(&get, "SUMMARY_CHUNK_THRESHOLD")?,
            chunk_size: parse_optional(&get, "SUMMARY_CHUNK_SIZE")?,
            chunk_overlap: parse_optional(&get, "SUMMARY_CHUNK_OVERLAP")?,
            merge_enabled: parse_flag(&get, "SUMMARY_MERGE")?.unwrap_or(true),
        };

        let digitizer = DigitizerConfig {
            url: get("DIGITIZER_URL").unwrap_or_else(|| DEFAULT_DIGITIZER_URL.to_string()),
            api_key: get("DIGITIZER_API_KEY"),
            policy,
            retry_empty: parse_flag(&get, "AUTO_RETRY_EMPTY")?.unwrap_or(false),
        };

        let ocr = get("OCR_URL").map(|url| OcrConfig {
            url,
            language: get("OCR_LANGUAGE").unwrap_or_else(|| DEFAULT_OCR_LANGUAGE.to_string()),
        });

        let mut retry = RetryPolicy::default();
        if let Some(secs) = parse_optional::<u64, _>(&get, "REMOTE_TIMEOUT_SECS")? {
            retry.timeout = Duration::from_secs(secs);
        }
        if let Some(max_retries) = parse_optional(&get, "REMOTE_MAX_RETRIES")? {
            retry.max_retries = max_retries;
        }
        if let Some(millis) = parse_optional::<u64, _>(&get, "REMOTE_INITIAL_BACKOFF_MS")? {
            // A zero delay would make every backoff zero instead of growing.
            if millis == 0 {
                return Err(ConfigError::InvalidValue("REMOTE_INITIAL_BACKOFF_MS".into()));
            }
            retry.initial_backoff = Duration::from_millis(millis);
        }

        Ok(Self {
            workspace_dir: get("PARSENOTE_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE)),
            summary,
            digitizer,
            ocr,
            retry,
            context_token_budget: parse_optional(&get, "CONTEXT_TOKEN_BUDGET")?
                .unwrap_or(DEFAULT_CONTEXT_TOKEN_BUDGET),
            server_port: parse_optional(&get, "SERVER_PORT")?,
        })
    }
}

fn parse_optional<T, F>(get: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_flag<F>(get: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(key.to_string())),
        })
        .transpose()
}

/// Load `.env` (when present) and build the configuration from the process environment.
pub fn load_config() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        workspace = %config.workspace_dir.display(),
        backend = config.summary.backend.as_str(),
        model = %config.summary.model_name(),
        parser = ?config.digitizer.policy,
        ocr_enabled = config.ocr.is_some(),
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(config)
}
