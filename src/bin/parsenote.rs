//! Command-line entrypoint.
//!
//! Manages the workspace registry directly: add and remove documents, process them (several at
//! once run concurrently), combine the results, and ask questions across the combined corpus.
//! Shares all runtime configuration with the HTTP binary.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use parsenote::config::{self, ParserPolicy, SummaryBackendKind};
use parsenote::logging::{self, LoggingConfig};
use parsenote::ocr::{HttpOcrClient, recognize_batch, recognize_directory, render_ocr_text};
use parsenote::processing::{DocumentStatus, ProcessOptions, ProcessingService};
use serde::Serialize;

#[derive(Parser)]
#[command(
    name = "parsenote",
    about = "Summarize PDF and text documents and query them together"
)]
struct Cli {
    /// Workspace directory (overrides PARSENOTE_WORKSPACE).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register one or more documents.
    Add {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List registered documents.
    List,
    /// Remove a document and its output.
    Remove { doc_id: String },
    /// Process documents; without ids, every document not yet processed.
    Process {
        doc_ids: Vec<String>,
        /// Parser policy: local, remote, or auto.
        #[arg(long, value_parser = parse_parser)]
        parser: Option<ParserPolicy>,
        /// Summarization backend: remote or local.
        #[arg(long, value_parser = parse_backend)]
        backend: Option<SummaryBackendKind>,
        /// Model identity for the selected backend.
        #[arg(long)]
        model: Option<String>,
        /// Output language of summaries.
        #[arg(long)]
        language: Option<String>,
        /// Skip OCR of extracted images.
        #[arg(long)]
        no_ocr: bool,
    },
    /// Combine processed documents into one corpus.
    Combine {
        /// Also print the corpus.
        #[arg(long)]
        print: bool,
    },
    /// Run OCR over an image file or every image under a directory.
    Ocr { path: PathBuf },
    /// Ask a question across processed documents.
    Query {
        question: String,
        /// Save the answer under the workspace's queries/ directory.
        #[arg(long)]
        save: bool,
        /// Answer language.
        #[arg(long)]
        language: Option<String>,
    },
}

fn parse_parser(value: &str) -> Result<ParserPolicy, String> {
    value
        .parse()
        .map_err(|()| format!("unknown parser '{value}' (expected local, remote, or auto)"))
}

fn parse_backend(value: &str) -> Result<SummaryBackendKind, String> {
    value
        .parse()
        .map_err(|()| format!("unknown backend '{value}' (expected remote or local)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logging = logging::init_tracing(&LoggingConfig {
        default_filter: Some("warn".into()),
        ..LoggingConfig::from_env()
    });

    let mut config = config::load_config().context("Failed to load configuration")?;
    if let Some(workspace) = &cli.workspace {
        config.workspace_dir = workspace.clone();
    }
    match &cli.command {
        Command::Process {
            backend,
            model,
            language,
            ..
        } => {
            if let Some(backend) = backend {
                config.summary.backend = *backend;
            }
            if model.is_some() {
                config.summary.model = model.clone();
            }
            if let Some(language) = language {
                config.summary.language = language.clone();
            }
        }
        Command::Query {
            language: Some(language),
            ..
        } => config.summary.language = language.clone(),
        _ => {}
    }

    if let Command::Ocr { path } = &cli.command {
        return run_ocr(&config, path, cli.json).await;
    }

    let service = Arc::new(
        ProcessingService::open(&config)
            .await
            .context("Failed to initialize processing service")?,
    );
    let json = cli.json;

    match cli.command {
        Command::Add { paths } => {
            let mut added = Vec::new();
            for path in paths {
                let doc_id = service
                    .add(&path)
                    .await
                    .with_context(|| format!("Failed to add {}", path.display()))?;
                added.push(AddedDocument { doc_id, path });
            }
            emit(json, &added, |added| {
                for entry in added {
                    println!("{}  {}", entry.doc_id, entry.path.display());
                }
            })
        }
        Command::List => {
            let documents = service.list().await;
            emit(json, &documents, |documents| {
                if documents.is_empty() {
                    println!("No documents registered.");
                }
                for doc in documents {
                    println!(
                        "{}  {:<11}  {:<7}  {}",
                        doc.doc_id,
                        doc.status.as_str(),
                        doc.doc_type.as_str(),
                        doc.filename
                    );
                    if let Some(error) = &doc.error {
                        println!("    error: {error}");
                    }
                }
            })
        }
        Command::Remove { doc_id } => {
            if !service.remove(&doc_id).await? {
                bail!("Document not found: {doc_id}");
            }
            emit(json, &serde_json::json!({ "removed": &doc_id }), |_| {
                println!("Removed {doc_id}");
            })
        }
        Command::Process {
            doc_ids,
            parser,
            no_ocr,
            ..
        } => {
            let doc_ids = if doc_ids.is_empty() {
                service
                    .list()
                    .await
                    .into_iter()
                    .filter(|doc| doc.status != DocumentStatus::Processed)
                    .map(|doc| doc.doc_id)
                    .collect()
            } else {
                doc_ids
            };
            if doc_ids.is_empty() {
                println!("Nothing to process.");
                return Ok(());
            }

            let options = ProcessOptions {
                parser,
                skip_ocr: no_ocr,
            };
            let handles: Vec<_> = doc_ids
                .into_iter()
                .map(|doc_id| service.spawn_process(doc_id, options.clone()))
                .collect();
            let mut outcomes = Vec::with_capacity(handles.len());
            for handle in handles {
                outcomes.push(handle.await.context("Processing task panicked")??);
            }

            let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
            emit(json, &outcomes, |outcomes| {
                for outcome in outcomes {
                    match &outcome.error {
                        None => println!(
                            "{}  processed  chunks={}  {}",
                            outcome.doc_id,
                            outcome.chunk_count,
                            outcome
                                .output_dir
                                .as_ref()
                                .map(|dir| dir.display().to_string())
                                .unwrap_or_default()
                        ),
                        Some(error) => println!("{}  failed  {error}", outcome.doc_id),
                    }
                }
            })?;
            if failed > 0 {
                return Err(anyhow!("{failed} document(s) failed to process"));
            }
            Ok(())
        }
        Command::Combine { print } => {
            let corpus = service.combine().await?;
            let path = service.workspace().join(parsenote::processing::combine::COMBINED_FILE);
            emit(
                json,
                &serde_json::json!({ "path": &path, "chars": corpus.chars().count() }),
                |_| {
                    if print {
                        println!("{corpus}");
                    } else {
                        println!("Combined corpus written to {}", path.display());
                    }
                },
            )
        }
        Command::Ocr { .. } => Ok(()),
        Command::Query { question, save, .. } => {
            let answer = service.query(&question).await?;
            if save {
                let (md, _) = service.save_query_result(&answer).await?;
                tracing::info!(path = %md.display(), "Saved query result");
            }
            emit(json, &answer, |answer| match (&answer.answer, &answer.error) {
                (Some(text), _) => println!("{text}"),
                (None, error) => eprintln!(
                    "Query failed: {}",
                    error.as_deref().unwrap_or("unknown error")
                ),
            })?;
            if !answer.success {
                bail!("Query failed");
            }
            Ok(())
        }
    }
}

async fn run_ocr(config: &config::Config, path: &Path, json: bool) -> Result<()> {
    let ocr_config = config
        .ocr
        .as_ref()
        .ok_or_else(|| anyhow!("OCR_URL is not set"))?;
    let client = HttpOcrClient::new(ocr_config, config.retry.clone())
        .context("Failed to build OCR client")?;
    if !client.health().await {
        tracing::warn!(url = %ocr_config.url, "OCR server did not answer its health check");
    }

    let results = if path.is_dir() {
        recognize_directory(&client, path).await
    } else {
        recognize_batch(&client, &[path.to_path_buf()]).await
    };
    if results.is_empty() {
        bail!("No images found under {}", path.display());
    }
    emit(json, &results, |results| println!("{}", render_ocr_text(results)))
}

#[derive(Serialize)]
struct AddedDocument {
    doc_id: String,
    path: PathBuf,
}

fn emit<T, F>(json: bool, value: &T, human: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(&T),
{
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to encode output")?
        );
    } else {
        human(value);
    }
    Ok(())
}
