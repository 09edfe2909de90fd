//! HTTP surface for ParseNote.
//!
//! This module exposes a compact Axum router over the processing pipeline:
//!
//! - `POST /documents` – Register a source file by path; returns its `doc_id`.
//! - `GET /documents` / `GET /documents/:id` – Inspect registered documents and their status.
//! - `DELETE /documents/:id` – Remove a document and its output directory.
//! - `POST /documents/:id/process` – Start processing on a background task (202 Accepted).
//! - `POST /combine` – Render processed documents into the combined corpus.
//! - `POST /query` – Answer a question from the combined corpus.
//! - `GET /metrics` – Observe processing counters.
//! - `GET /commands` – route catalog with example request bodies.

use crate::config::ParserPolicy;
use crate::processing::{Document, PipelineError, ProcessOptions, ProcessingApi, QueryAnswer};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Build the HTTP router exposing the pipeline.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: ProcessingApi + 'static,
{
    Router::new()
        .route(
            "/documents",
            get(list_documents::<S>).post(add_document::<S>),
        )
        .route(
            "/documents/:id",
            get(get_document::<S>).delete(remove_document::<S>),
        )
        .route("/documents/:id/process", post(process_document::<S>))
        .route("/combine", post(combine::<S>))
        .route("/query", post(query::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for `POST /documents`.
#[derive(Deserialize)]
struct AddRequest {
    /// Path of the source file on the server's filesystem.
    path: PathBuf,
}

#[derive(Serialize)]
struct AddResponse {
    doc_id: String,
}

/// Register a document; re-adding a known path returns the existing id.
async fn add_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<AddRequest>,
) -> Result<(StatusCode, Json<AddResponse>), AppError>
where
    S: ProcessingApi,
{
    let doc_id = service.add_document(request.path).await?;
    Ok((StatusCode::CREATED, Json(AddResponse { doc_id })))
}

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<Document>,
}

async fn list_documents<S>(State(service): State<Arc<S>>) -> Json<DocumentsResponse>
where
    S: ProcessingApi,
{
    Json(DocumentsResponse {
        documents: service.list_documents().await,
    })
}

async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(doc_id): Path<String>,
) -> Result<Json<Document>, AppError>
where
    S: ProcessingApi,
{
    Ok(Json(service.get_document(&doc_id).await?))
}

async fn remove_document<S>(
    State(service): State<Arc<S>>,
    Path(doc_id): Path<String>,
) -> Result<StatusCode, AppError>
where
    S: ProcessingApi,
{
    if service.remove_document(&doc_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError(PipelineError::NotFound(doc_id)))
    }
}

/// Request body for `POST /documents/:id/process`.
#[derive(Deserialize, Default)]
struct ProcessRequest {
    /// Parser policy override (`local`, `remote`, `auto`).
    #[serde(default)]
    parser: Option<ParserPolicy>,
    /// Skip OCR of extracted images.
    #[serde(default)]
    skip_ocr: bool,
}

/// Start processing in the background; poll `GET /documents/:id` for the result.
async fn process_document<S>(
    State(service): State<Arc<S>>,
    Path(doc_id): Path<String>,
    request: Option<Json<ProcessRequest>>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError>
where
    S: ProcessingApi + 'static,
{
    let document = service.get_document(&doc_id).await?;
    if document.status == crate::processing::DocumentStatus::Processing {
        return Err(AppError(PipelineError::AlreadyProcessing(doc_id)));
    }
    let Json(request) = request.unwrap_or_default();
    let options = ProcessOptions {
        parser: request.parser,
        skip_ocr: request.skip_ocr,
    };

    let worker = service.clone();
    let id = doc_id.clone();
    tokio::spawn(async move {
        match worker.process_document(&id, options).await {
            Ok(outcome) => tracing::info!(
                doc_id = %id,
                status = outcome.status.as_str(),
                "Background processing finished"
            ),
            Err(err) => tracing::warn!(doc_id = %id, error = %err, "Background processing rejected"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "doc_id": doc_id, "status": "processing" })),
    ))
}

#[derive(Serialize)]
struct CombineResponse {
    corpus: String,
}

async fn combine<S>(State(service): State<Arc<S>>) -> Result<Json<CombineResponse>, AppError>
where
    S: ProcessingApi,
{
    let corpus = service.combine().await?;
    Ok(Json(CombineResponse { corpus }))
}

/// Request body for `POST /query`.
#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

async fn query<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryAnswer>, AppError>
where
    S: ProcessingApi,
{
    let answer = service.query(&request.question).await?;
    tracing::info!(success = answer.success, truncated = answer.truncated, "Query completed");
    Ok(Json(answer))
}

/// Return processing counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: ProcessingApi,
{
    Json(service.metrics_snapshot())
}

/// One route in the `/commands` catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// List the routes this server exposes, with example bodies.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "add",
                method: "POST",
                path: "/documents",
                description: "Register a PDF or text file by path. Response returns { \"doc_id\": string }.",
                request_example: Some(json!({ "path": "/data/report.pdf" })),
            },
            CommandDescriptor {
                name: "list",
                method: "GET",
                path: "/documents",
                description: "List registered documents with their processing status.",
                request_example: None,
            },
            CommandDescriptor {
                name: "remove",
                method: "DELETE",
                path: "/documents/:id",
                description: "Remove a document and delete its output directory.",
                request_example: None,
            },
            CommandDescriptor {
                name: "process",
                method: "POST",
                path: "/documents/:id/process",
                description: "Extract, OCR, and summarize a document on a background task.",
                request_example: Some(json!({ "parser": "auto", "skip_ocr": false })),
            },
            CommandDescriptor {
                name: "combine",
                method: "POST",
                path: "/combine",
                description: "Merge processed documents into the combined corpus.",
                request_example: None,
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/query",
                description: "Answer a question using the combined corpus as context.",
                request_example: Some(json!({ "question": "What do the reports conclude?" })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return processing counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

struct AppError(PipelineError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::NoProcessedDocuments | PipelineError::AlreadyProcessing(_) => {
                StatusCode::CONFLICT
            }
            PipelineError::MissingSource(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{create_router, get_commands};
    use crate::metrics::MetricsSnapshot;
    use crate::processing::{
        DocType, Document, DocumentStatus, PipelineError, ProcessOptions, ProcessingApi,
        ProcessingOutcome, QueryAnswer,
    };
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    #[tokio::test]
    async fn commands_catalog_exposes_process_endpoint() {
        let response = get_commands().await;
        let commands = response.0.commands;
        let process = commands
            .iter()
            .find(|cmd| cmd.name == "process")
            .expect("process command present");

        assert_eq!(process.method, "POST");
        assert_eq!(process.path, "/documents/:id/process");
        assert!(commands.len() >= 6);
    }

    #[tokio::test]
    async fn add_route_returns_created_id() {
        let service = Arc::new(StubService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(json_request(Method::POST, "/documents", json!({"path": "/data/a.pdf"})))
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["doc_id"], "doc-1");
        assert_eq!(
            service.added.lock().await.as_slice(),
            &[PathBuf::from("/data/a.pdf")]
        );
    }

    #[tokio::test]
    async fn unknown_document_maps_to_not_found() {
        let app = create_router(Arc::new(StubService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/documents/missing")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap_or_default().contains("missing"));
    }

    #[tokio::test]
    async fn process_route_accepts_and_runs_in_background() {
        let service = Arc::new(StubService::default());
        let app = create_router(service.clone());

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/documents/doc-1/process",
                json!({"parser": "local"}),
            ))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        for _ in 0..50 {
            if !service.processed.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(service.processed.lock().await.as_slice(), &["doc-1".to_string()]);
    }

    #[tokio::test]
    async fn combine_without_processed_documents_conflicts() {
        let app = create_router(Arc::new(StubService::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/combine")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body).expect("json body")
    }

    #[derive(Default)]
    struct StubService {
        added: Mutex<Vec<PathBuf>>,
        processed: Mutex<Vec<String>>,
    }

    fn stub_document() -> Document {
        Document {
            doc_id: "doc-1".into(),
            filename: "a.pdf".into(),
            path: PathBuf::from("/data/a.pdf"),
            doc_type: DocType::Pdf,
            status: DocumentStatus::Unprocessed,
            output_dir: None,
            added_date: "2026-01-01T00:00:00Z".into(),
            error: None,
            processed: None,
        }
    }

    #[async_trait]
    impl ProcessingApi for StubService {
        async fn add_document(&self, path: PathBuf) -> Result<String, PipelineError> {
            self.added.lock().await.push(path);
            Ok("doc-1".into())
        }

        async fn list_documents(&self) -> Vec<Document> {
            vec![stub_document()]
        }

        async fn get_document(&self, doc_id: &str) -> Result<Document, PipelineError> {
            if doc_id == "doc-1" {
                Ok(stub_document())
            } else {
                Err(PipelineError::NotFound(doc_id.into()))
            }
        }

        async fn remove_document(&self, doc_id: &str) -> Result<bool, PipelineError> {
            Ok(doc_id == "doc-1")
        }

        async fn process_document(
            &self,
            doc_id: &str,
            _options: ProcessOptions,
        ) -> Result<ProcessingOutcome, PipelineError> {
            self.processed.lock().await.push(doc_id.to_string());
            Ok(ProcessingOutcome {
                doc_id: doc_id.into(),
                status: DocumentStatus::Processed,
                parser: None,
                chunk_count: 1,
                merged: false,
                output_dir: None,
                error: None,
            })
        }

        async fn combine(&self) -> Result<String, PipelineError> {
            Err(PipelineError::NoProcessedDocuments)
        }

        async fn query(&self, _question: &str) -> Result<QueryAnswer, PipelineError> {
            Err(PipelineError::NoProcessedDocuments)
        }

        fn metrics_snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot {
                documents_processed: 0,
                documents_failed: 0,
                chunks_summarized: 0,
                merge_calls: 0,
            }
        }
    }
}
