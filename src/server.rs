//! HTTP trigger surface for the ingestion pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Upload a PDF (multipart, field `file`) |
//! | `GET`  | `/documents` | List documents with status and errors |
//! | `GET`  | `/documents/{id}` | Fetch one document's processing state |
//! | `POST` | `/documents/index` | On-demand indexing for a list of ids |
//! | `GET`  | `/cron/process-queue` | Scheduled batch trigger (bearer secret) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Structural errors use a JSON body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "document_ids must not be empty" } }
//! ```
//!
//! Per-document processing failures are *not* top-level errors: the indexing
//! and cron triggers return 200 with per-item results, so a batch where one
//! PDF is corrupt still reports the others' outcomes.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::models::{Document, ItemOutcome};
use crate::pipeline::{document_from_row, AdvanceOptions, Pipeline};
use crate::scheduler::{run_batch, BatchSummary};
use crate::upload::{upload_document, UploadError, UploadOutcome, PDF_MIME};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Start the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();
    // Allow for multipart framing overhead on top of the PDF itself; the
    // precise file-size check happens in the upload module.
    let body_limit = pipeline.config().server.max_upload_bytes as usize + 64 * 1024;
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/documents", post(handle_upload).get(handle_list_documents))
        .route("/documents/index", post(handle_index))
        .route("/documents/{id}", get(handle_get_document))
        .route("/cron/process-queue", get(handle_cron))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state);

    info!(bind = %bind_addr, "pipeline server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "missing or invalid authorization".to_string(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /documents (upload) ============

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    document_id: String,
    status: String,
    message: String,
}

/// Multipart PDF upload. On success the document row is created with
/// status `pending` and processing is fired in the background; the
/// response does not wait for the pipeline.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| PDF_MIME.to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
            file = Some((file_name, content_type, bytes.to_vec()));
        }
    }

    let Some((file_name, content_type, bytes)) = file else {
        return Err(bad_request("multipart field 'file' is required"));
    };

    let outcome = upload_document(&state.pipeline, &file_name, &content_type, &bytes)
        .await
        .map_err(|e| match e {
            UploadError::Internal(inner) => internal(inner.to_string()),
            rejected => bad_request(rejected.to_string()),
        })?;

    match outcome {
        UploadOutcome::Created { document_id, .. } => {
            // Fire-and-forget: the upload response never waits for the
            // pipeline.
            let pipeline = state.pipeline.clone();
            let background_id = document_id.clone();
            tokio::spawn(async move {
                let outcome = pipeline
                    .advance(&background_id, AdvanceOptions::default())
                    .await;
                if !outcome.success {
                    error!(
                        document_id = %background_id,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "background processing failed"
                    );
                }
            });

            Ok((
                StatusCode::CREATED,
                Json(UploadResponse {
                    success: true,
                    document_id,
                    status: "pending".to_string(),
                    message: "upload accepted; processing started in the background".to_string(),
                }),
            ))
        }
        UploadOutcome::ExistingFileName {
            document_id,
            status,
        } => Ok((
            StatusCode::OK,
            Json(UploadResponse {
                success: true,
                document_id,
                status: status.as_str().to_string(),
                message: "a document with this file name already exists".to_string(),
            }),
        )),
    }
}

// ============ POST /documents/index ============

#[derive(Deserialize)]
struct IndexRequest {
    document_ids: Option<Vec<String>>,
    #[serde(default)]
    reprocess: bool,
}

#[derive(Serialize)]
struct IndexResponse {
    success: bool,
    results: Vec<ItemOutcome>,
    summary: IndexSummary,
}

#[derive(Serialize)]
struct IndexSummary {
    total: usize,
    successful: usize,
    failed: usize,
}

/// On-demand indexing. The call succeeds (200) even when individual
/// documents fail; only a missing or empty id list is a top-level error.
async fn handle_index(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, AppError> {
    let ids = match request.document_ids {
        Some(ids) if !ids.is_empty() => ids,
        _ => return Err(bad_request("document_ids must be a non-empty array")),
    };

    let options = AdvanceOptions {
        force_reprocess: request.reprocess,
    };

    let mut tasks = tokio::task::JoinSet::new();
    for id in ids.iter().cloned() {
        let pipeline = state.pipeline.clone();
        tasks.spawn(async move { pipeline.advance(&id, options).await });
    }

    let mut results = Vec::with_capacity(ids.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => results.push(outcome),
            Err(e) => results.push(ItemOutcome::failed("unknown", e.to_string())),
        }
    }

    let successful = results.iter().filter(|r| r.success).count();
    let failed = results.len() - successful;

    Ok(Json(IndexResponse {
        success: true,
        results,
        summary: IndexSummary {
            total: ids.len(),
            successful,
            failed,
        },
    }))
}

// ============ GET /cron/process-queue ============

#[derive(Serialize)]
struct CronResponse {
    success: bool,
    summary: BatchSummary,
}

/// Scheduled batch trigger. Requires `Authorization: Bearer <cron_secret>`.
async fn handle_cron(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CronResponse>, AppError> {
    let Some(expected) = state.pipeline.config().server.cron_secret.clone() else {
        return Err(unauthorized());
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != format!("Bearer {}", expected) {
        return Err(unauthorized());
    }

    let summary = run_batch(state.pipeline.clone())
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(CronResponse {
        success: true,
        summary,
    }))
}

// ============ GET /documents, GET /documents/{id} ============

/// What the dashboard needs to render a document row: always a status, and
/// an error string when a phase failed.
#[derive(Serialize)]
struct DocumentView {
    id: String,
    file_name: String,
    file_size: i64,
    status: String,
    content_hash: Option<String>,
    extraction_error: Option<String>,
    indexing_error: Option<String>,
    duplicate_of: Option<String>,
    index_ref: Option<String>,
    attempt_count: i64,
    uploaded_at: i64,
    processed_at: Option<i64>,
}

impl From<Document> for DocumentView {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            file_name: doc.file_name,
            file_size: doc.file_size,
            status: doc.status.as_str().to_string(),
            content_hash: doc.content_hash,
            extraction_error: doc.extraction_error,
            indexing_error: doc.indexing_error,
            duplicate_of: doc.duplicate_of,
            index_ref: doc.index_ref,
            attempt_count: doc.attempt_count,
            uploaded_at: doc.uploaded_at,
            processed_at: doc.processed_at,
        }
    }
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentView>>, AppError> {
    let rows = sqlx::query("SELECT * FROM documents ORDER BY uploaded_at DESC LIMIT 200")
        .fetch_all(state.pipeline.pool())
        .await
        .map_err(|e| internal(e.to_string()))?;

    let mut documents = Vec::with_capacity(rows.len());
    for row in &rows {
        let doc = document_from_row(row).map_err(|e| internal(e.to_string()))?;
        documents.push(DocumentView::from(doc));
    }

    Ok(Json(documents))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, AppError> {
    let doc = state
        .pipeline
        .load_document(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;

    Ok(Json(DocumentView::from(doc)))
}
