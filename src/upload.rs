//! Upload intake: validation, storage, and document creation.
//!
//! Validation failures are rejected synchronously and never create a
//! Document row. A file name that already exists is answered with the
//! existing document instead of storing the bytes again. That is a cheap
//! short-circuit only; authoritative duplicate detection is the content
//! hash inside the pipeline.

use anyhow::Result;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::models::DocumentStatus;
use crate::pipeline::Pipeline;

pub const PDF_MIME: &str = "application/pdf";

/// Synchronous rejection of an upload. Every variant except `Internal`
/// maps to a client error.
#[derive(Debug)]
pub enum UploadError {
    NotPdf(String),
    TooLarge { size: u64, max: u64 },
    EmptyFileName,
    Internal(anyhow::Error),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::NotPdf(ct) => write!(f, "only PDF uploads are accepted (got: {})", ct),
            UploadError::TooLarge { size, max } => {
                write!(f, "file is too large ({} bytes, maximum {})", size, max)
            }
            UploadError::EmptyFileName => write!(f, "file name must not be empty"),
            UploadError::Internal(e) => write!(f, "upload failed: {}", e),
        }
    }
}

impl std::error::Error for UploadError {}

impl From<anyhow::Error> for UploadError {
    fn from(e: anyhow::Error) -> Self {
        UploadError::Internal(e)
    }
}

impl From<sqlx::Error> for UploadError {
    fn from(e: sqlx::Error) -> Self {
        UploadError::Internal(e.into())
    }
}

/// Result of an accepted upload request.
#[derive(Debug)]
pub enum UploadOutcome {
    /// A new document row was created with status `pending`.
    Created { document_id: String, blob_ref: String },
    /// A document with this file name already exists; nothing was stored.
    ExistingFileName {
        document_id: String,
        status: DocumentStatus,
    },
}

/// Validate and store an upload, creating the `pending` document row.
///
/// Does not start processing: callers decide whether to fire the pipeline
/// in the background (HTTP upload) or drive it synchronously (CLI).
pub async fn upload_document(
    pipeline: &Pipeline,
    file_name: &str,
    content_type: &str,
    bytes: &[u8],
) -> Result<UploadOutcome, UploadError> {
    if file_name.trim().is_empty() {
        return Err(UploadError::EmptyFileName);
    }
    if content_type != PDF_MIME {
        return Err(UploadError::NotPdf(content_type.to_string()));
    }
    let max = pipeline.config().server.max_upload_bytes;
    if bytes.len() as u64 > max {
        return Err(UploadError::TooLarge {
            size: bytes.len() as u64,
            max,
        });
    }

    // File-name short-circuit, before any bytes hit storage.
    if let Some(row) = sqlx::query("SELECT id, status FROM documents WHERE file_name = ? LIMIT 1")
        .bind(file_name)
        .fetch_optional(pipeline.pool())
        .await?
    {
        let status_str: String = row.get("status");
        let status = DocumentStatus::parse(&status_str)
            .ok_or_else(|| anyhow::anyhow!("unknown document status in store: {}", status_str))?;
        let document_id: String = row.get("id");
        info!(file_name, %document_id, "upload matched an existing file name");
        return Ok(UploadOutcome::ExistingFileName {
            document_id,
            status,
        });
    }

    let blob_ref = pipeline.store().put(file_name, bytes).await?;

    let document_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO documents (id, file_name, blob_ref, file_size, status, uploaded_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&document_id)
    .bind(file_name)
    .bind(&blob_ref)
    .bind(bytes.len() as i64)
    .bind(DocumentStatus::Pending.as_str())
    .bind(now)
    .execute(pipeline.pool())
    .await?;

    info!(%document_id, file_name, size = bytes.len(), "document uploaded");

    Ok(UploadOutcome::Created {
        document_id,
        blob_ref,
    })
}
