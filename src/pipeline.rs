//! The document state machine.
//!
//! One `advance` call drives a document as far as it can go through
//! hash checking, text extraction, structuring, and embedding, writing each
//! status transition to the store before the next phase begins. Every phase
//! failure lands in the matching `*_failed` status with its error message;
//! a document is never left in a `*_processing` state, and an observer
//! polling status always sees a consistent phase marker.
//!
//! ```text
//! pending ── hash_checking ──┬── duplicate (terminal)
//!                            └── text_extraction_processing
//!                                  ├── text_extraction_failed (retryable)
//!                                  └── text_extraction_completed
//!                                        └── indexing_processing
//!                                              ├── indexing_failed (retryable)
//!                                              └── completed (terminal)
//! ```
//!
//! Concurrent triggers on the same document are arbitrated with an
//! optimistic conditional update: the claim only transitions out of the
//! status the caller read, so a lost race becomes a per-item failure
//! instead of two workers processing the same row.

use anyhow::{anyhow, Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::{error, info, warn};

use crate::chunk::split_text;
use crate::config::Config;
use crate::dedup::{content_hash, find_duplicate};
use crate::embedding::{self, EmbeddingProvider};
use crate::extract::{create_extractor, TextExtract};
use crate::models::{Document, DocumentStatus, EmbeddingChunk, ItemOutcome};
use crate::records::{extract_report, replace_records, upsert_organization};
use crate::storage::BlobStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct AdvanceOptions {
    /// Re-run a completed document from hash checking, replacing its chunk
    /// set and superseding its financial records.
    pub force_reprocess: bool,
}

/// The pipeline with its injected collaborators. Constructed once at
/// bootstrap and shared behind an `Arc`; nothing here is process-global.
pub struct Pipeline {
    config: Config,
    pool: SqlitePool,
    store: BlobStore,
    extractor: Box<dyn TextExtract>,
    provider: Box<dyn EmbeddingProvider>,
}

impl Pipeline {
    pub fn new(config: Config, pool: SqlitePool, store: BlobStore) -> Result<Self> {
        let extractor = create_extractor(&config.extractor)?;
        let provider = embedding::create_provider(&config.embedding)?;
        Ok(Self {
            config,
            pool,
            store,
            extractor,
            provider,
        })
    }

    /// Replace the extraction backend (e.g. with a hosted document-AI
    /// client) without touching the rest of the machine.
    pub fn with_extractor(mut self, extractor: Box<dyn TextExtract>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Drive one document through the machine. Idempotent: a completed
    /// document without `force_reprocess` is a no-op success. Never panics
    /// and never returns a transport error; every problem is captured in
    /// the outcome and, where a phase was underway, on the document row.
    pub async fn advance(&self, document_id: &str, options: AdvanceOptions) -> ItemOutcome {
        match self.advance_inner(document_id, options).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(document_id, error = %e, "advance failed unexpectedly");
                ItemOutcome::failed(document_id, e.to_string())
            }
        }
    }

    async fn advance_inner(
        &self,
        document_id: &str,
        options: AdvanceOptions,
    ) -> Result<ItemOutcome> {
        let Some(doc) = self.load_document(document_id).await? else {
            return Ok(ItemOutcome::failed(document_id, "document not found"));
        };

        // Terminal states are no-ops unless a reprocess is forced.
        if doc.status == DocumentStatus::Completed && !options.force_reprocess {
            return Ok(ItemOutcome::ok(document_id, "already processed"));
        }
        if doc.status == DocumentStatus::Duplicate && !options.force_reprocess {
            let of = doc.duplicate_of.as_deref().unwrap_or("unknown");
            return Ok(ItemOutcome::ok(
                document_id,
                format!("duplicate of document {}", of),
            ));
        }

        // Optimistic claim: transition out of the status we read, or lose
        // the race and report it instead of double-processing.
        let claimed = sqlx::query(
            "UPDATE documents SET status = ?, attempt_count = attempt_count + 1 \
             WHERE id = ? AND status = ?",
        )
        .bind(DocumentStatus::HashChecking.as_str())
        .bind(&doc.id)
        .bind(doc.status.as_str())
        .execute(&self.pool)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(ItemOutcome::failed(
                document_id,
                "document was claimed by another worker",
            ));
        }

        info!(document_id, from = %doc.status, "processing document");

        // Text already extracted and only indexing left: skip the download
        // and extraction phases entirely.
        let reusable_text = match (&doc.status, &doc.extracted_text) {
            (DocumentStatus::IndexingFailed, Some(text))
                if !options.force_reprocess && !text.trim().is_empty() =>
            {
                Some(text.clone())
            }
            _ => None,
        };

        let text = match reusable_text {
            Some(text) => text,
            None => match self.extraction_phase(&doc).await {
                Ok(Extracted::Duplicate(of)) => {
                    return Ok(ItemOutcome::ok(
                        document_id,
                        format!("duplicate of document {}", of),
                    ));
                }
                Ok(Extracted::Text(text)) => text,
                Err(e) => {
                    self.record_failure(
                        &doc.id,
                        DocumentStatus::TextExtractionFailed,
                        FailureField::Extraction,
                        &e,
                    )
                    .await;
                    return Ok(ItemOutcome::failed(document_id, e.to_string()));
                }
            },
        };

        match self.indexing_phase(&doc, &text).await {
            Ok(chunk_count) => {
                info!(document_id, chunk_count, "document completed");
                Ok(ItemOutcome::ok(
                    document_id,
                    format!("indexed with {} chunks", chunk_count),
                ))
            }
            Err(e) => {
                self.record_failure(
                    &doc.id,
                    DocumentStatus::IndexingFailed,
                    FailureField::Indexing,
                    &e,
                )
                .await;
                Ok(ItemOutcome::failed(document_id, e.to_string()))
            }
        }
    }

    /// Hash check, duplicate detection, then text extraction. Duplicate
    /// detection runs before any extraction work so identical uploads never
    /// pay for parsing twice.
    async fn extraction_phase(&self, doc: &Document) -> Result<Extracted> {
        let bytes = self
            .store
            .get(&doc.blob_ref)
            .await
            .with_context(|| format!("failed to download blob {}", doc.blob_ref))?;

        let hash = content_hash(&bytes);
        // The content hash is immutable once computed; only fill it in.
        sqlx::query("UPDATE documents SET content_hash = COALESCE(content_hash, ?) WHERE id = ?")
            .bind(&hash)
            .bind(&doc.id)
            .execute(&self.pool)
            .await?;

        if let Some(hit) = find_duplicate(&self.pool, &hash, &doc.id).await? {
            info!(document_id = %doc.id, canonical = %hit.id, "duplicate content detected");
            sqlx::query(
                "UPDATE documents SET status = ?, duplicate_of = ?, extraction_error = NULL \
                 WHERE id = ?",
            )
            .bind(DocumentStatus::Duplicate.as_str())
            .bind(&hit.id)
            .bind(&doc.id)
            .execute(&self.pool)
            .await?;
            return Ok(Extracted::Duplicate(hit.id));
        }

        self.set_status(&doc.id, DocumentStatus::TextExtractionProcessing)
            .await?;

        let text = self
            .extractor
            .extract(&bytes)
            .map_err(|e| anyhow!(e.to_string()))?;

        sqlx::query(
            "UPDATE documents SET status = ?, extracted_text = ?, extraction_error = NULL \
             WHERE id = ?",
        )
        .bind(DocumentStatus::TextExtractionCompleted.as_str())
        .bind(&text)
        .bind(&doc.id)
        .execute(&self.pool)
        .await?;

        Ok(Extracted::Text(text))
    }

    /// Structuring, chunking, and embedding, in that order. Chunks are
    /// replaced in a single transaction so two generations never coexist.
    async fn indexing_phase(&self, doc: &Document, text: &str) -> Result<usize> {
        sqlx::query("UPDATE documents SET status = ?, indexing_error = NULL WHERE id = ?")
            .bind(DocumentStatus::IndexingProcessing.as_str())
            .bind(&doc.id)
            .execute(&self.pool)
            .await?;

        // Structuring: required fields fail the phase; bad tables do not.
        let report = extract_report(text, &doc.file_name)?;
        for problem in &report.table_errors {
            warn!(document_id = %doc.id, %problem, "table skipped during structuring");
        }
        let org_id = upsert_organization(&self.pool, &report, &doc.id).await?;
        replace_records(&self.pool, &doc.id, &org_id, &report.records).await?;

        // Chunk + embed. Any embedding failure fails the whole document:
        // the chunk set is atomic, so there is no partial state to keep.
        let texts = split_text(
            text,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        );
        let vectors =
            embedding::embed_texts(self.provider.as_ref(), &self.config.embedding, &texts).await?;

        let chunks: Vec<EmbeddingChunk> = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk_text, vector))| EmbeddingChunk {
                document_id: doc.id.clone(),
                chunk_index: index as i64,
                text: chunk_text,
                embedding: vector,
                model: Some(self.provider.model_name().to_string()),
            })
            .collect();

        self.replace_chunks(&doc.id, &chunks).await?;

        let now = chrono::Utc::now().timestamp();
        let index_ref = format!("idx_{}_{}", doc.id, now);
        sqlx::query(
            "UPDATE documents SET status = ?, index_ref = ?, processed_at = ?, \
             indexing_error = NULL WHERE id = ?",
        )
        .bind(DocumentStatus::Completed.as_str())
        .bind(&index_ref)
        .bind(now)
        .bind(&doc.id)
        .execute(&self.pool)
        .await?;

        Ok(chunks.len())
    }

    /// Swap the document's chunk set in one transaction; the old and new
    /// generations never coexist for an observer.
    async fn replace_chunks(&self, document_id: &str, chunks: &[EmbeddingChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO document_chunks (document_id, chunk_index, text, embedding, model) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(embedding::vec_to_blob(&chunk.embedding))
            .bind(&chunk.model)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Best-effort failure write: the failed status must land even when the
    /// datastore is struggling, so its own error is logged, not propagated.
    async fn record_failure(
        &self,
        document_id: &str,
        status: DocumentStatus,
        field: FailureField,
        error: &anyhow::Error,
    ) {
        let column = match field {
            FailureField::Extraction => "extraction_error",
            FailureField::Indexing => "indexing_error",
        };
        warn!(document_id, status = %status, error = %error, "phase failed");
        let sql = format!(
            "UPDATE documents SET status = ?, {} = ? WHERE id = ?",
            column
        );
        if let Err(db_err) = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(error.to_string())
            .bind(document_id)
            .execute(&self.pool)
            .await
        {
            error!(document_id, error = %db_err, "failed to record failure status");
        }
    }

    pub async fn load_document(&self, document_id: &str) -> Result<Option<Document>> {
        let Some(row) = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(document_from_row(&row)?))
    }
}

enum Extracted {
    Duplicate(String),
    Text(String),
}

enum FailureField {
    Extraction,
    Indexing,
}

/// Map a datastore row to a [`Document`], rejecting unknown status strings
/// instead of trusting them.
pub fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let status_str: String = row.get("status");
    let status = DocumentStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown document status in store: {}", status_str))?;
    Ok(Document {
        id: row.get("id"),
        file_name: row.get("file_name"),
        blob_ref: row.get("blob_ref"),
        file_size: row.get("file_size"),
        content_hash: row.get("content_hash"),
        status,
        extracted_text: row.get("extracted_text"),
        extraction_error: row.get("extraction_error"),
        indexing_error: row.get("indexing_error"),
        duplicate_of: row.get("duplicate_of"),
        index_ref: row.get("index_ref"),
        attempt_count: row.get("attempt_count"),
        uploaded_at: row.get("uploaded_at"),
        processed_at: row.get("processed_at"),
    })
}
