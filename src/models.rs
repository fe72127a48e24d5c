//! Core data types for the ingestion pipeline.
//!
//! These types represent uploaded documents, their lifecycle status, the
//! embedding chunks derived from them, and the structured financial records
//! parsed out of report tables.

use serde::Serialize;

/// Lifecycle status of a document. Stored as text; parsed strictly at the
/// datastore boundary so an unknown string is an error, not a silent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Pending,
    HashChecking,
    Duplicate,
    TextExtractionProcessing,
    TextExtractionCompleted,
    TextExtractionFailed,
    IndexingProcessing,
    Completed,
    IndexingFailed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::HashChecking => "hash_checking",
            DocumentStatus::Duplicate => "duplicate",
            DocumentStatus::TextExtractionProcessing => "text_extraction_processing",
            DocumentStatus::TextExtractionCompleted => "text_extraction_completed",
            DocumentStatus::TextExtractionFailed => "text_extraction_failed",
            DocumentStatus::IndexingProcessing => "indexing_processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::IndexingFailed => "indexing_failed",
        }
    }

    pub fn parse(s: &str) -> Option<DocumentStatus> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "hash_checking" => Some(DocumentStatus::HashChecking),
            "duplicate" => Some(DocumentStatus::Duplicate),
            "text_extraction_processing" => Some(DocumentStatus::TextExtractionProcessing),
            "text_extraction_completed" => Some(DocumentStatus::TextExtractionCompleted),
            "text_extraction_failed" => Some(DocumentStatus::TextExtractionFailed),
            "indexing_processing" => Some(DocumentStatus::IndexingProcessing),
            "completed" => Some(DocumentStatus::Completed),
            "indexing_failed" => Some(DocumentStatus::IndexingFailed),
            _ => None,
        }
    }

    /// States the batch scheduler may pick up again.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Pending
                | DocumentStatus::TextExtractionFailed
                | DocumentStatus::IndexingFailed
        )
    }

    /// Terminal without an explicit reprocess flag.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Duplicate)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One uploaded PDF report and its processing state.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub blob_ref: String,
    pub file_size: i64,
    pub content_hash: Option<String>,
    pub status: DocumentStatus,
    pub extracted_text: Option<String>,
    pub extraction_error: Option<String>,
    pub indexing_error: Option<String>,
    pub duplicate_of: Option<String>,
    pub index_ref: Option<String>,
    pub attempt_count: i64,
    pub uploaded_at: i64,
    pub processed_at: Option<i64>,
}

/// A bounded text segment of a document prepared for embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingChunk {
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub model: Option<String>,
}

/// Whether a financial record came from an income or expenditure table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Income,
    Expenditure,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Income => "income",
            RecordKind::Expenditure => "expenditure",
        }
    }
}

/// A parsed income or expenditure line item, pre-persistence.
#[derive(Debug, Clone)]
pub struct FinancialRecord {
    pub kind: RecordKind,
    pub transaction_date: Option<String>,
    pub description: String,
    pub amount: i64,
    pub counterparty_name: Option<String>,
    pub counterparty_address: Option<String>,
    pub raw_row: String,
}

/// Per-document outcome of an `advance` call, reported back through the
/// on-demand trigger and the batch summary.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub document_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemOutcome {
    pub fn ok(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(document_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}
