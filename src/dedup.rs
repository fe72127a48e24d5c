//! Content-addressed duplicate detection.
//!
//! Two uploads with different file names but identical bytes must be
//! detected as duplicates, so the fingerprint is a SHA-256 over the full
//! byte stream, never the file name. The check runs before any extraction
//! work; the only mutation allowed first is recording the hash on the
//! document being processed.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

/// Hex SHA-256 digest of the uploaded bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A previously stored document with the same content hash.
#[derive(Debug, Clone)]
pub struct DuplicateHit {
    pub id: String,
    pub file_name: String,
}

/// Look up any other document carrying the same content hash.
pub async fn find_duplicate(
    pool: &SqlitePool,
    hash: &str,
    excluding_id: &str,
) -> Result<Option<DuplicateHit>> {
    let row = sqlx::query(
        "SELECT id, file_name FROM documents WHERE content_hash = ? AND id != ? LIMIT 1",
    )
    .bind(hash)
    .bind(excluding_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| DuplicateHit {
        id: r.get("id"),
        file_name: r.get("file_name"),
    }))
}
