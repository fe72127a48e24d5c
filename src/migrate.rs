use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Uploaded reports and their processing state. Documents are never
    // hard-deleted; status records their disposition.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            blob_ref TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            content_hash TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            extracted_text TEXT,
            extraction_error TEXT,
            indexing_error TEXT,
            duplicate_of TEXT,
            index_ref TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            uploaded_at INTEGER NOT NULL,
            processed_at INTEGER,
            FOREIGN KEY (duplicate_of) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding chunks, replaced wholesale on reindex.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT,
            PRIMARY KEY (document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Fund-management organizations, natural key (name, report_year).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            report_year INTEGER NOT NULL,
            total_income INTEGER NOT NULL DEFAULT 0,
            total_expenditure INTEGER NOT NULL DEFAULT 0,
            source_document_id TEXT,
            updated_at INTEGER NOT NULL,
            UNIQUE(name, report_year)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Parsed income/expenditure line items; kind is a closed tag.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS financial_records (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('income', 'expenditure')),
            transaction_date TEXT,
            description TEXT NOT NULL,
            amount INTEGER NOT NULL,
            counterparty_name TEXT,
            counterparty_address TEXT,
            raw_row TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (organization_id) REFERENCES organizations(id),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_file_name ON documents(file_name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_financial_records_document ON financial_records(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_financial_records_org ON financial_records(organization_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
