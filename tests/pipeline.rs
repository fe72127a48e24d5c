//! Integration tests for the document state machine.
//!
//! Each test gets its own temp database and blob directory. Happy-path
//! tests inject a fixture extractor (the extraction backend is a capability
//! interface precisely so backends can be swapped); failure-path tests use
//! the real PDF parser against deliberately broken inputs.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

use shikin::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, ExtractorConfig, SchedulerConfig,
    ServerConfig, StorageConfig,
};
use shikin::chunk::split_text;
use shikin::db;
use shikin::extract::{ExtractError, TextExtract};
use shikin::migrate;
use shikin::models::DocumentStatus;
use shikin::pipeline::{AdvanceOptions, Pipeline};
use shikin::scheduler::run_batch;
use shikin::storage::BlobStore;
use shikin::upload::{upload_document, UploadError, UploadOutcome, PDF_MIME};

/// A report body with one income table, one expenditure table, and enough
/// prose to produce several chunks at the test chunk size.
const FIXTURE_REPORT: &str = "\
政治資金収支報告書（令和6年分）
政治団体の名称：山川政治研究会

この報告書は試験用の本文です。収支の総括表および明細を以下に記載します。
会計責任者が記録した内容をもとに、収入と支出の明細を整理しています。

収入の部

年月日  摘要  金額  寄附者の氏名  寄附者の住所
R6.5.10  個人寄附  1,000,000円  田中太郎  東京都千代田区
R6.6.01  会費収入  50000  佐藤花子  大阪府大阪市

支出の部

年月日  支出の目的  金額  支出先
R6.8.15  事務所賃料  240000  丸の内ビル管理
R6.9.01  印刷費  36000  株式会社印刷堂

以上のとおり、政治資金規正法に基づき報告します。
参考資料として領収書の写しを添付しています。
";

/// Extraction backend that returns a canned body for any non-empty input.
struct FixtureExtractor {
    text: String,
}

impl TextExtract for FixtureExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::EmptyFile);
        }
        Ok(self.text.clone())
    }
}

struct TestEnv {
    _tmp: TempDir,
    config: Config,
    pool: SqlitePool,
    store: BlobStore,
}

async fn setup() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("shikin.sqlite"),
        },
        storage: StorageConfig {
            root: tmp.path().join("blobs"),
        },
        chunking: ChunkingConfig {
            chunk_size: 200,
            overlap: 20,
        },
        embedding: EmbeddingConfig {
            provider: "deterministic".to_string(),
            model: None,
            dims: 32,
            max_retries: 1,
            timeout_secs: 5,
        },
        extractor: ExtractorConfig::default(),
        scheduler: SchedulerConfig {
            batch_size: 3,
            max_attempts: 5,
            cron: "0 */5 * * * *".to_string(),
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            cron_secret: Some("test-secret".to_string()),
            max_upload_bytes: 1024 * 1024,
        },
    };

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = BlobStore::new(&config.storage.root).unwrap();

    TestEnv {
        _tmp: tmp,
        config,
        pool,
        store,
    }
}

fn fixture_pipeline(env: &TestEnv, text: &str) -> Arc<Pipeline> {
    let pipeline = Pipeline::new(env.config.clone(), env.pool.clone(), env.store.clone())
        .unwrap()
        .with_extractor(Box::new(FixtureExtractor {
            text: text.to_string(),
        }));
    Arc::new(pipeline)
}

fn real_pipeline(env: &TestEnv) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(env.config.clone(), env.pool.clone(), env.store.clone()).unwrap())
}

async fn upload_ok(pipeline: &Pipeline, file_name: &str, bytes: &[u8]) -> String {
    match upload_document(pipeline, file_name, PDF_MIME, bytes)
        .await
        .unwrap()
    {
        UploadOutcome::Created { document_id, .. } => document_id,
        other => panic!("expected a created document, got {:?}", other),
    }
}

async fn status_of(pool: &SqlitePool, id: &str) -> DocumentStatus {
    let status: String = sqlx::query_scalar("SELECT status FROM documents WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap();
    DocumentStatus::parse(&status).unwrap()
}

async fn chunk_count(pool: &SqlitePool, id: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn record_count(pool: &SqlitePool, id: &str, kind: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM financial_records WHERE document_id = ? AND kind = ?",
    )
    .bind(id)
    .bind(kind)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn two_table_report_progresses_to_completed() {
    let env = setup().await;
    let pipeline = fixture_pipeline(&env, FIXTURE_REPORT);

    let doc_id = upload_ok(&pipeline, "yamakawa_2024.pdf", b"%PDF-fixture-one").await;
    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Pending);

    let outcome = pipeline.advance(&doc_id, AdvanceOptions::default()).await;
    assert!(outcome.success, "advance failed: {:?}", outcome.error);
    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Completed);

    // Chunk count equals the chunker's output for the extracted text.
    let expected_chunks = split_text(FIXTURE_REPORT, 200, 20).len() as i64;
    assert!(expected_chunks > 1, "fixture should span multiple chunks");
    assert_eq!(chunk_count(&env.pool, &doc_id).await, expected_chunks);

    // Chunk indices are contiguous from 0 and vectors have the right size.
    let rows = sqlx::query(
        "SELECT chunk_index, embedding FROM document_chunks WHERE document_id = ? ORDER BY chunk_index",
    )
    .bind(&doc_id)
    .fetch_all(&env.pool)
    .await
    .unwrap();
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.get::<i64, _>("chunk_index"), i as i64);
        assert_eq!(row.get::<Vec<u8>, _>("embedding").len(), 32 * 4);
    }

    // Both table kinds produced records.
    assert_eq!(record_count(&env.pool, &doc_id, "income").await, 2);
    assert_eq!(record_count(&env.pool, &doc_id, "expenditure").await, 2);

    // The organization was upserted with per-kind totals.
    let org = sqlx::query(
        "SELECT name, report_year, total_income, total_expenditure FROM organizations",
    )
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(org.get::<String, _>("name"), "山川政治研究会");
    assert_eq!(org.get::<i64, _>("report_year"), 2024);
    assert_eq!(org.get::<i64, _>("total_income"), 1_050_000);
    assert_eq!(org.get::<i64, _>("total_expenditure"), 276_000);

    // Completion metadata is recorded.
    let row = sqlx::query(
        "SELECT index_ref, processed_at, content_hash FROM documents WHERE id = ?",
    )
    .bind(&doc_id)
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert!(row.get::<Option<String>, _>("index_ref").is_some());
    assert!(row.get::<Option<i64>, _>("processed_at").is_some());
    assert!(row.get::<Option<String>, _>("content_hash").is_some());
}

#[tokio::test]
async fn identical_bytes_under_two_names_mark_the_second_duplicate() {
    let env = setup().await;
    let pipeline = fixture_pipeline(&env, FIXTURE_REPORT);
    let bytes = b"%PDF-identical-content";

    let first = upload_ok(&pipeline, "first_2024.pdf", bytes).await;
    let outcome = pipeline.advance(&first, AdvanceOptions::default()).await;
    assert!(outcome.success);
    assert_eq!(status_of(&env.pool, &first).await, DocumentStatus::Completed);

    let second = upload_ok(&pipeline, "second_2024.pdf", bytes).await;
    let outcome = pipeline.advance(&second, AdvanceOptions::default()).await;
    assert!(outcome.success);
    assert_eq!(status_of(&env.pool, &second).await, DocumentStatus::Duplicate);

    let duplicate_of: Option<String> =
        sqlx::query_scalar("SELECT duplicate_of FROM documents WHERE id = ?")
            .bind(&second)
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(duplicate_of.as_deref(), Some(first.as_str()));

    // Extraction and indexing never ran for the duplicate.
    assert_eq!(chunk_count(&env.pool, &second).await, 0);
    assert_eq!(record_count(&env.pool, &second, "income").await, 0);

    // Advancing a duplicate again is a no-op success.
    let attempts_before: i64 =
        sqlx::query_scalar("SELECT attempt_count FROM documents WHERE id = ?")
            .bind(&second)
            .fetch_one(&env.pool)
            .await
            .unwrap();
    let outcome = pipeline.advance(&second, AdvanceOptions::default()).await;
    assert!(outcome.success);
    assert!(outcome.message.unwrap().contains("duplicate"));
    let attempts_after: i64 =
        sqlx::query_scalar("SELECT attempt_count FROM documents WHERE id = ?")
            .bind(&second)
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(attempts_before, attempts_after);
}

#[tokio::test]
async fn zero_byte_upload_fails_extraction_immediately() {
    let env = setup().await;
    let pipeline = real_pipeline(&env);

    let doc_id = upload_ok(&pipeline, "empty_2023.pdf", b"").await;
    let outcome = pipeline.advance(&doc_id, AdvanceOptions::default()).await;

    assert!(!outcome.success);
    assert_eq!(
        status_of(&env.pool, &doc_id).await,
        DocumentStatus::TextExtractionFailed
    );

    let error: Option<String> =
        sqlx::query_scalar("SELECT extraction_error FROM documents WHERE id = ?")
            .bind(&doc_id)
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert!(error.unwrap().contains("empty"));

    assert_eq!(chunk_count(&env.pool, &doc_id).await, 0);
    assert_eq!(record_count(&env.pool, &doc_id, "income").await, 0);
    assert_eq!(record_count(&env.pool, &doc_id, "expenditure").await, 0);
}

#[tokio::test]
async fn corrupt_pdf_records_the_parser_error() {
    let env = setup().await;
    let pipeline = real_pipeline(&env);

    let doc_id = upload_ok(&pipeline, "garbled_2023.pdf", b"this is not a pdf").await;
    let outcome = pipeline.advance(&doc_id, AdvanceOptions::default()).await;

    assert!(!outcome.success);
    assert_eq!(
        status_of(&env.pool, &doc_id).await,
        DocumentStatus::TextExtractionFailed
    );

    let error: Option<String> =
        sqlx::query_scalar("SELECT extraction_error FROM documents WHERE id = ?")
            .bind(&doc_id)
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert!(error.unwrap().contains("PDF parsing failed"));
}

#[tokio::test]
async fn advance_on_completed_document_is_idempotent() {
    let env = setup().await;
    let pipeline = fixture_pipeline(&env, FIXTURE_REPORT);

    let doc_id = upload_ok(&pipeline, "idempotent_2024.pdf", b"%PDF-fixture").await;
    pipeline.advance(&doc_id, AdvanceOptions::default()).await;
    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Completed);

    let chunks_before = chunk_count(&env.pool, &doc_id).await;
    let attempts_before: i64 =
        sqlx::query_scalar("SELECT attempt_count FROM documents WHERE id = ?")
            .bind(&doc_id)
            .fetch_one(&env.pool)
            .await
            .unwrap();

    let outcome = pipeline.advance(&doc_id, AdvanceOptions::default()).await;
    assert!(outcome.success);
    assert_eq!(outcome.message.as_deref(), Some("already processed"));

    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Completed);
    assert_eq!(chunk_count(&env.pool, &doc_id).await, chunks_before);
    let attempts_after: i64 =
        sqlx::query_scalar("SELECT attempt_count FROM documents WHERE id = ?")
            .bind(&doc_id)
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(attempts_before, attempts_after);
}

#[tokio::test]
async fn force_reprocess_replaces_chunks_and_supersedes_records() {
    let env = setup().await;
    let pipeline = fixture_pipeline(&env, FIXTURE_REPORT);

    let doc_id = upload_ok(&pipeline, "reprocess_2024.pdf", b"%PDF-reprocess").await;
    pipeline.advance(&doc_id, AdvanceOptions::default()).await;
    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Completed);
    assert_eq!(record_count(&env.pool, &doc_id, "income").await, 2);

    // A corrected filing: same organization and year, one income row only.
    let corrected = "\
政治資金収支報告書（令和6年分）
政治団体の名称：山川政治研究会

収入の部

年月日  摘要  金額  寄附者の氏名
R6.5.10  個人寄附  700000  田中太郎
";
    let corrected_pipeline = fixture_pipeline(&env, corrected);

    let outcome = corrected_pipeline
        .advance(
            &doc_id,
            AdvanceOptions {
                force_reprocess: true,
            },
        )
        .await;
    assert!(outcome.success, "reprocess failed: {:?}", outcome.error);
    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Completed);

    // The chunk set was replaced wholesale: exactly the new generation,
    // contiguous from zero.
    let expected_chunks = split_text(corrected, 200, 20).len() as i64;
    assert_eq!(chunk_count(&env.pool, &doc_id).await, expected_chunks);
    let indices: Vec<i64> = sqlx::query_scalar(
        "SELECT chunk_index FROM document_chunks WHERE document_id = ? ORDER BY chunk_index",
    )
    .bind(&doc_id)
    .fetch_all(&env.pool)
    .await
    .unwrap();
    assert_eq!(indices, (0..expected_chunks).collect::<Vec<_>>());

    // Old records were superseded, not merged.
    assert_eq!(record_count(&env.pool, &doc_id, "income").await, 1);
    assert_eq!(record_count(&env.pool, &doc_id, "expenditure").await, 0);

    // The organization row was updated in place, not duplicated.
    let orgs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(orgs, 1);
    let total_income: i64 = sqlx::query_scalar("SELECT total_income FROM organizations")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(total_income, 700_000);
}

#[tokio::test]
async fn batch_captures_failures_independently() {
    let env = setup().await;
    let pipeline = fixture_pipeline(&env, FIXTURE_REPORT);

    let good = upload_ok(&pipeline, "good_2024.pdf", b"%PDF-good").await;
    let bad = upload_ok(&pipeline, "bad_2024.pdf", b"").await;

    let summary = run_batch(pipeline.clone()).await.unwrap();
    assert_eq!(summary.selected, 2);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);

    assert_eq!(status_of(&env.pool, &good).await, DocumentStatus::Completed);
    assert_eq!(
        status_of(&env.pool, &bad).await,
        DocumentStatus::TextExtractionFailed
    );
}

#[tokio::test]
async fn batch_skips_documents_past_the_attempt_budget() {
    let env = setup().await;
    let pipeline = fixture_pipeline(&env, FIXTURE_REPORT);

    let doc_id = upload_ok(&pipeline, "exhausted_2024.pdf", b"%PDF-exhausted").await;
    sqlx::query("UPDATE documents SET attempt_count = 5 WHERE id = ?")
        .bind(&doc_id)
        .execute(&env.pool)
        .await
        .unwrap();

    let summary = run_batch(pipeline.clone()).await.unwrap();
    assert_eq!(summary.selected, 0);
    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Pending);

    // The cap only binds the scheduler; an explicit trigger still works.
    let outcome = pipeline.advance(&doc_id, AdvanceOptions::default()).await;
    assert!(outcome.success);
    assert_eq!(status_of(&env.pool, &doc_id).await, DocumentStatus::Completed);
}

#[tokio::test]
async fn upload_rejects_invalid_input_without_creating_rows() {
    let env = setup().await;
    let pipeline = real_pipeline(&env);

    let err = upload_document(&pipeline, "notes.txt", "text/plain", b"plain text")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::NotPdf(_)));

    let oversized = vec![0u8; 2 * 1024 * 1024];
    let err = upload_document(&pipeline, "big_2024.pdf", PDF_MIME, &oversized)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::TooLarge { .. }));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn upload_short_circuits_on_an_existing_file_name() {
    let env = setup().await;
    let pipeline = real_pipeline(&env);

    let first = upload_ok(&pipeline, "named_2024.pdf", b"first bytes").await;

    // Different bytes, same name: nothing new is stored.
    match upload_document(&pipeline, "named_2024.pdf", PDF_MIME, b"other bytes")
        .await
        .unwrap()
    {
        UploadOutcome::ExistingFileName { document_id, .. } => assert_eq!(document_id, first),
        other => panic!("expected the existing document, got {:?}", other),
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn indexing_failure_keeps_the_extraction_result() {
    let env = setup().await;

    // A body with no organization name and no resolvable year anywhere:
    // extraction succeeds, structuring fails.
    let bodyless = "ただの本文です。表もなく、名称の記載もありません。";
    let pipeline = fixture_pipeline(&env, bodyless);

    let doc_id = upload_ok(&pipeline, "nameless.pdf", b"%PDF-nameless").await;
    let outcome = pipeline.advance(&doc_id, AdvanceOptions::default()).await;

    assert!(!outcome.success);
    assert_eq!(
        status_of(&env.pool, &doc_id).await,
        DocumentStatus::IndexingFailed
    );

    // The two error fields are independent: extraction succeeded and its
    // text is retained, while the indexing error is populated.
    let row = sqlx::query(
        "SELECT extracted_text, extraction_error, indexing_error FROM documents WHERE id = ?",
    )
    .bind(&doc_id)
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(
        row.get::<Option<String>, _>("extracted_text").as_deref(),
        Some(bodyless)
    );
    assert!(row.get::<Option<String>, _>("extraction_error").is_none());
    assert!(row
        .get::<Option<String>, _>("indexing_error")
        .unwrap()
        .contains("could not resolve"));
}
