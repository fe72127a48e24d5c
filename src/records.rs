//! Structured-data extraction: turning report text into financial records.
//!
//! Derives the owning organization and report year, walks every detected
//! table, and parses body rows into typed income/expenditure records. Rows
//! missing a positive amount or a description are dropped, never stored as
//! zeros. One table's failure is collected and logged, not propagated, so
//! the remaining tables still parse.

use anyhow::{bail, Result};
use regex::Regex;
use sqlx::SqlitePool;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dates::{normalize_date, to_halfwidth};
use crate::models::{FinancialRecord, RecordKind};
use crate::tables::{classify_columns, classify_table, detect_tables, ColumnRole, Table};

/// Everything the structuring phase derives from one document.
#[derive(Debug, Clone)]
pub struct StructuredReport {
    pub organization_name: String,
    pub report_year: i32,
    pub records: Vec<FinancialRecord>,
    /// Per-table problems, reported but non-fatal.
    pub table_errors: Vec<String>,
}

impl StructuredReport {
    pub fn total(&self, kind: RecordKind) -> i64 {
        self.records
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.amount)
            .sum()
    }
}

/// Parse a document's text into a structured report.
///
/// Fails only when neither the organization name nor the report year can be
/// resolved; those are required fields, not best-effort. Tables that cannot
/// be classified yield no records and no error.
pub fn extract_report(text: &str, file_name: &str) -> Result<StructuredReport> {
    let organization_name = resolve_organization_name(text, file_name);
    let report_year = resolve_report_year(text, file_name);

    let (organization_name, report_year) = match (organization_name, report_year) {
        (Some(name), Some(year)) => (name, year),
        (name, year) => bail!(
            "could not resolve required report fields (organization: {}, year: {})",
            name.as_deref().unwrap_or("missing"),
            year.map(|y| y.to_string()).as_deref().unwrap_or("missing"),
        ),
    };

    let mut records = Vec::new();
    let mut table_errors = Vec::new();

    for (index, table) in detect_tables(text).iter().enumerate() {
        match parse_table(table) {
            Ok(mut parsed) => records.append(&mut parsed),
            Err(e) => {
                warn!(table = index, error = %e, "table parsing failed; continuing");
                table_errors.push(format!("table {}: {}", index, e));
            }
        }
    }

    debug!(
        organization = %organization_name,
        year = report_year,
        records = records.len(),
        "structured report extracted"
    );

    Ok(StructuredReport {
        organization_name,
        report_year,
        records,
        table_errors,
    })
}

/// Parse one table's body rows. A table with no recognized amount column or
/// no income/expenditure typing yields no records.
fn parse_table(table: &Table) -> Result<Vec<FinancialRecord>> {
    let Some(kind) = classify_table(&table.header) else {
        return Ok(Vec::new());
    };
    let roles = classify_columns(&table.header);
    let Some(amount_col) = position_of(&roles, ColumnRole::Amount) else {
        return Ok(Vec::new());
    };

    let date_col = position_of(&roles, ColumnRole::Date);
    let description_col = position_of(&roles, ColumnRole::Description);
    let name_col = position_of(&roles, ColumnRole::CounterpartyName);
    let address_col = position_of(&roles, ColumnRole::CounterpartyAddress);

    let mut records = Vec::new();

    for row in &table.rows {
        let raw_row = row.join(" ");

        let Some(amount) = row.get(amount_col).and_then(|c| parse_amount(c)) else {
            continue;
        };

        // Fall back to the counterparty name as the description; a row with
        // neither is unusable.
        let description = description_col
            .and_then(|i| row.get(i))
            .or_else(|| name_col.and_then(|i| row.get(i)))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if description.is_empty() {
            continue;
        }

        let transaction_date = date_col
            .and_then(|i| row.get(i))
            .map(|s| normalize_date(s));

        records.push(FinancialRecord {
            kind,
            transaction_date,
            description,
            amount,
            counterparty_name: name_col
                .and_then(|i| row.get(i))
                .map(|s| s.trim().to_string()),
            counterparty_address: address_col
                .and_then(|i| row.get(i))
                .map(|s| s.trim().to_string()),
            raw_row,
        });
    }

    Ok(records)
}

fn position_of(roles: &[Option<ColumnRole>], wanted: ColumnRole) -> Option<usize> {
    roles.iter().position(|r| *r == Some(wanted))
}

/// Strip everything but digits (after full-width folding) and parse.
/// Returns `None` for missing, zero, or negative-looking amounts.
pub fn parse_amount(cell: &str) -> Option<i64> {
    let digits: String = to_halfwidth(cell)
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    let amount: i64 = digits.parse().ok()?;
    if amount > 0 {
        Some(amount)
    } else {
        None
    }
}

fn resolve_organization_name(text: &str, file_name: &str) -> Option<String> {
    let labeled = Regex::new(r"(?:政治団体|資金管理団体|団体)の名称[\s:：]*([^\r\n]+)").unwrap();
    if let Some(caps) = labeled.captures(text) {
        let name = caps[1].trim().to_string();
        if !name.is_empty() {
            return Some(name);
        }
    }

    organization_name_from_file_name(file_name)
}

fn resolve_report_year(text: &str, file_name: &str) -> Option<i32> {
    // 令和6年分 / R6年分 style report headers.
    let era = Regex::new(r"(令和|平成|昭和|[RHS])\s*(元|\d{1,2})\s*年分").unwrap();
    if let Some(caps) = era.captures(&to_halfwidth(text)) {
        let base = match &caps[1] {
            "令和" | "R" => 2018,
            "平成" | "H" => 1988,
            "昭和" | "S" => 1925,
            _ => return None,
        };
        let era_year: i32 = if &caps[2] == "元" {
            1
        } else {
            caps[2].parse().ok()?
        };
        return Some(base + era_year);
    }

    let gregorian = Regex::new(r"((?:19|20)\d{2})\s*年分").unwrap();
    if let Some(caps) = gregorian.captures(&to_halfwidth(text)) {
        return caps[1].parse().ok();
    }

    report_year_from_file_name(file_name)
}

fn organization_name_from_file_name(file_name: &str) -> Option<String> {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(s, _)| s);
    let year = Regex::new(r"(?:19|20)\d{2}").unwrap();
    let name = year
        .replace_all(stem, "")
        .trim_matches(['_', '-', ' ', '　'])
        .to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn report_year_from_file_name(file_name: &str) -> Option<i32> {
    let year = Regex::new(r"(?:19|20)\d{2}").unwrap();
    year.find(file_name)?.as_str().parse().ok()
}

/// Upsert the organization by its (name, report_year) natural key and return
/// its id. Re-ingesting a report for the same org/year updates in place.
pub async fn upsert_organization(
    pool: &SqlitePool,
    report: &StructuredReport,
    document_id: &str,
) -> Result<String> {
    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM organizations WHERE name = ? AND report_year = ?")
            .bind(&report.organization_name)
            .bind(report.report_year)
            .fetch_optional(pool)
            .await?;

    let org_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO organizations (id, name, report_year, total_income, total_expenditure, source_document_id, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name, report_year) DO UPDATE SET
            total_income = excluded.total_income,
            total_expenditure = excluded.total_expenditure,
            source_document_id = excluded.source_document_id,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&org_id)
    .bind(&report.organization_name)
    .bind(report.report_year)
    .bind(report.total(RecordKind::Income))
    .bind(report.total(RecordKind::Expenditure))
    .bind(document_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(org_id)
}

/// Replace the document's financial records in one transaction: the old
/// generation is superseded, never merged with the new one.
pub async fn replace_records(
    pool: &SqlitePool,
    document_id: &str,
    organization_id: &str,
    records: &[FinancialRecord],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM financial_records WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO financial_records
                (id, organization_id, document_id, kind, transaction_date, description,
                 amount, counterparty_name, counterparty_address, raw_row, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(organization_id)
        .bind(document_id)
        .bind(record.kind.as_str())
        .bind(&record.transaction_date)
        .bind(&record.description)
        .bind(record.amount)
        .bind(&record.counterparty_name)
        .bind(&record.counterparty_address)
        .bind(&record.raw_row)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT_TEXT: &str = "\
政治資金収支報告書（令和6年分）
政治団体の名称：山川政治研究会

収入の部

年月日  摘要  金額  寄附者の氏名  寄附者の住所
R6.5.10  個人寄附  1,000,000円  田中太郎  東京都千代田区
R6.6.01  会費収入  50000  佐藤花子  大阪府大阪市
R6.7.01  個人寄附  ¥0  鈴木一郎  北海道札幌市

支出の部

年月日  支出の目的  金額  支出先
R6.8.15  事務所賃料  240000  丸の内ビル管理
R6.9.01  印刷費  ないしょ  株式会社印刷堂
";

    #[test]
    fn amounts_are_digit_stripped_and_positive() {
        assert_eq!(parse_amount("1,000,000円"), Some(1_000_000));
        assert_eq!(parse_amount("¥0"), None);
        assert_eq!(parse_amount("１２３"), Some(123));
        assert_eq!(parse_amount("金額なし"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn extracts_rows_from_both_table_kinds() {
        let report = extract_report(REPORT_TEXT, "yamakawa_2024.pdf").unwrap();
        assert_eq!(report.organization_name, "山川政治研究会");
        assert_eq!(report.report_year, 2024);

        let income: Vec<_> = report
            .records
            .iter()
            .filter(|r| r.kind == RecordKind::Income)
            .collect();
        let expenditure: Vec<_> = report
            .records
            .iter()
            .filter(|r| r.kind == RecordKind::Expenditure)
            .collect();

        // The ¥0 income row and the amount-less expenditure row are dropped.
        assert_eq!(income.len(), 2);
        assert_eq!(expenditure.len(), 1);

        assert_eq!(income[0].amount, 1_000_000);
        assert_eq!(income[0].transaction_date.as_deref(), Some("2024-05-10"));
        assert_eq!(income[0].counterparty_name.as_deref(), Some("田中太郎"));
        assert_eq!(
            income[0].counterparty_address.as_deref(),
            Some("東京都千代田区")
        );
        assert!(income[0].raw_row.contains("個人寄附"));

        assert_eq!(expenditure[0].amount, 240_000);
        assert_eq!(expenditure[0].description, "事務所賃料");
    }

    #[test]
    fn totals_sum_per_kind() {
        let report = extract_report(REPORT_TEXT, "yamakawa_2024.pdf").unwrap();
        assert_eq!(report.total(RecordKind::Income), 1_050_000);
        assert_eq!(report.total(RecordKind::Expenditure), 240_000);
    }

    #[test]
    fn organization_falls_back_to_file_name() {
        let text = "表紙のみで名称の記載がない文書。";
        let report = extract_report(text, "seiwakai_2023.pdf").unwrap();
        assert_eq!(report.organization_name, "seiwakai");
        assert_eq!(report.report_year, 2023);
        assert!(report.records.is_empty());
    }

    #[test]
    fn missing_org_and_year_is_an_error() {
        let err = extract_report("本文のみ。", "report.pdf").unwrap_err();
        assert!(err.to_string().contains("could not resolve"));
    }

    #[test]
    fn era_report_year_wins_over_file_name() {
        let text = "政治団体の名称：例の会\n令和5年分の報告";
        let report = extract_report(text, "rei_2020.pdf").unwrap();
        assert_eq!(report.report_year, 2023);
    }

    #[test]
    fn table_without_amount_column_yields_no_records() {
        let text = "\
政治団体の名称：例の会
令和5年分

年月日  摘要  寄附者の氏名
R5.5.10  個人寄附  田中太郎
R5.6.01  会費  佐藤花子
";
        let report = extract_report(text, "rei.pdf").unwrap();
        assert!(report.records.is_empty());
        assert!(report.table_errors.is_empty());
    }
}
