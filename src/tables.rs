//! Table detection and header classification for report text.
//!
//! Extracted report text keeps its tabular layout as column-aligned lines.
//! This module finds those blocks, maps each header cell to a semantic
//! column role, and types whole tables as income or expenditure based on
//! the header vocabulary.

use regex::Regex;

use crate::dates::to_halfwidth;
use crate::models::RecordKind;

/// A detected table: one header row plus body rows of cells.
#[derive(Debug, Clone)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Semantic role of a header column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Date,
    Description,
    Amount,
    CounterpartyName,
    CounterpartyAddress,
}

/// Detect column-aligned table blocks in extracted text.
///
/// A candidate row has at least 2 cells separated by a tab or 2+ spaces;
/// a block needs a header row and at least one body row. Blank lines end
/// a block.
pub fn detect_tables(text: &str) -> Vec<Table> {
    // \s is Unicode-aware, so ideographic spaces count too.
    let separator = Regex::new(r"\t|\s{2,}").unwrap();

    let mut tables = Vec::new();
    let mut block: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(cells) = split_cells(&separator, trimmed) {
            block.push(cells);
        } else {
            flush_block(&mut block, &mut tables);
        }
    }
    flush_block(&mut block, &mut tables);

    tables
}

fn flush_block(block: &mut Vec<Vec<String>>, tables: &mut Vec<Table>) {
    if block.len() >= 2 {
        let mut rows = std::mem::take(block);
        let header = rows.remove(0);
        tables.push(Table { header, rows });
    } else {
        block.clear();
    }
}

fn split_cells(separator: &Regex, line: &str) -> Option<Vec<String>> {
    if line.chars().count() < 4 {
        return None;
    }
    let cells: Vec<String> = separator
        .split(line)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if cells.len() >= 2 {
        Some(cells)
    } else {
        None
    }
}

/// Map a header cell to its column role, if any is recognized.
pub fn classify_header_cell(cell: &str) -> Option<ColumnRole> {
    let folded = to_halfwidth(cell);

    // Order matters: 寄附者の住所 contains 寄附者, so address wins over name;
    // 支出額 contains 支出, so amount is checked before anything broader.
    const DATE: &[&str] = &["年月日", "月日", "日付"];
    const AMOUNT: &[&str] = &["金額", "収入額", "支出額"];
    const ADDRESS: &[&str] = &["住所", "所在地"];
    const NAME: &[&str] = &["氏名", "名称", "寄附者", "寄付者", "支出先", "相手方"];
    const DESCRIPTION: &[&str] = &["摘要", "項目", "内容", "科目", "目的", "種別"];

    let contains_any = |terms: &[&str]| terms.iter().any(|t| folded.contains(t));

    if contains_any(DATE) {
        Some(ColumnRole::Date)
    } else if contains_any(AMOUNT) {
        Some(ColumnRole::Amount)
    } else if contains_any(ADDRESS) {
        Some(ColumnRole::CounterpartyAddress)
    } else if contains_any(NAME) {
        Some(ColumnRole::CounterpartyName)
    } else if contains_any(DESCRIPTION) {
        Some(ColumnRole::Description)
    } else {
        None
    }
}

/// Assign a role to each header column. Unrecognized columns get `None`.
pub fn classify_columns(header: &[String]) -> Vec<Option<ColumnRole>> {
    header.iter().map(|c| classify_header_cell(c)).collect()
}

/// Type a whole table from its combined header text. Expenditure terms take
/// precedence when both vocabularies appear; tables matching neither are
/// skipped by the caller.
pub fn classify_table(header: &[String]) -> Option<RecordKind> {
    let combined = to_halfwidth(&header.join(" "));

    const EXPENDITURE: &[&str] = &["支出", "経費", "費用"];
    const INCOME: &[&str] = &["収入", "寄附", "寄付", "会費", "交付金"];

    if EXPENDITURE.iter().any(|t| combined.contains(t)) {
        Some(RecordKind::Expenditure)
    } else if INCOME.iter().any(|t| combined.contains(t)) {
        Some(RecordKind::Income)
    } else {
        None
    }
}
