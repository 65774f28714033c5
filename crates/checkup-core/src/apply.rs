//! Apply modes and per-table outcomes.

use serde::{Deserialize, Serialize};

/// How a bundle is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyMode {
  /// Clear each table before reinserting. Otherwise rows whose primary key
  /// already exists are left untouched.
  pub overwrite: bool,
  /// All-or-nothing: one transaction for every table, and the first failure
  /// aborts the whole apply. Otherwise each table commits independently.
  pub strict:    bool,
}

impl ApplyMode {
  /// Insert-if-absent, per-table commits.
  pub fn merge() -> Self { Self { overwrite: false, strict: false } }

  /// Clear and reinsert, per-table commits.
  pub fn overwrite() -> Self { Self { overwrite: true, strict: false } }

  /// Clear and reinsert inside a single transaction.
  pub fn strict_overwrite() -> Self { Self { overwrite: true, strict: true } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
  Written,
  /// Nothing to do: the table was absent from the bundle or is not tracked.
  Skipped,
  Failed,
  /// Not attempted because the deadline passed first.
  Incomplete,
}

/// Half-open row index range `[start, end)` within a table's row list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRange {
  pub start: usize,
  pub end:   usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOutcome {
  pub table:        String,
  pub status:       TableStatus,
  pub rows_written: usize,
  /// Rows left alone because their key already existed (merge mode).
  pub rows_skipped: usize,
  pub rows_deleted: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:        Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub failed_rows:  Option<RowRange>,
}

impl TableOutcome {
  pub fn new(table: &str, status: TableStatus) -> Self {
    Self {
      table: table.to_owned(),
      status,
      rows_written: 0,
      rows_skipped: 0,
      rows_deleted: 0,
      error: None,
      failed_rows: None,
    }
  }

  pub fn skipped(table: &str, reason: &str) -> Self {
    Self { error: Some(reason.to_owned()), ..Self::new(table, TableStatus::Skipped) }
  }

  pub fn failed(table: &str, error: String, failed_rows: Option<RowRange>) -> Self {
    Self { error: Some(error), failed_rows, ..Self::new(table, TableStatus::Failed) }
  }

  pub fn is_ok(&self) -> bool {
    matches!(self.status, TableStatus::Written | TableStatus::Skipped)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
  Success,
  Partial,
  Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
  pub verdict: Verdict,
  pub tables:  Vec<TableOutcome>,
}

impl ApplyResult {
  pub fn from_outcomes(tables: Vec<TableOutcome>) -> Self {
    let written = tables.iter().any(|t| t.status == TableStatus::Written);
    let failed = tables.iter().any(|t| !t.is_ok());
    let verdict = match (written, failed) {
      (_, false) => Verdict::Success,
      (true, true) => Verdict::Partial,
      (false, true) => Verdict::Failure,
    };
    Self { verdict, tables }
  }

  pub fn is_success(&self) -> bool { self.verdict == Verdict::Success }

  /// Names of the tables that failed or were left incomplete.
  pub fn failed_tables(&self) -> Vec<&str> {
    self
      .tables
      .iter()
      .filter(|t| !t.is_ok())
      .map(|t| t.table.as_str())
      .collect()
  }

  pub fn rows_written(&self) -> usize {
    self.tables.iter().map(|t| t.rows_written).sum()
  }

  pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
    self.tables.iter().find(|t| t.table == table)
  }
}
