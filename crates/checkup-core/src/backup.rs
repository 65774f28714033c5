//! Backup metadata and the request/response types of backup operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::apply::TableOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
  Full,
  Incremental,
}

impl BackupType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Full => "FULL",
      Self::Incremental => "INCREMENTAL",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "FULL" => Some(Self::Full),
      "INCREMENTAL" => Some(Self::Incremental),
      _ => None,
    }
  }

  /// Directory segment used in storage keys.
  pub fn key_segment(self) -> &'static str {
    match self {
      Self::Full => "full",
      Self::Incremental => "incremental",
    }
  }
}

/// The catalog entry for one stored backup artifact. Never mutated after
/// creation; only deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
  pub backup_id:          String,
  pub backup_type:        BackupType,
  pub backup_date:        DateTime<Utc>,
  pub table_count:        usize,
  pub total_records:      usize,
  pub file_size_bytes:    u64,
  /// Lowercase hex SHA-256 of the stored artifact.
  pub checksum:           String,
  /// Set exactly when `backup_type` is `Incremental`.
  pub previous_backup_id: Option<String>,
  pub created_by:         String,
  pub description:        Option<String>,
  pub storage_key:        String,
}

/// Who asked for an operation and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRequest {
  pub created_by:  String,
  pub description: Option<String>,
}

impl BackupRequest {
  pub fn new(created_by: impl Into<String>) -> Self {
    Self { created_by: created_by.into(), description: None }
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }
}

/// What to do when deleting a backup that incrementals still point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
  /// Fail with a dependency error.
  #[default]
  Refuse,
  /// Delete anyway; the dependents become unrestorable.
  BreakChain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
  pub deleted:          bool,
  /// Whether the storage artifact was present and removed.
  pub artifact_removed: bool,
  /// Incremental backups whose parent link this deletion broke.
  pub orphaned:         Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
  pub valid:             bool,
  pub expected_checksum: String,
  /// `None` when the artifact could not be read.
  pub actual_checksum:   Option<String>,
  pub details:           String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreDetails {
  pub backup_id:    String,
  /// Backup ids applied, oldest (the full backup) first.
  pub chain:        Vec<String>,
  pub rows_written: usize,
  pub tables:       Vec<TableOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
  pub success: bool,
  pub message: String,
  pub details: RestoreDetails,
}
