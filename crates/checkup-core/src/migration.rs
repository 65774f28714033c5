//! Migration records and the reports returned by migration operations.
//!
//! A migration is PENDING implicitly (the schema diff still lists its
//! columns), becomes APPLIED the moment its DDL commits, and may later flip
//! once to ROLLED_BACK. Records are otherwise immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
  Applied,
  RolledBack,
}

impl MigrationStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Applied => "APPLIED",
      Self::RolledBack => "ROLLED_BACK",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "APPLIED" => Some(Self::Applied),
      "ROLLED_BACK" => Some(Self::RolledBack),
      _ => None,
    }
  }
}

/// One applied schema change and its recorded inverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
  pub id:                  String,
  pub description:         String,
  pub applied_at:          DateTime<Utc>,
  /// The exact DDL that ran, in order.
  pub statements_applied:  Vec<String>,
  /// The DDL that undoes `statements_applied`, in execution order.
  pub rollback_statements: Vec<String>,
  pub status:              MigrationStatus,
}

/// Outcome of one `ensure_database_schema` run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureSchemaReport {
  pub success:  bool,
  /// Migrations applied by this run; empty when the schema had not drifted.
  pub executed: Vec<MigrationRecord>,
  /// One entry per migration unit that failed and was rolled back.
  pub errors:   Vec<String>,
}

/// Outcome of a successful rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
  pub success: bool,
  pub message: String,
  pub details: MigrationRecord,
}
