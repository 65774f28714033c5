//! Error types for `checkup-core`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The failure taxonomy shared by every engine component.
///
/// Concrete error enums in the backend crates map onto one of these kinds so
/// that callers (API routes, the CLI) can translate failures without matching
/// on backend-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Database or object storage unreachable.
  Connection,
  /// Unknown backup or migration id, or a missing artifact.
  NotFound,
  /// A stored artifact no longer matches its recorded checksum.
  ChecksumMismatch,
  /// A backup cannot be deleted because incrementals depend on it.
  Dependency,
  /// Some tables were written and some were not.
  PartialFailure,
  AlreadyRolledBack,
  RollbackExecution,
  /// An incremental backup's parent link no longer resolves.
  ChainBroken,
  /// A migration run holds the schema guard.
  MigrationInProgress,
  /// The target database is missing columns the data needs.
  SchemaIncompatible,
  /// The caller-supplied deadline passed before the operation finished.
  Cancelled,
  InvalidInput,
  Internal,
}

impl ErrorKind {
  /// Generic operator-facing text. Never contains SQL or internal detail.
  pub fn operator_message(self) -> &'static str {
    match self {
      Self::Connection => "The database or backup storage is unreachable.",
      Self::NotFound => "The requested item does not exist.",
      Self::ChecksumMismatch => {
        "A backup failed its integrity check; nothing was restored."
      }
      Self::Dependency => {
        "Other backups depend on this one; deletion was refused."
      }
      Self::PartialFailure => "Some tables could not be processed.",
      Self::AlreadyRolledBack => "That migration has already been rolled back.",
      Self::RollbackExecution => {
        "The rollback could not be applied; the schema is unchanged."
      }
      Self::ChainBroken => {
        "The backup chain is incomplete; a parent backup is missing."
      }
      Self::MigrationInProgress => {
        "A schema migration is in progress; try again shortly."
      }
      Self::SchemaIncompatible => {
        "The database schema is out of date; run migrations first."
      }
      Self::Cancelled => "The operation timed out before completing.",
      Self::InvalidInput => "The supplied data is not valid.",
      Self::Internal => "An internal error occurred.",
    }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown tracked table: {0:?}")]
  UnknownTable(String),

  #[error("invalid snapshot bundle: {0}")]
  InvalidBundle(String),

  #[error("column {table}.{column} holds an unrecognised shape: {reason}")]
  UnrecognisedShape {
    table:  String,
    column: String,
    reason: String,
  },

  #[error("deadline exceeded")]
  DeadlineExceeded,

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::UnknownTable(_)
      | Self::InvalidBundle(_)
      | Self::UnrecognisedShape { .. }
      | Self::Serialization(_) => ErrorKind::InvalidInput,
      Self::DeadlineExceeded => ErrorKind::Cancelled,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
