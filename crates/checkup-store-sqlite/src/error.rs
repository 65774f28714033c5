//! Error type for `checkup-store-sqlite`.

use checkup_core::{ErrorKind, apply::RowRange};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] checkup_core::Error),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  /// The connection thread is gone or the database could not be opened.
  #[error("connection error: {0}")]
  Connection(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored catalog or history row could not be decoded.
  #[error("corrupt record: {0}")]
  CorruptRecord(String),

  #[error("artifact storage error: {0}")]
  Artifact(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("deadline exceeded")]
  DeadlineExceeded,

  #[error("backup not found: {0}")]
  BackupNotFound(String),

  #[error("artifact {storage_key} for backup {backup_id} is missing")]
  ArtifactMissing {
    backup_id:   String,
    storage_key: String,
  },

  #[error("migration not found: {0}")]
  MigrationNotFound(String),

  #[error("migration {0} is already rolled back")]
  AlreadyRolledBack(String),

  #[error("rollback of migration {migration_id} failed: {reason}")]
  RollbackExecution {
    migration_id: String,
    reason:       String,
  },

  #[error("checksum mismatch for backup {backup_id}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    backup_id: String,
    expected:  String,
    actual:    String,
  },

  #[error("backup {backup_id} is the parent of {dependents:?}")]
  Dependency {
    backup_id:  String,
    dependents: Vec<String>,
  },

  #[error("backup chain of {backup_id} is broken: {missing} is missing")]
  ChainBroken {
    backup_id: String,
    missing:   String,
  },

  #[error("migration in progress (held by {holder} since {since})")]
  MigrationInProgress { holder: String, since: String },

  #[error("schema is incompatible; missing {missing:?}")]
  SchemaIncompatible { missing: Vec<String> },

  #[error("writing {table} failed{}: {reason}", describe_rows(.rows))]
  ApplyFailed {
    table:  String,
    rows:   Option<RowRange>,
    reason: String,
  },
}

impl Error {
  pub fn artifact(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Artifact(Box::new(e))
  }

  /// The operator-facing category of this error.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Core(e) => e.kind(),
      Self::Database(e) => database_kind(e),
      Self::Connection(_) | Self::Artifact(_) => ErrorKind::Connection,
      Self::Json(_) | Self::DateParse(_) | Self::CorruptRecord(_) => ErrorKind::Internal,
      Self::DeadlineExceeded => ErrorKind::Cancelled,
      Self::BackupNotFound(_)
      | Self::ArtifactMissing { .. }
      | Self::MigrationNotFound(_) => ErrorKind::NotFound,
      Self::AlreadyRolledBack(_) => ErrorKind::AlreadyRolledBack,
      Self::RollbackExecution { .. } => ErrorKind::RollbackExecution,
      Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
      Self::Dependency { .. } => ErrorKind::Dependency,
      Self::ChainBroken { .. } => ErrorKind::ChainBroken,
      Self::MigrationInProgress { .. } => ErrorKind::MigrationInProgress,
      Self::SchemaIncompatible { .. } => ErrorKind::SchemaIncompatible,
      Self::ApplyFailed { .. } => ErrorKind::PartialFailure,
    }
  }
}

/// Constraint failures are the caller's data; only failures to reach or
/// lock the database file are connection trouble.
fn database_kind(e: &rusqlite::Error) -> ErrorKind {
  use rusqlite::ErrorCode;
  match e.sqlite_error_code() {
    Some(ErrorCode::ConstraintViolation) => ErrorKind::InvalidInput,
    Some(
      ErrorCode::DatabaseBusy
      | ErrorCode::DatabaseLocked
      | ErrorCode::CannotOpen
      | ErrorCode::SystemIoFailure
      | ErrorCode::NotADatabase
      | ErrorCode::DiskFull,
    ) => ErrorKind::Connection,
    _ => ErrorKind::Internal,
  }
}

fn describe_rows(rows: &Option<RowRange>) -> String {
  rows
    .map(|r| format!(" at rows {}..{}", r.start, r.end))
    .unwrap_or_default()
}

// `tokio_rusqlite::Error` can hold the connection itself, which is not
// `Sync`, so it is unpacked rather than wrapped.
impl From<tokio_rusqlite::Error> for Error {
  fn from(e: tokio_rusqlite::Error) -> Self {
    match e {
      tokio_rusqlite::Error::Rusqlite(e) => Self::Database(e),
      tokio_rusqlite::Error::ConnectionClosed => {
        Self::Connection("connection closed".into())
      }
      other => Self::Connection(other.to_string()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constraint_violation_is_invalid_input() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn
      .execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
      .unwrap();
    let err = conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err();
    assert_eq!(Error::from(err).kind(), ErrorKind::InvalidInput);
  }

  #[test]
  fn busy_database_is_a_connection_error() {
    let busy = rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
      None,
    );
    assert_eq!(Error::from(busy).kind(), ErrorKind::Connection);
  }

  #[test]
  fn other_database_errors_are_internal() {
    let err = Error::from(rusqlite::Error::QueryReturnedNoRows);
    assert_eq!(err.kind(), ErrorKind::Internal);
  }
}
