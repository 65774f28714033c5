//! SQL schema for the Checkup SQLite database.
//!
//! [`BOOTSTRAP`] runs on every open and only ever creates what is missing.
//! Later schema changes go through the migration manager, which compares the
//! live tables against [`required_schema`].

use checkup_core::table::{ColumnSpec, TrackedTable};

/// Bootstrap DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const BOOTSTRAP: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY,
    email         TEXT NOT NULL UNIQUE,
    name          TEXT,
    phone         TEXT,
    password_hash TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS admins (
    id            TEXT PRIMARY KEY,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'admin',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS courses (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    category    TEXT,
    description TEXT,
    metadata    TEXT,               -- JSON document
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS requirements (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id),
    answers    TEXT,                -- questionnaire answers, either form
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS symptom_checks (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id),
    answers    TEXT,
    checklist  TEXT,                -- item list or flag map
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS health_analysis (
    id               TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL REFERENCES users(id),
    symptom_check_id TEXT REFERENCES symptom_checks(id),
    score            REAL,
    summary          TEXT,
    details          TEXT,          -- JSON document
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_choices (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL REFERENCES users(id),
    course_id  TEXT NOT NULL REFERENCES courses(id),
    choice     TEXT,                -- JSON document
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id         TEXT PRIMARY KEY,
    admin_id   TEXT REFERENCES admins(id),
    action     TEXT NOT NULL,
    detail     TEXT,                -- JSON document
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Owned by the migration manager. Never snapshotted.
CREATE TABLE IF NOT EXISTS migration_history (
    id                  TEXT PRIMARY KEY,
    description         TEXT NOT NULL,
    applied_at          TEXT NOT NULL,
    statements_applied  TEXT NOT NULL,   -- JSON array of DDL
    rollback_statements TEXT NOT NULL,   -- JSON array of DDL
    status              TEXT NOT NULL    -- 'APPLIED' | 'ROLLED_BACK'
);

-- Owned by the backup manager. Never snapshotted.
CREATE TABLE IF NOT EXISTS backup_metadata (
    backup_id          TEXT PRIMARY KEY,
    backup_type        TEXT NOT NULL,    -- 'FULL' | 'INCREMENTAL'
    backup_date        TEXT NOT NULL,
    table_count        INTEGER NOT NULL,
    total_records      INTEGER NOT NULL,
    file_size_bytes    INTEGER NOT NULL,
    checksum           TEXT NOT NULL,
    previous_backup_id TEXT,
    created_by         TEXT NOT NULL,
    description        TEXT,
    storage_key        TEXT NOT NULL,
    CHECK ((backup_type = 'FULL') = (previous_backup_id IS NULL))
);

-- At most one row: whoever is migrating right now.
CREATE TABLE IF NOT EXISTS schema_migration_lock (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    holder      TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS backup_metadata_previous_idx ON backup_metadata(previous_backup_id);
CREATE INDEX IF NOT EXISTS migration_history_applied_idx ON migration_history(applied_at);
";

/// Placeholder written into timestamp columns added to existing rows.
const EPOCH: &str = "'1970-01-01T00:00:00.000000Z'";

/// The columns every tracked table must have, in dependency order.
pub fn required_schema() -> Vec<ColumnSpec> {
  use TrackedTable::*;

  let mut spec = Vec::new();
  let mut table = |t: TrackedTable, columns: Vec<ColumnSpec>| {
    spec.push(ColumnSpec::primary_key(t, "id", "TEXT"));
    spec.extend(columns);
    spec.push(ColumnSpec::required(t, "created_at", "TEXT", Some(EPOCH)));
    spec.push(ColumnSpec::required(t, "updated_at", "TEXT", Some(EPOCH)));
  };

  table(Users, vec![
    ColumnSpec::required(Users, "email", "TEXT", None),
    ColumnSpec::nullable(Users, "name", "TEXT"),
    ColumnSpec::nullable(Users, "phone", "TEXT"),
    ColumnSpec::nullable(Users, "password_hash", "TEXT"),
  ]);
  table(Admins, vec![
    ColumnSpec::required(Admins, "username", "TEXT", None),
    ColumnSpec::required(Admins, "password_hash", "TEXT", None),
    ColumnSpec::required(Admins, "role", "TEXT", Some("'admin'")),
  ]);
  table(Courses, vec![
    ColumnSpec::required(Courses, "title", "TEXT", None),
    ColumnSpec::nullable(Courses, "category", "TEXT"),
    ColumnSpec::nullable(Courses, "description", "TEXT"),
    ColumnSpec::nullable(Courses, "metadata", "TEXT"),
    ColumnSpec::required(Courses, "is_active", "INTEGER", Some("1")),
  ]);
  table(Requirements, vec![
    ColumnSpec::required(Requirements, "user_id", "TEXT", None).references("users(id)"),
    ColumnSpec::nullable(Requirements, "answers", "TEXT"),
  ]);
  table(SymptomChecks, vec![
    ColumnSpec::required(SymptomChecks, "user_id", "TEXT", None).references("users(id)"),
    ColumnSpec::nullable(SymptomChecks, "answers", "TEXT"),
    ColumnSpec::nullable(SymptomChecks, "checklist", "TEXT"),
  ]);
  table(HealthAnalysis, vec![
    ColumnSpec::required(HealthAnalysis, "user_id", "TEXT", None).references("users(id)"),
    ColumnSpec::nullable(HealthAnalysis, "symptom_check_id", "TEXT")
      .references("symptom_checks(id)"),
    ColumnSpec::nullable(HealthAnalysis, "score", "REAL"),
    ColumnSpec::nullable(HealthAnalysis, "summary", "TEXT"),
    ColumnSpec::nullable(HealthAnalysis, "details", "TEXT"),
  ]);
  table(UserChoices, vec![
    ColumnSpec::required(UserChoices, "user_id", "TEXT", None).references("users(id)"),
    ColumnSpec::required(UserChoices, "course_id", "TEXT", None).references("courses(id)"),
    ColumnSpec::nullable(UserChoices, "choice", "TEXT"),
  ]);
  table(AuditLogs, vec![
    ColumnSpec::nullable(AuditLogs, "admin_id", "TEXT").references("admins(id)"),
    ColumnSpec::required(AuditLogs, "action", "TEXT", None),
    ColumnSpec::nullable(AuditLogs, "detail", "TEXT"),
  ]);

  spec
}
