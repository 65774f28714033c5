//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with microsecond precision so
//! they sort lexically. Statement lists are stored as compact JSON arrays.

use chrono::{DateTime, SecondsFormat, Utc};
use checkup_core::{
  backup::{BackupMetadata, BackupType},
  migration::{MigrationRecord, MigrationStatus},
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{Number, Value};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Quote a table or column name. Only ever called with names from the
/// tracked-table enum, the required schema, or the live column list.
pub fn quote_ident(name: &str) -> String { format!("\"{}\"", name.replace('"', "\"\"")) }

// ─── Column values ───────────────────────────────────────────────────────────

/// Key under which BLOB columns are carried in a bundle.
const BLOB_KEY: &str = "$blob";

/// Read one SQLite value into its JSON form.
///
/// Text is carried verbatim, including JSON documents stored as text.
pub fn value_to_json(value: ValueRef<'_>) -> Result<Value> {
  Ok(match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::from(i),
    ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
    ValueRef::Text(bytes) => Value::String(
      std::str::from_utf8(bytes)
        .map_err(|e| Error::CorruptRecord(format!("non UTF-8 text: {e}")))?
        .to_owned(),
    ),
    ValueRef::Blob(bytes) => {
      let mut obj = serde_json::Map::new();
      obj.insert(BLOB_KEY.to_owned(), Value::String(hex::encode(bytes)));
      Value::Object(obj)
    }
  })
}

/// The SQLite value to bind for a JSON value from a bundle.
///
/// Inline objects and arrays (written by older tooling) are stored as their
/// JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    Value::Object(obj) => match blob_of(obj) {
      Some(bytes) => SqlValue::Blob(bytes),
      None => SqlValue::Text(value.to_string()),
    },
    Value::Array(_) => SqlValue::Text(value.to_string()),
  }
}

fn blob_of(obj: &serde_json::Map<String, Value>) -> Option<Vec<u8>> {
  match (obj.len(), obj.get(BLOB_KEY)) {
    (1, Some(Value::String(h))) => hex::decode(h).ok(),
    _ => None,
  }
}

// ─── Statement lists ─────────────────────────────────────────────────────────

pub fn encode_statements(statements: &[String]) -> Result<String> {
  Ok(serde_json::to_string(statements)?)
}

pub fn decode_statements(s: &str) -> Result<Vec<String>> { Ok(serde_json::from_str(s)?) }

// ─── Raw row types ───────────────────────────────────────────────────────────

/// Raw `migration_history` row as read from SQLite.
pub struct RawMigrationRecord {
  pub id:                  String,
  pub description:         String,
  pub applied_at:          String,
  pub statements_applied:  String,
  pub rollback_statements: String,
  pub status:              String,
}

impl RawMigrationRecord {
  pub const COLUMNS: &'static str =
    "id, description, applied_at, statements_applied, rollback_statements, status";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:                  row.get(0)?,
      description:         row.get(1)?,
      applied_at:          row.get(2)?,
      statements_applied:  row.get(3)?,
      rollback_statements: row.get(4)?,
      status:              row.get(5)?,
    })
  }

  pub fn into_record(self) -> Result<MigrationRecord> {
    let status = MigrationStatus::parse(&self.status).ok_or_else(|| {
      Error::CorruptRecord(format!("migration {} has status {:?}", self.id, self.status))
    })?;
    Ok(MigrationRecord {
      applied_at: decode_dt(&self.applied_at)?,
      statements_applied: decode_statements(&self.statements_applied)?,
      rollback_statements: decode_statements(&self.rollback_statements)?,
      status,
      id: self.id,
      description: self.description,
    })
  }
}

/// Raw `backup_metadata` row as read from SQLite.
pub struct RawBackupMetadata {
  pub backup_id:          String,
  pub backup_type:        String,
  pub backup_date:        String,
  pub table_count:        i64,
  pub total_records:      i64,
  pub file_size_bytes:    i64,
  pub checksum:           String,
  pub previous_backup_id: Option<String>,
  pub created_by:         String,
  pub description:        Option<String>,
  pub storage_key:        String,
}

impl RawBackupMetadata {
  pub const COLUMNS: &'static str = "backup_id, backup_type, backup_date, table_count, total_records, \
                             file_size_bytes, checksum, previous_backup_id, created_by, \
                             description, storage_key";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      backup_id:          row.get(0)?,
      backup_type:        row.get(1)?,
      backup_date:        row.get(2)?,
      table_count:        row.get(3)?,
      total_records:      row.get(4)?,
      file_size_bytes:    row.get(5)?,
      checksum:           row.get(6)?,
      previous_backup_id: row.get(7)?,
      created_by:         row.get(8)?,
      description:        row.get(9)?,
      storage_key:        row.get(10)?,
    })
  }

  pub fn into_metadata(self) -> Result<BackupMetadata> {
    let backup_type = BackupType::parse(&self.backup_type).ok_or_else(|| {
      Error::CorruptRecord(format!(
        "backup {} has type {:?}",
        self.backup_id, self.backup_type
      ))
    })?;
    let count = |n: i64, what: &str| {
      usize::try_from(n)
        .map_err(|_| Error::CorruptRecord(format!("backup {} has {what} {n}", self.backup_id)))
    };
    Ok(BackupMetadata {
      backup_type,
      backup_date: decode_dt(&self.backup_date)?,
      table_count: count(self.table_count, "table_count")?,
      total_records: count(self.total_records, "total_records")?,
      file_size_bytes: count(self.file_size_bytes, "file_size_bytes")? as u64,
      checksum: self.checksum,
      previous_backup_id: self.previous_backup_id,
      created_by: self.created_by,
      description: self.description,
      storage_key: self.storage_key,
      backup_id: self.backup_id,
    })
  }
}
