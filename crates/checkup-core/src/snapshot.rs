//! Snapshot bundles and the pure algebra over them.
//!
//! A [`SnapshotBundle`] is one table-walk's worth of rows. Full backups and
//! exports hold every row; incremental backups hold only the rows that
//! changed since their parent plus the primary keys that disappeared.
//! [`ChainState`] folds a chain of bundles into the row set it implies, which
//! is what incremental deltas are computed against.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, table::TrackedTable};

/// One row: column name → value. Text columns (including JSON documents
/// stored as text) are carried as strings, untouched.
pub type Row = serde_json::Map<String, Value>;

// ─── SnapshotBundle ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBundle {
  pub timestamp:  DateTime<Utc>,
  /// Row count per table.
  pub statistics: BTreeMap<String, usize>,
  pub data:       BTreeMap<String, Vec<Row>>,
  /// Primary keys removed since the parent backup. Only incremental deltas
  /// populate this.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub deleted:    BTreeMap<String, Vec<Value>>,
}

impl SnapshotBundle {
  pub fn new(timestamp: DateTime<Utc>) -> Self {
    Self {
      timestamp,
      statistics: BTreeMap::new(),
      data: BTreeMap::new(),
      deleted: BTreeMap::new(),
    }
  }

  /// Add (or replace) a table's rows, keeping `statistics` in step.
  pub fn insert_table(&mut self, table: &str, rows: Vec<Row>) {
    self.statistics.insert(table.to_owned(), rows.len());
    self.data.insert(table.to_owned(), rows);
  }

  pub fn rows(&self, table: &str) -> &[Row] {
    self.data.get(table).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn deleted_keys(&self, table: &str) -> &[Value] {
    self.deleted.get(table).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn table_count(&self) -> usize { self.data.len() }

  pub fn total_records(&self) -> usize { self.data.values().map(Vec::len).sum() }

  /// Table names present in the bundle that the engine does not track.
  pub fn untracked_tables(&self) -> Vec<String> {
    self
      .data
      .keys()
      .chain(self.deleted.keys())
      .filter(|name| TrackedTable::from_name(name).is_none())
      .cloned()
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect()
  }

  /// The exact byte sequence that is uploaded and checksummed.
  pub fn to_bytes(&self) -> Result<Vec<u8>> { Ok(serde_json::to_vec(self)?) }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    Ok(serde_json::from_slice(bytes)?)
  }

  /// Parse an import document.
  ///
  /// Accepts a plain bundle or one nested as `{"data": {"data": {...}}}` by
  /// tooling that keeps statistics next to the payload. Missing `timestamp`
  /// defaults to `now`; `statistics` are always recomputed from the rows.
  pub fn from_import_value(value: Value, now: DateTime<Utc>) -> Result<Self> {
    let mut doc = value;
    while is_wrapper(&doc) {
      doc = match doc {
        Value::Object(mut obj) => obj.remove("data").unwrap_or(Value::Null),
        other => other,
      };
    }

    let Value::Object(mut obj) = doc else {
      return Err(Error::InvalidBundle("expected a JSON object".into()));
    };

    let timestamp = match obj.remove("timestamp") {
      Some(Value::Null) | None => now,
      Some(ts) => serde_json::from_value(ts)?,
    };

    let data: BTreeMap<String, Vec<Row>> = match obj.remove("data") {
      Some(data @ Value::Object(_)) => serde_json::from_value(data)?,
      Some(_) => return Err(Error::InvalidBundle("`data` must be an object".into())),
      None => return Err(Error::InvalidBundle("missing `data`".into())),
    };

    let deleted: BTreeMap<String, Vec<Value>> = match obj.remove("deleted") {
      Some(Value::Null) | None => BTreeMap::new(),
      Some(d) => serde_json::from_value(d)?,
    };

    let mut bundle = Self::new(timestamp);
    bundle.deleted = deleted;
    for (table, rows) in data {
      bundle.insert_table(&table, rows);
    }
    Ok(bundle)
  }
}

/// A wrapper level is an object whose `data` holds another object that
/// itself has a `data` object. A bundle's own `data` maps table names to
/// arrays, so it never matches.
fn is_wrapper(doc: &Value) -> bool {
  doc
    .get("data")
    .and_then(|inner| inner.get("data"))
    .is_some_and(Value::is_object)
}

/// The primary-key string a row is identified by.
pub fn row_key(table: &str, row: &Row) -> Result<String> {
  let pk = TrackedTable::from_name(table)
    .map(TrackedTable::primary_key)
    .unwrap_or("id");
  match row.get(pk) {
    Some(Value::Null) | None => Err(Error::InvalidBundle(format!(
      "row in {table} has no primary key `{pk}`"
    ))),
    Some(value) => Ok(key_of(value)),
  }
}

fn key_of(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

// ─── ChainState ──────────────────────────────────────────────────────────────

/// The row set implied by a full backup followed by zero or more deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainState {
  tables: BTreeMap<String, BTreeMap<String, Row>>,
}

impl ChainState {
  pub fn from_full(bundle: &SnapshotBundle) -> Result<Self> {
    let mut state = Self::default();
    for (table, rows) in &bundle.data {
      let entry = state.tables.entry(table.clone()).or_default();
      for row in rows {
        entry.insert(row_key(table, row)?, row.clone());
      }
    }
    Ok(state)
  }

  /// Replay a delta: tombstones first, then upserts.
  pub fn apply_delta(&mut self, delta: &SnapshotBundle) -> Result<()> {
    for (table, keys) in &delta.deleted {
      if let Some(rows) = self.tables.get_mut(table) {
        for key in keys {
          rows.remove(&key_of(key));
        }
      }
    }
    for (table, rows) in &delta.data {
      let entry = self.tables.entry(table.clone()).or_default();
      for row in rows {
        entry.insert(row_key(table, row)?, row.clone());
      }
    }
    Ok(())
  }

  pub fn row_count(&self, table: &str) -> usize {
    self.tables.get(table).map(BTreeMap::len).unwrap_or(0)
  }

  /// Compute the delta that carries this state to `current`.
  ///
  /// A row is included when its key is new or any column differs from the
  /// chain's copy. Keys the chain holds but `current` lacks become
  /// tombstones. Tables absent from `current` are left out entirely.
  pub fn delta_to(&self, current: &SnapshotBundle) -> Result<SnapshotBundle> {
    let mut delta = SnapshotBundle::new(current.timestamp);
    let empty = BTreeMap::new();

    for (table, rows) in &current.data {
      let known = self.tables.get(table).unwrap_or(&empty);
      let mut seen = BTreeSet::new();
      let mut changed = Vec::new();

      for row in rows {
        let key = row_key(table, row)?;
        if known.get(&key) != Some(row) {
          changed.push(row.clone());
        }
        seen.insert(key);
      }

      let gone: Vec<Value> = known
        .keys()
        .filter(|k| !seen.contains(*k))
        .map(|k| Value::String(k.clone()))
        .collect();
      if !gone.is_empty() {
        delta.deleted.insert(table.clone(), gone);
      }
      delta.insert_table(table, changed);
    }

    Ok(delta)
  }
}
