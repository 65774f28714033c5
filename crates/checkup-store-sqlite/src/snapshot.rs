//! [`SnapshotCodec`]: reads tracked tables into a [`SnapshotBundle`] and
//! writes bundles back.
//!
//! Capture reads every table inside one read transaction, so the bundle is a
//! single consistent point in time. Apply comes in two strengths:
//!
//! - non-strict (imports): each table is cleared and written under its own
//!   savepoint; a table that fails keeps its previous rows, is reported, and
//!   the rest carry on.
//! - strict (restores): every table, and every delta in a backup chain, goes
//!   through one transaction; any failure rolls all of it back.

use std::collections::{BTreeMap, HashSet};

use chrono::{SubsecRound as _, Utc};
use rusqlite::{TransactionBehavior, params_from_iter};
use serde_json::Value;

use checkup_core::{
  Deadline,
  apply::{ApplyMode, ApplyResult, RowRange, TableOutcome, TableStatus},
  snapshot::{Row, SnapshotBundle},
  structured::validate_column,
  table::TrackedTable,
};

use crate::{
  DatabaseHandle, EngineConfig, Error, Result,
  encode::{json_to_sql, quote_ident, value_to_json},
  introspect::observe_table,
};

/// How an insert treats a row whose primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnConflict {
  Fail,
  Ignore,
}

/// Why writing a table stopped.
#[derive(Debug)]
struct TableFailure {
  reason:    String,
  rows:      Option<RowRange>,
  cancelled: bool,
}

impl TableFailure {
  fn into_error(self, table: &str) -> Error {
    if self.cancelled {
      return Error::DeadlineExceeded;
    }
    Error::ApplyFailed { table: table.to_owned(), rows: self.rows, reason: self.reason }
  }
}

#[derive(Clone)]
pub struct SnapshotCodec {
  db:         DatabaseHandle,
  page_size:  usize,
  chunk_size: usize,
}

impl SnapshotCodec {
  pub fn new(db: DatabaseHandle, config: &EngineConfig) -> Self {
    Self { db, page_size: config.page_size(), chunk_size: config.chunk_size() }
  }

  // ─── Capture ──────────────────────────────────────────────────────────────

  /// Read every row of `tables` as of one point in time.
  ///
  /// Rows within a table are ordered newest first by `created_at`.
  pub async fn capture(
    &self,
    tables: &[TrackedTable],
    deadline: Deadline,
  ) -> Result<SnapshotBundle> {
    let tables = tables.to_vec();
    let page_size = self.page_size;

    let bundle = self
      .db
      .call(deadline, move |conn| capture_tables(conn, &tables, page_size, deadline))
      .await?;

    tracing::debug!(
      tables = bundle.table_count(),
      rows = bundle.total_records(),
      "snapshot captured"
    );
    Ok(bundle)
  }

  /// `COUNT(*)` of each table.
  pub async fn row_counts(
    &self,
    tables: &[TrackedTable],
    deadline: Deadline,
  ) -> Result<BTreeMap<String, usize>> {
    let tables = tables.to_vec();
    self
      .db
      .call(deadline, move |conn| {
        let mut counts = BTreeMap::new();
        for table in tables {
          let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table.name()));
          let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
          counts.insert(table.name().to_owned(), usize::try_from(n).unwrap_or(0));
        }
        Ok(counts)
      })
      .await
  }

  // ─── Apply ────────────────────────────────────────────────────────────────

  /// Write `bundle` into the database.
  ///
  /// Non-strict modes return `Ok` with per-table outcomes even when tables
  /// fail. Each table is cleared (overwrite) and written under its own
  /// savepoint, so a failing table keeps exactly the rows it had. Strict mode
  /// returns `Err` naming the failing table and leaves the database
  /// untouched.
  pub async fn apply(
    &self,
    bundle: SnapshotBundle,
    mode: ApplyMode,
    deadline: Deadline,
  ) -> Result<ApplyResult> {
    if mode.strict {
      return self.apply_chain(vec![bundle], mode, deadline).await;
    }

    let mut outcomes: Vec<TableOutcome> = bundle
      .untracked_tables()
      .iter()
      .map(|name| TableOutcome::skipped(name, "not a tracked table"))
      .collect();

    let present: Vec<TrackedTable> = TrackedTable::in_dependency_order()
      .into_iter()
      .filter(|t| bundle.data.contains_key(t.name()))
      .collect();

    let chunk_size = self.chunk_size;
    let tables = present.clone();
    let written = match self
      .db
      .call_cooperative(deadline, move |conn| {
        apply_isolated(conn, &bundle, &tables, mode, chunk_size, deadline)
      })
      .await
    {
      Ok(written) => written,
      Err(e) if e.kind() == checkup_core::ErrorKind::Cancelled => present
        .iter()
        .map(|t| TableOutcome {
          error: Some(e.to_string()),
          ..TableOutcome::new(t.name(), TableStatus::Incomplete)
        })
        .collect(),
      Err(e) => return Err(e),
    };
    let mut written: BTreeMap<String, TableOutcome> =
      written.into_iter().map(|o| (o.table.clone(), o)).collect();

    for table in TrackedTable::in_dependency_order() {
      let Some(outcome) = written.remove(table.name()) else {
        outcomes.push(TableOutcome::skipped(table.name(), "not in bundle"));
        continue;
      };
      if outcome.is_ok() {
        tracing::debug!(table = %table, rows = outcome.rows_written, "table applied");
      } else {
        tracing::warn!(table = %table, error = ?outcome.error, "table apply failed");
      }
      outcomes.push(outcome);
    }

    Ok(ApplyResult::from_outcomes(outcomes))
  }

  /// Apply a full bundle followed by deltas, oldest first, all in one
  /// transaction. The first layer is written according to `mode`; each later
  /// layer replays its tombstones and then replaces the rows it carries.
  ///
  /// Rows are written as captured. Structured columns are not re-validated,
  /// so anything the source database held can be restored.
  pub(crate) async fn apply_chain(
    &self,
    layers: Vec<SnapshotBundle>,
    mode: ApplyMode,
    deadline: Deadline,
  ) -> Result<ApplyResult> {
    let chunk_size = self.chunk_size;
    let outcomes = self
      .db
      .call_cooperative(deadline, move |conn| {
        apply_layers(conn, &layers, mode, chunk_size, deadline)
      })
      .await?;
    Ok(ApplyResult::from_outcomes(outcomes))
  }
}

// ─── Capture internals ───────────────────────────────────────────────────────

fn capture_tables(
  conn: &mut rusqlite::Connection,
  tables: &[TrackedTable],
  page_size: usize,
  deadline: Deadline,
) -> Result<SnapshotBundle> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
  // Micros, so the timestamp survives a round trip through the catalog.
  let mut bundle = SnapshotBundle::new(Utc::now().trunc_subsecs(6));
  let limit = i64::try_from(page_size).unwrap_or(i64::MAX);

  for &table in tables {
    let sql = format!(
      "SELECT * FROM {} ORDER BY \"created_at\" DESC, {} DESC LIMIT ?1 OFFSET ?2",
      quote_ident(table.name()),
      quote_ident(table.primary_key()),
    );
    let mut stmt = tx.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_owned).collect();

    let mut rows = Vec::new();
    let mut offset: i64 = 0;
    loop {
      deadline.check()?;
      let mut page = stmt.query(rusqlite::params![limit, offset])?;
      let mut fetched: i64 = 0;
      while let Some(r) = page.next()? {
        let mut row = Row::new();
        for (i, name) in names.iter().enumerate() {
          row.insert(name.clone(), value_to_json(r.get_ref(i)?)?);
        }
        rows.push(row);
        fetched += 1;
      }
      if fetched < limit {
        break;
      }
      offset += fetched;
    }

    tracing::debug!(table = %table, rows = rows.len(), "table captured");
    bundle.insert_table(table.name(), rows);
  }

  tx.commit()?;
  Ok(bundle)
}

// ─── Apply internals ─────────────────────────────────────────────────────────

fn live_columns(conn: &rusqlite::Connection, table: TrackedTable) -> Result<Option<HashSet<String>>> {
  Ok(observe_table(conn, table.name())?.map(|cols| cols.into_iter().map(|c| c.name).collect()))
}

/// A foreign-key violation as reported by `PRAGMA foreign_key_check`.
#[derive(Debug)]
struct Violation {
  child:  String,
  rowid:  Option<i64>,
  parent: String,
}

/// Non-strict apply: one transaction with deferred foreign keys and a
/// savepoint per table.
///
/// Foreign keys are checked once every table has been written. A violation
/// is pinned on the table that caused it (the child whose new rows dangle,
/// or else the parent whose replacement orphaned existing rows); that table
/// is then excluded and the whole pass runs again. Each retry excludes one
/// more table, so this ends after at most one pass per table.
fn apply_isolated(
  conn: &mut rusqlite::Connection,
  bundle: &SnapshotBundle,
  tables: &[TrackedTable],
  mode: ApplyMode,
  chunk_size: usize,
  deadline: Deadline,
) -> Result<Vec<TableOutcome>> {
  let conflict = if mode.overwrite { OnConflict::Fail } else { OnConflict::Ignore };
  let mut excluded: BTreeMap<TrackedTable, String> = BTreeMap::new();

  loop {
    let mut tx = conn.transaction()?;
    tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;

    let mut outcomes = Vec::with_capacity(tables.len());
    let mut changed = HashSet::new();
    for &table in tables {
      if let Some(reason) = excluded.get(&table) {
        outcomes.push(TableOutcome::failed(table.name(), reason.clone(), None));
        continue;
      }
      if deadline.is_expired() {
        outcomes.push(TableOutcome {
          error: Some("deadline exceeded".into()),
          ..TableOutcome::new(table.name(), TableStatus::Incomplete)
        });
        continue;
      }

      let rows = bundle.rows(table.name());
      let outcome =
        write_table_savepoint(&mut tx, table, rows, mode.overwrite, conflict, chunk_size, deadline)?;
      if outcome.status == TableStatus::Written {
        changed.insert(table);
      }
      outcomes.push(outcome);
    }

    let blame = foreign_key_violations(&tx)?.into_iter().find_map(|v| {
      let child = TrackedTable::from_name(&v.child).filter(|t| changed.contains(t));
      let parent = TrackedTable::from_name(&v.parent).filter(|t| changed.contains(t));
      match (child, parent) {
        (Some(child), _) => Some((
          child,
          format!(
            "row {} references a missing {} row",
            v.rowid.map(|r| r.to_string()).unwrap_or_else(|| "?".into()),
            v.parent
          ),
        )),
        (None, Some(parent)) => Some((
          parent,
          format!("replacing it would leave {} rows without their {} row", v.child, v.parent),
        )),
        (None, None) => None,
      }
    });

    match blame {
      None => {
        tx.commit()?;
        return Ok(outcomes);
      }
      Some((table, reason)) => {
        tracing::debug!(table = %table, reason = %reason, "excluding table and retrying");
        drop(tx);
        excluded.insert(table, reason);
      }
    }
  }
}

/// Clear (when `overwrite`) and write one table under a savepoint. Only
/// connection-level problems are `Err`; anything wrong with the rows rolls
/// the savepoint back and becomes a failed outcome.
fn write_table_savepoint(
  tx: &mut rusqlite::Transaction<'_>,
  table: TrackedTable,
  rows: &[Row],
  overwrite: bool,
  conflict: OnConflict,
  chunk_size: usize,
  deadline: Deadline,
) -> Result<TableOutcome> {
  let Some(columns) = live_columns(tx, table)? else {
    return Ok(TableOutcome::failed(table.name(), "table does not exist".into(), None));
  };

  // Dropping the savepoint without committing rolls it back.
  let sp = tx.savepoint()?;
  let rows_deleted = if overwrite {
    sp.execute(&format!("DELETE FROM {}", quote_ident(table.name())), [])?
  } else {
    0
  };

  let (written, skipped) =
    match write_rows(&sp, table, &columns, rows, conflict, true, chunk_size, deadline) {
      Ok(counts) => counts,
      Err(f) if f.cancelled => {
        return Ok(TableOutcome {
          error: Some(f.reason),
          failed_rows: f.rows,
          ..TableOutcome::new(table.name(), TableStatus::Incomplete)
        });
      }
      Err(f) => return Ok(TableOutcome::failed(table.name(), f.reason, f.rows)),
    };

  if deadline.is_expired() {
    return Ok(TableOutcome {
      error: Some("deadline exceeded before commit".into()),
      ..TableOutcome::new(table.name(), TableStatus::Incomplete)
    });
  }
  sp.commit()?;

  Ok(TableOutcome {
    rows_written: written,
    rows_skipped: skipped,
    rows_deleted,
    ..TableOutcome::new(table.name(), TableStatus::Written)
  })
}

/// Write `rows` in chunks, checking the deadline between chunks. Returns
/// `(written, skipped)`.
fn write_rows(
  conn: &rusqlite::Connection,
  table: TrackedTable,
  columns: &HashSet<String>,
  rows: &[Row],
  conflict: OnConflict,
  validate: bool,
  chunk_size: usize,
  deadline: Deadline,
) -> Result<(usize, usize), TableFailure> {
  let mut written = 0;
  let mut skipped = 0;

  for (index, chunk) in rows.chunks(chunk_size).enumerate() {
    let start = index * chunk_size;
    let range = RowRange { start, end: start + chunk.len() };
    if deadline.is_expired() {
      return Err(TableFailure {
        reason:    "deadline exceeded".into(),
        rows:      Some(range),
        cancelled: true,
      });
    }

    for (offset, row) in chunk.iter().enumerate() {
      match write_row(conn, table, columns, row, conflict, validate) {
        Ok(true) => written += 1,
        Ok(false) => skipped += 1,
        Err(reason) => {
          return Err(TableFailure {
            reason:    format!("row {}: {reason}", start + offset),
            rows:      Some(range),
            cancelled: false,
          });
        }
      }
    }
  }

  Ok((written, skipped))
}

/// Insert one row. `Ok(false)` means the conflict policy skipped it.
///
/// With `validate`, structured columns must resolve to their known shape.
fn write_row(
  conn: &rusqlite::Connection,
  table: TrackedTable,
  columns: &HashSet<String>,
  row: &Row,
  conflict: OnConflict,
  validate: bool,
) -> Result<bool, String> {
  let pk = table.primary_key();
  match row.get(pk) {
    None | Some(Value::Null) => return Err(format!("missing primary key `{pk}`")),
    Some(_) => {}
  }
  if let Some(unknown) = row.keys().find(|k| !columns.contains(*k)) {
    return Err(format!("unknown column `{unknown}`"));
  }
  if validate {
    for (column, shape) in table.structured_columns() {
      if let Some(value) = row.get(*column) {
        validate_column(table.name(), column, *shape, value).map_err(|e| e.to_string())?;
      }
    }
  }

  let names: Vec<&String> = row.keys().collect();
  let quoted: Vec<String> = names.iter().map(|n| quote_ident(n)).collect();
  let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
  let mut sql = format!(
    "INSERT INTO {} ({}) VALUES ({})",
    quote_ident(table.name()),
    quoted.join(", "),
    placeholders.join(", "),
  );
  if conflict == OnConflict::Ignore {
    sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", quote_ident(pk)));
  }

  let values = names.iter().map(|n| json_to_sql(&row[n.as_str()]));
  let changed = conn
    .prepare_cached(&sql)
    .and_then(|mut stmt| stmt.execute(params_from_iter(values)))
    .map_err(|e| e.to_string())?;
  Ok(changed > 0)
}

fn delete_keys(conn: &rusqlite::Connection, table: TrackedTable, keys: &[Value]) -> Result<usize> {
  let sql = format!(
    "DELETE FROM {} WHERE {} = ?1",
    quote_ident(table.name()),
    quote_ident(table.primary_key())
  );
  let mut stmt = conn.prepare_cached(&sql)?;
  let mut deleted = 0;
  for key in keys {
    deleted += stmt.execute([json_to_sql(key)])?;
  }
  Ok(deleted)
}

fn apply_layers(
  conn: &mut rusqlite::Connection,
  layers: &[SnapshotBundle],
  mode: ApplyMode,
  chunk_size: usize,
  deadline: Deadline,
) -> Result<Vec<TableOutcome>> {
  let Some((base, deltas)) = layers.split_first() else {
    return Ok(Vec::new());
  };

  let mut columns = BTreeMap::new();
  let mut missing = Vec::new();
  for table in TrackedTable::in_dependency_order() {
    match live_columns(conn, table)? {
      Some(cols) => {
        columns.insert(table, cols);
      }
      None => missing.push(table.name().to_owned()),
    }
  }
  if !missing.is_empty() {
    return Err(Error::SchemaIncompatible { missing });
  }

  let tx = conn.transaction()?;
  tx.execute_batch("PRAGMA defer_foreign_keys = ON")?;

  let mut outcomes: BTreeMap<TrackedTable, TableOutcome> = TrackedTable::in_dependency_order()
    .into_iter()
    .map(|t| (t, TableOutcome::skipped(t.name(), "not in backup")))
    .collect();
  let touch = |outcomes: &mut BTreeMap<TrackedTable, TableOutcome>, table: TrackedTable| {
    let outcome = outcomes
      .entry(table)
      .or_insert_with(|| TableOutcome::new(table.name(), TableStatus::Written));
    if outcome.status == TableStatus::Skipped {
      *outcome = TableOutcome::new(table.name(), TableStatus::Written);
    }
  };

  if mode.overwrite {
    for table in TrackedTable::in_purge_order() {
      if base.data.contains_key(table.name()) {
        let n = tx.execute(&format!("DELETE FROM {}", quote_ident(table.name())), [])?;
        touch(&mut outcomes, table);
        if let Some(o) = outcomes.get_mut(&table) {
          o.rows_deleted += n;
        }
      }
    }
  }

  let base_conflict = if mode.overwrite { OnConflict::Fail } else { OnConflict::Ignore };
  let layer_plan = std::iter::once((base, base_conflict, false))
    .chain(deltas.iter().map(|d| (d, OnConflict::Fail, true)));

  for (layer, conflict, is_delta) in layer_plan {
    // Tombstones first, then the old images of changed rows, children
    // before parents. Writing fresh images afterwards lets a UNIQUE value
    // move between rows within one delta.
    for table in TrackedTable::in_purge_order() {
      let keys = layer.deleted_keys(table.name());
      if !keys.is_empty() {
        let n = delete_keys(&tx, table, keys)?;
        touch(&mut outcomes, table);
        if let Some(o) = outcomes.get_mut(&table) {
          o.rows_deleted += n;
        }
      }
      if is_delta {
        let pk = table.primary_key();
        let changed: Vec<Value> = layer
          .rows(table.name())
          .iter()
          .filter_map(|r| r.get(pk).cloned())
          .collect();
        delete_keys(&tx, table, &changed)?;
      }
    }

    for table in TrackedTable::in_dependency_order() {
      let Some(rows) = layer.data.get(table.name()) else {
        continue;
      };
      let (written, skipped) = write_rows(
        &tx,
        table,
        &columns[&table],
        rows,
        conflict,
        false,
        chunk_size,
        deadline,
      )
      .map_err(|f| f.into_error(table.name()))?;
      touch(&mut outcomes, table);
      if let Some(o) = outcomes.get_mut(&table) {
        o.rows_written += written;
        o.rows_skipped += skipped;
      }
    }
  }

  if let Some(v) = foreign_key_violations(&tx)?.into_iter().next() {
    return Err(Error::ApplyFailed {
      table:  v.child,
      rows:   None,
      reason: format!(
        "row {} references a missing {} row",
        v.rowid.map(|r| r.to_string()).unwrap_or_else(|| "?".into()),
        v.parent
      ),
    });
  }

  deadline.check()?;
  tx.commit()?;

  Ok(outcomes.into_values().collect())
}

fn foreign_key_violations(conn: &rusqlite::Connection) -> Result<Vec<Violation>> {
  let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
  let violations = stmt
    .query_map([], |r| Ok(Violation { child: r.get(0)?, rowid: r.get(1)?, parent: r.get(2)? }))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(violations)
}
