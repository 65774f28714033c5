//! [`SchemaIntrospector`]: what the live database actually looks like.

use rusqlite::OptionalExtension as _;

use checkup_core::{
  Deadline,
  table::{ColumnSpec, SchemaDiff},
};

use crate::{DatabaseHandle, Result};

/// Read-only view of the live schema.
#[derive(Clone)]
pub struct SchemaIntrospector {
  db: DatabaseHandle,
}

impl SchemaIntrospector {
  pub fn new(db: DatabaseHandle) -> Self { Self { db } }

  /// Compare the live tables against `required`.
  ///
  /// Missing tables and columns make the diff incompatible. Columns the
  /// database has but `required` does not are listed but harmless.
  pub async fn diff(&self, required: &[ColumnSpec], deadline: Deadline) -> Result<SchemaDiff> {
    let required = required.to_vec();
    self
      .db
      .call(deadline, move |conn| compute_diff(conn, &required))
      .await
  }

  /// The live columns of `table`, or `None` if it does not exist.
  pub async fn table_columns(
    &self,
    table: &str,
    deadline: Deadline,
  ) -> Result<Option<Vec<ColumnSpec>>> {
    let table = table.to_owned();
    self
      .db
      .call(deadline, move |conn| Ok(observe_table(conn, &table)?))
      .await
  }
}

// ─── Connection-level helpers ────────────────────────────────────────────────

pub(crate) fn table_exists(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<bool> {
  conn
    .query_row(
      "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
      rusqlite::params![table],
      |_| Ok(true),
    )
    .optional()
    .map(|found| found.unwrap_or(false))
}

/// Live columns of `table` in declaration order.
pub(crate) fn observe_table(
  conn: &rusqlite::Connection,
  table: &str,
) -> rusqlite::Result<Option<Vec<ColumnSpec>>> {
  if !table_exists(conn, table)? {
    return Ok(None);
  }

  let mut stmt = conn.prepare_cached(
    "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
  )?;
  let columns = stmt
    .query_map(rusqlite::params![table], |row| {
      Ok(ColumnSpec {
        table:         table.to_owned(),
        name:          row.get(0)?,
        declared_type: row.get(1)?,
        nullable:      row.get::<_, i64>(2)? == 0,
        default:       row.get(3)?,
        primary_key:   row.get::<_, i64>(4)? > 0,
        references:    None,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(Some(columns))
}

pub(crate) fn compute_diff(
  conn: &rusqlite::Connection,
  required: &[ColumnSpec],
) -> Result<SchemaDiff> {
  let mut tables: Vec<&str> = Vec::new();
  for column in required {
    if !tables.contains(&column.table.as_str()) {
      tables.push(&column.table);
    }
  }

  let mut missing_columns = Vec::new();
  let mut extra_columns = Vec::new();
  let mut missing_tables = Vec::new();

  for table in tables {
    let wanted = required.iter().filter(|c| c.table == table);
    match observe_table(conn, table)? {
      None => {
        missing_tables.push(table.to_owned());
        missing_columns.extend(wanted.cloned());
      }
      Some(live) => {
        missing_columns
          .extend(wanted.clone().filter(|c| !live.iter().any(|l| l.name == c.name)).cloned());
        extra_columns.extend(
          live
            .into_iter()
            .filter(|l| !required.iter().any(|c| c.table == table && c.name == l.name)),
        );
      }
    }
  }

  Ok(SchemaDiff::new(missing_columns, extra_columns, missing_tables))
}
