//! [`MigrationManager`]: additive schema migrations with recorded inverses.
//!
//! Each table that is missing columns (or missing entirely) is one migration
//! unit: its DDL runs in one transaction together with the insert of its
//! `migration_history` row, so a unit is either fully applied and recorded
//! or not applied at all.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use checkup_core::{
  Deadline,
  migration::{EnsureSchemaReport, MigrationRecord, MigrationStatus, RollbackReport},
  table::{ColumnSpec, SchemaDiff},
};

use crate::{
  DatabaseHandle, EngineConfig, Error, Result,
  encode::{RawMigrationRecord, encode_dt, encode_statements, quote_ident},
  introspect::compute_diff,
  lock,
  schema::required_schema,
};

/// DDL for one unit and the statements that undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MigrationPlan {
  description: String,
  statements:  Vec<String>,
  rollback:    Vec<String>,
}

#[derive(Clone)]
pub struct MigrationManager {
  db:       DatabaseHandle,
  required: Arc<Vec<ColumnSpec>>,
  holder:   String,
  lock_ttl: Duration,
  /// Serialises runs from this process before they reach the database guard.
  local:    Arc<tokio::sync::Mutex<()>>,
}

impl MigrationManager {
  pub fn new(db: DatabaseHandle, config: &EngineConfig) -> Self {
    Self {
      db,
      required: Arc::new(required_schema()),
      holder: format!("checkup-{}", Uuid::new_v4()),
      lock_ttl: config.lock_ttl(),
      local: Arc::new(tokio::sync::Mutex::new(())),
    }
  }

  /// Replace the required-schema declaration.
  pub fn with_required_schema(mut self, required: Vec<ColumnSpec>) -> Self {
    self.required = Arc::new(required);
    self
  }

  pub fn required_schema(&self) -> &[ColumnSpec] { &self.required }

  /// The current required-vs-live diff.
  pub async fn diff(&self, deadline: Deadline) -> Result<SchemaDiff> {
    let required = Arc::clone(&self.required);
    self.db.call(deadline, move |conn| compute_diff(conn, &required)).await
  }

  /// Bring the live schema up to the required declaration.
  ///
  /// Idempotent: with no drift nothing runs and no record is written. A unit
  /// that cannot be applied automatically is reported in `errors` and the
  /// remaining units still run.
  pub async fn ensure_database_schema(&self, deadline: Deadline) -> Result<EnsureSchemaReport> {
    let _local = self.local.lock().await;
    let required = Arc::clone(&self.required);
    let holder = self.holder.clone();
    let ttl = self.lock_ttl;

    let report = self
      .db
      .call_cooperative(deadline, move |conn| {
        lock::with_guard(conn, &holder, ttl, |conn| run_pending(conn, &required, deadline))
      })
      .await?;

    if report.success {
      tracing::info!(applied = report.executed.len(), "schema is up to date");
    } else {
      tracing::warn!(
        applied = report.executed.len(),
        errors = ?report.errors,
        "schema migration finished with errors"
      );
    }
    Ok(report)
  }

  /// The most recent migrations, newest first.
  pub async fn get_migration_history(
    &self,
    limit: usize,
    deadline: Deadline,
  ) -> Result<Vec<MigrationRecord>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    self
      .db
      .call(deadline, move |conn| {
        let sql = format!(
          "SELECT {} FROM migration_history ORDER BY applied_at DESC, rowid DESC LIMIT ?1",
          RawMigrationRecord::COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let raws = stmt
          .query_map(rusqlite::params![limit], RawMigrationRecord::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawMigrationRecord::into_record).collect()
      })
      .await
  }

  /// Undo one applied migration using its recorded inverse statements.
  pub async fn rollback_migration(
    &self,
    migration_id: &str,
    deadline: Deadline,
  ) -> Result<RollbackReport> {
    let _local = self.local.lock().await;
    let holder = self.holder.clone();
    let ttl = self.lock_ttl;
    let id = migration_id.to_owned();

    let record = self
      .db
      .call_cooperative(deadline, move |conn| {
        lock::with_guard(conn, &holder, ttl, |conn| roll_back(conn, &id, deadline))
      })
      .await?;

    tracing::info!(migration_id = %record.id, "migration rolled back");
    Ok(RollbackReport {
      success: true,
      message: format!("Rolled back migration {}: {}", record.id, record.description),
      details: record,
    })
  }

  /// The process currently migrating, if any.
  pub async fn migration_in_progress(&self, deadline: Deadline) -> Result<Option<String>> {
    Ok(
      lock::current_holder(&self.db, self.lock_ttl, deadline)
        .await?
        .map(|h| h.name),
    )
  }
}

// ─── Planning ────────────────────────────────────────────────────────────────

fn column_definition(column: &ColumnSpec) -> String {
  let mut def = format!("{} {}", quote_ident(&column.name), column.declared_type);
  if column.primary_key {
    def.push_str(" PRIMARY KEY");
  } else if !column.nullable {
    def.push_str(" NOT NULL");
  }
  if let Some(default) = &column.default {
    def.push_str(" DEFAULT ");
    def.push_str(default);
  }
  if let Some(target) = &column.references {
    def.push_str(" REFERENCES ");
    def.push_str(target);
  }
  def
}

/// Plan the unit for `table`. `Err` explains why it needs a hand-written
/// migration instead.
fn plan_unit(
  table: &str,
  missing: &[&ColumnSpec],
  table_missing: bool,
) -> Result<MigrationPlan, String> {
  let quoted = quote_ident(table);

  if table_missing {
    let columns: Vec<String> = missing.iter().map(|c| column_definition(c)).collect();
    return Ok(MigrationPlan {
      description: format!("create table {table}"),
      statements:  vec![format!("CREATE TABLE {quoted} ({})", columns.join(", "))],
      rollback:    vec![format!("DROP TABLE {quoted}")],
    });
  }

  let mut statements = Vec::new();
  let mut rollback = Vec::new();
  for column in missing {
    if column.primary_key {
      return Err(format!(
        "{table}.{}: a primary key cannot be added to an existing table",
        column.name
      ));
    }
    if !column.nullable && column.default.is_none() {
      return Err(format!(
        "{table}.{}: NOT NULL without a default cannot be added automatically",
        column.name
      ));
    }
    statements.push(format!("ALTER TABLE {quoted} ADD COLUMN {}", column_definition(column)));
    rollback.push(format!("ALTER TABLE {quoted} DROP COLUMN {}", quote_ident(&column.name)));
  }
  rollback.reverse();

  let names: Vec<&str> = missing.iter().map(|c| c.name.as_str()).collect();
  Ok(MigrationPlan {
    description: format!("add {} to {table}", names.join(", ")),
    statements,
    rollback,
  })
}

// ─── Execution ───────────────────────────────────────────────────────────────

fn run_pending(
  conn: &mut rusqlite::Connection,
  required: &[ColumnSpec],
  deadline: Deadline,
) -> Result<EnsureSchemaReport> {
  let diff = compute_diff(conn, required)?;
  let mut report = EnsureSchemaReport::default();

  for (table, missing) in diff.missing_by_table() {
    deadline.check()?;
    let table_missing = diff.missing_tables.contains(&table);

    let plan = match plan_unit(&table, &missing, table_missing) {
      Ok(plan) => plan,
      Err(reason) => {
        report.errors.push(reason);
        continue;
      }
    };

    match apply_unit(conn, plan) {
      Ok(record) => {
        tracing::info!(
          migration_id = %record.id,
          description = %record.description,
          "migration applied"
        );
        report.executed.push(record);
      }
      Err(e) => report.errors.push(format!("{table}: {e}")),
    }
  }

  report.success = report.errors.is_empty();
  Ok(report)
}

fn apply_unit(conn: &mut rusqlite::Connection, plan: MigrationPlan) -> Result<MigrationRecord> {
  let record = MigrationRecord {
    id:                  Uuid::new_v4().to_string(),
    description:         plan.description,
    applied_at:          Utc::now(),
    statements_applied:  plan.statements,
    rollback_statements: plan.rollback,
    status:              MigrationStatus::Applied,
  };

  let tx = conn.transaction()?;
  for statement in &record.statements_applied {
    tx.execute_batch(statement)?;
  }
  tx.execute(
    "INSERT INTO migration_history
       (id, description, applied_at, statements_applied, rollback_statements, status)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![
      record.id,
      record.description,
      encode_dt(record.applied_at),
      encode_statements(&record.statements_applied)?,
      encode_statements(&record.rollback_statements)?,
      record.status.as_str(),
    ],
  )?;
  tx.commit()?;
  Ok(record)
}

fn load_record(conn: &rusqlite::Connection, id: &str) -> Result<Option<MigrationRecord>> {
  let sql = format!(
    "SELECT {} FROM migration_history WHERE id = ?1",
    RawMigrationRecord::COLUMNS
  );
  conn
    .query_row(&sql, rusqlite::params![id], RawMigrationRecord::from_row)
    .optional()?
    .map(RawMigrationRecord::into_record)
    .transpose()
}

fn roll_back(
  conn: &mut rusqlite::Connection,
  id: &str,
  deadline: Deadline,
) -> Result<MigrationRecord> {
  let mut record =
    load_record(conn, id)?.ok_or_else(|| Error::MigrationNotFound(id.to_owned()))?;
  if record.status == MigrationStatus::RolledBack {
    return Err(Error::AlreadyRolledBack(id.to_owned()));
  }

  let failed = |e: rusqlite::Error| Error::RollbackExecution {
    migration_id: id.to_owned(),
    reason:       e.to_string(),
  };

  let tx = conn.transaction()?;
  for statement in &record.rollback_statements {
    tx.execute_batch(statement).map_err(failed)?;
  }
  tx.execute(
    "UPDATE migration_history SET status = ?2 WHERE id = ?1",
    rusqlite::params![id, MigrationStatus::RolledBack.as_str()],
  )?;
  deadline.check()?;
  tx.commit().map_err(failed)?;

  record.status = MigrationStatus::RolledBack;
  Ok(record)
}
