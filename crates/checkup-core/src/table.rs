//! Tracked tables, declared columns, and schema diffs.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::structured::ColumnShape;

// ─── TrackedTable ────────────────────────────────────────────────────────────

/// A relation the engine knows how to snapshot and restore.
///
/// Variants are declared in foreign-key dependency order: every table appears
/// after the tables it references. Apply walks this order forwards; clearing
/// walks it backwards.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrackedTable {
  Users,
  Admins,
  Courses,
  Requirements,
  SymptomChecks,
  HealthAnalysis,
  UserChoices,
  AuditLogs,
}

impl TrackedTable {
  /// The SQL identifier of the table.
  pub fn name(self) -> &'static str { self.into() }

  /// Resolve a table name as it appears in a bundle or on the wire.
  pub fn from_name(name: &str) -> Option<Self> { name.parse().ok() }

  /// All tables, parents before children.
  pub fn in_dependency_order() -> Vec<Self> { Self::iter().collect() }

  /// All tables, children before parents.
  pub fn in_purge_order() -> Vec<Self> {
    let mut tables = Self::in_dependency_order();
    tables.reverse();
    tables
  }

  /// Every tracked table is keyed by a text `id`.
  pub fn primary_key(self) -> &'static str { "id" }

  /// Columns holding JSON text, with the shape each must resolve to.
  pub fn structured_columns(self) -> &'static [(&'static str, ColumnShape)] {
    match self {
      Self::Requirements => &[("answers", ColumnShape::Answers)],
      Self::SymptomChecks => &[
        ("answers", ColumnShape::Answers),
        ("checklist", ColumnShape::Checklist),
      ],
      Self::HealthAnalysis => &[("details", ColumnShape::Json)],
      Self::Courses => &[("metadata", ColumnShape::Json)],
      Self::UserChoices => &[("choice", ColumnShape::Json)],
      Self::AuditLogs => &[("detail", ColumnShape::Json)],
      Self::Users | Self::Admins => &[],
    }
  }
}

// ─── ColumnSpec ──────────────────────────────────────────────────────────────

/// One declared (or observed) column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
  pub table:         String,
  pub name:          String,
  pub declared_type: String,
  pub nullable:      bool,
  /// SQL literal used when the column is added to a populated table.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default:       Option<String>,
  #[serde(default)]
  pub primary_key:   bool,
  /// Foreign-key target, e.g. `users(id)`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub references:    Option<String>,
}

impl ColumnSpec {
  /// A nullable column with no default.
  pub fn nullable(table: TrackedTable, name: &str, declared_type: &str) -> Self {
    Self {
      table:         table.name().to_owned(),
      name:          name.to_owned(),
      declared_type: declared_type.to_owned(),
      nullable:      true,
      default:       None,
      primary_key:   false,
      references:    None,
    }
  }

  /// A `NOT NULL` column. `default` is required to add it to existing rows.
  pub fn required(
    table: TrackedTable,
    name: &str,
    declared_type: &str,
    default: Option<&str>,
  ) -> Self {
    Self {
      nullable: false,
      default: default.map(str::to_owned),
      ..Self::nullable(table, name, declared_type)
    }
  }

  pub fn primary_key(table: TrackedTable, name: &str, declared_type: &str) -> Self {
    Self {
      nullable: false,
      primary_key: true,
      ..Self::nullable(table, name, declared_type)
    }
  }

  pub fn references(mut self, target: &str) -> Self {
    self.references = Some(target.to_owned());
    self
  }
}

// ─── SchemaDiff ──────────────────────────────────────────────────────────────

/// Required-versus-observed comparison. Produced fresh on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDiff {
  /// Declared columns the live database lacks (including every column of a
  /// missing table).
  pub missing_columns: Vec<ColumnSpec>,
  /// Observed columns the declaration does not mention.
  pub extra_columns:   Vec<ColumnSpec>,
  /// Declared tables absent from the live database.
  pub missing_tables:  Vec<String>,
  pub is_compatible:   bool,
}

impl SchemaDiff {
  pub fn new(
    missing_columns: Vec<ColumnSpec>,
    extra_columns: Vec<ColumnSpec>,
    missing_tables: Vec<String>,
  ) -> Self {
    let is_compatible = missing_columns.is_empty() && missing_tables.is_empty();
    Self { missing_columns, extra_columns, missing_tables, is_compatible }
  }

  /// Missing columns grouped per table, in the order tables first appear.
  pub fn missing_by_table(&self) -> Vec<(String, Vec<&ColumnSpec>)> {
    let mut groups: Vec<(String, Vec<&ColumnSpec>)> = Vec::new();
    for column in &self.missing_columns {
      match groups.iter_mut().find(|(t, _)| *t == column.table) {
        Some((_, cols)) => cols.push(column),
        None => groups.push((column.table.clone(), vec![column])),
      }
    }
    groups
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parents_precede_children() {
    let order = TrackedTable::in_dependency_order();
    let pos = |t: TrackedTable| order.iter().position(|x| *x == t).unwrap();

    assert!(pos(TrackedTable::Users) < pos(TrackedTable::Requirements));
    assert!(pos(TrackedTable::SymptomChecks) < pos(TrackedTable::HealthAnalysis));
    assert!(pos(TrackedTable::Courses) < pos(TrackedTable::UserChoices));
    assert!(pos(TrackedTable::Admins) < pos(TrackedTable::AuditLogs));
  }

  #[test]
  fn purge_order_is_reverse() {
    let mut forward = TrackedTable::in_dependency_order();
    forward.reverse();
    assert_eq!(forward, TrackedTable::in_purge_order());
  }

  #[test]
  fn names_round_trip() {
    for table in TrackedTable::in_dependency_order() {
      assert_eq!(TrackedTable::from_name(table.name()), Some(table));
    }
    assert_eq!(TrackedTable::SymptomChecks.name(), "symptom_checks");
    assert_eq!(TrackedTable::from_name("migration_history"), None);
  }

  #[test]
  fn diff_groups_missing_columns_by_table() {
    let diff = SchemaDiff::new(
      vec![
        ColumnSpec::nullable(TrackedTable::Users, "phone", "TEXT"),
        ColumnSpec::nullable(TrackedTable::Courses, "level", "TEXT"),
        ColumnSpec::nullable(TrackedTable::Users, "locale", "TEXT"),
      ],
      vec![],
      vec![],
    );

    assert!(!diff.is_compatible);
    let groups = diff.missing_by_table();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].0, "users");
    assert_eq!(groups[0].1.len(), 2);
    assert_eq!(groups[1].0, "courses");
  }

  #[test]
  fn extra_columns_do_not_break_compatibility() {
    let diff = SchemaDiff::new(
      vec![],
      vec![ColumnSpec::nullable(TrackedTable::Users, "legacy_flag", "INTEGER")],
      vec![],
    );
    assert!(diff.is_compatible);
  }
}
