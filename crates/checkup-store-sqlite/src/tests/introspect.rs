use checkup_core::Deadline;

use super::{db, exec};
use crate::{SchemaIntrospector, schema::required_schema};

#[tokio::test]
async fn fresh_database_matches_required_schema() {
  let db = db().await;
  let diff = SchemaIntrospector::new(db)
    .diff(&required_schema(), Deadline::none())
    .await
    .unwrap();

  assert!(diff.is_compatible, "{diff:?}");
  assert!(diff.missing_columns.is_empty());
  assert!(diff.extra_columns.is_empty());
  assert!(diff.missing_tables.is_empty());
}

#[tokio::test]
async fn dropped_column_is_missing() {
  let db = db().await;
  exec(&db, "ALTER TABLE users DROP COLUMN phone").await;

  let diff = SchemaIntrospector::new(db)
    .diff(&required_schema(), Deadline::none())
    .await
    .unwrap();

  assert!(!diff.is_compatible);
  assert_eq!(diff.missing_columns.len(), 1);
  assert_eq!(diff.missing_columns[0].table, "users");
  assert_eq!(diff.missing_columns[0].name, "phone");
}

#[tokio::test]
async fn extra_columns_are_listed_but_compatible() {
  let db = db().await;
  exec(&db, "ALTER TABLE courses ADD COLUMN legacy_code TEXT").await;

  let diff = SchemaIntrospector::new(db)
    .diff(&required_schema(), Deadline::none())
    .await
    .unwrap();

  assert!(diff.is_compatible);
  assert_eq!(diff.extra_columns.len(), 1);
  assert_eq!(diff.extra_columns[0].name, "legacy_code");
  assert!(diff.extra_columns[0].nullable);
}

#[tokio::test]
async fn dropped_table_is_missing_with_all_its_columns() {
  let db = db().await;
  exec(&db, "DROP TABLE audit_logs").await;

  let diff = SchemaIntrospector::new(db)
    .diff(&required_schema(), Deadline::none())
    .await
    .unwrap();

  assert_eq!(diff.missing_tables, vec!["audit_logs".to_owned()]);
  let expected = required_schema()
    .into_iter()
    .filter(|c| c.table == "audit_logs")
    .count();
  assert_eq!(diff.missing_columns.len(), expected);
}

#[tokio::test]
async fn table_columns_reports_live_shape() {
  let db = db().await;
  let introspector = SchemaIntrospector::new(db);

  let columns = introspector
    .table_columns("admins", Deadline::none())
    .await
    .unwrap()
    .unwrap();
  let role = columns.iter().find(|c| c.name == "role").unwrap();
  assert!(!role.nullable);
  assert_eq!(role.default.as_deref(), Some("'admin'"));
  assert!(columns.iter().find(|c| c.name == "id").unwrap().primary_key);

  assert_eq!(
    introspector.table_columns("no_such_table", Deadline::none()).await.unwrap(),
    None
  );
}
