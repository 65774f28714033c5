use std::sync::Arc;

use checkup_core::{
  Deadline, ErrorKind,
  apply::{TableStatus, Verdict},
  artifact::ArtifactStore,
  backup::BackupRequest,
  export::{ExportDocument, ImportOptions},
};
use serde_json::json;

use super::{artifacts, config, count, db, hold_migration_guard, ids, seed};
use crate::{BackupManager, ExportManager, checksum::sha256_hex};

fn import(overwrite: bool) -> ImportOptions {
  ImportOptions { created_by: "ops@example.com".into(), overwrite, description: None }
}

#[tokio::test]
async fn export_holds_every_tracked_table() {
  let db = db().await;
  seed(&db).await;
  let exports = ExportManager::new(db, artifacts(), &config());

  let doc = exports.export_all_data("ops", Deadline::none()).await.unwrap();
  assert_eq!(doc.total_users, 3);
  assert_eq!(doc.created_by, "ops");
  assert_eq!(doc.data.len(), 8);
  assert_eq!(doc.statistics.get("audit_logs"), Some(&1));
  assert!(!doc.data.contains_key("migration_history"));
  assert!(!doc.data.contains_key("backup_metadata"));
}

#[tokio::test]
async fn uploaded_export_is_not_a_backup() {
  let db = db().await;
  seed(&db).await;
  let store = artifacts();
  let backups = BackupManager::new(db, Arc::clone(&store), &config());
  let exports = backups.exports();

  let upload = exports
    .export_and_upload(BackupRequest::new("ops"), Deadline::none())
    .await
    .unwrap();

  assert!(upload.storage_key.starts_with("exports/export-"));
  assert!(upload.storage_key.ends_with(".json"));
  let bytes = store.get(&upload.storage_key).await.unwrap().unwrap();
  assert_eq!(sha256_hex(&bytes), upload.checksum);
  assert_eq!(bytes.len() as u64, upload.file_size_bytes);

  let doc: ExportDocument = serde_json::from_slice(&bytes).unwrap();
  assert_eq!(doc.total_users, 3);
  assert!(backups.list_backups(Deadline::none()).await.unwrap().is_empty());
}

#[tokio::test]
async fn export_imports_into_an_empty_database() {
  let source = db().await;
  seed(&source).await;
  let doc = ExportManager::new(source, artifacts(), &config())
    .export_all_data("ops", Deadline::none())
    .await
    .unwrap();
  let bytes = serde_json::to_vec(&doc).unwrap();

  let target = db().await;
  let exports = ExportManager::new(target.clone(), artifacts(), &config());
  let bundle = exports.parse_import(&bytes).unwrap();
  let report = exports
    .import_data(bundle, import(false), Deadline::none())
    .await
    .unwrap();

  assert!(report.success, "{report:?}");
  assert_eq!(report.details.rows_written(), 10);
  assert_eq!(ids(&target, "users").await, vec!["u1", "u2", "u3"]);
  assert_eq!(count(&target, "health_analysis").await, 1);
}

#[tokio::test]
async fn broken_table_is_reported_and_the_rest_imported() {
  let db = db().await;
  let exports = ExportManager::new(db.clone(), artifacts(), &config());
  let payload = json!({
    "timestamp": "2026-04-01T00:00:00Z",
    "data": {
      "users": [
        { "id": "u1", "email": "ann@example.com", "created_at": "2026-04-01T00:00:00Z", "updated_at": "2026-04-01T00:00:00Z" }
      ],
      "courses": [
        { "id": "c1", "created_at": "2026-04-01T00:00:00Z", "updated_at": "2026-04-01T00:00:00Z" }
      ]
    }
  });

  let bundle = exports.parse_import(payload.to_string().as_bytes()).unwrap();
  let report = exports
    .import_data(bundle, import(false), Deadline::none())
    .await
    .unwrap();

  assert!(!report.success);
  assert!(report.message.contains("courses"), "{}", report.message);
  assert_eq!(report.details.verdict, Verdict::Partial);
  assert_eq!(report.details.failed_tables(), vec!["courses"]);
  assert_eq!(report.details.outcome("users").unwrap().status, TableStatus::Written);
  assert_eq!(count(&db, "users").await, 1);
  assert_eq!(count(&db, "courses").await, 0);
}

#[tokio::test]
async fn nested_payload_is_unwrapped() {
  let db = db().await;
  let exports = ExportManager::new(db.clone(), artifacts(), &config());
  let payload = json!({
    "data": {
      "statistics": { "users": 1 },
      "data": {
        "data": {
          "users": [
            { "id": "u1", "email": "ann@example.com", "created_at": "2026-04-01T00:00:00Z", "updated_at": "2026-04-01T00:00:00Z" }
          ]
        }
      }
    }
  });

  let bundle = exports.parse_import(payload.to_string().as_bytes()).unwrap();
  assert_eq!(bundle.statistics.get("users"), Some(&1));

  let report = exports
    .import_data(bundle, import(true), Deadline::none())
    .await
    .unwrap();
  assert!(report.success);
  assert_eq!(ids(&db, "users").await, vec!["u1"]);
}

#[tokio::test]
async fn malformed_payload_is_invalid_input() {
  let exports = ExportManager::new(db().await, artifacts(), &config());
  let err = exports.parse_import(b"{\"rows\": []}").unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidInput);
  assert!(exports.parse_import(b"not json").is_err());
}

#[tokio::test]
async fn import_waits_for_migrations() {
  let db = db().await;
  let exports = ExportManager::new(db.clone(), artifacts(), &config());
  hold_migration_guard(&db, "migrator").await;

  let bundle = exports.parse_import(b"{\"data\": {}}").unwrap();
  let err = exports
    .import_data(bundle, import(false), Deadline::none())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::MigrationInProgress);
}
