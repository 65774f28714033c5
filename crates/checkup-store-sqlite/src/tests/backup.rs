use std::{sync::Arc, time::Duration};

use chrono::Utc;
use checkup_artifacts::ObjectArtifactStore;
use checkup_core::{
  Deadline, ErrorKind,
  artifact::ArtifactStore,
  backup::{BackupRequest, BackupType, DeletePolicy},
  snapshot::SnapshotBundle,
  table::TrackedTable,
};

use super::{artifacts, config, count, db, exec, hold_migration_guard, ids, seed, text_column};
use crate::{BackupManager, DatabaseHandle, Error, SnapshotCodec};

fn ops() -> BackupRequest { BackupRequest::new("ops@example.com") }

fn manager(db: &DatabaseHandle) -> (BackupManager<ObjectArtifactStore>, Arc<ObjectArtifactStore>) {
  let store = artifacts();
  (BackupManager::new(db.clone(), Arc::clone(&store), &config()), store)
}

async fn score(db: &DatabaseHandle) -> f64 {
  db.call(Deadline::none(), |conn| {
    Ok(conn.query_row("SELECT score FROM health_analysis WHERE id = 'h1'", [], |r| {
      r.get::<_, f64>(0)
    })?)
  })
  .await
  .unwrap()
}

/// An artifact store whose deletes always fail.
struct StuckDeletes(ObjectArtifactStore);

impl ArtifactStore for StuckDeletes {
  type Error = checkup_artifacts::Error;

  async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), Self::Error> {
    self.0.put(key, bytes).await
  }

  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> { self.0.get(key).await }

  async fn delete(&self, _key: &str) -> Result<bool, Self::Error> {
    Err(std::io::Error::other("storage offline").into())
  }

  async fn exists(&self, key: &str) -> Result<bool, Self::Error> { self.0.exists(key).await }

  async fn signed_url(
    &self,
    key: &str,
    expires_in: Duration,
  ) -> Result<Option<String>, Self::Error> {
    self.0.signed_url(key, expires_in).await
  }
}

async fn capture_all(db: &DatabaseHandle) -> SnapshotBundle {
  SnapshotCodec::new(db.clone(), &config())
    .capture(&TrackedTable::in_dependency_order(), Deadline::none())
    .await
    .unwrap()
}

#[tokio::test]
async fn full_backup_records_metadata_and_artifact() {
  let db = db().await;
  seed(&db).await;
  let (backups, store) = manager(&db);

  let meta = backups
    .create_full_backup(ops().with_description("nightly"), Deadline::none())
    .await
    .unwrap();

  assert_eq!(meta.backup_type, BackupType::Full);
  assert_eq!(meta.previous_backup_id, None);
  assert_eq!(meta.storage_key, format!("backups/full/{}.json", meta.backup_id));
  assert_eq!(meta.table_count, 8);
  assert_eq!(meta.total_records, 10);
  assert_eq!(meta.checksum.len(), 64);
  assert_eq!(meta.description.as_deref(), Some("nightly"));

  let bytes = store.get(&meta.storage_key).await.unwrap().unwrap();
  assert_eq!(bytes.len() as u64, meta.file_size_bytes);

  let listed = backups.get_backup(&meta.backup_id, Deadline::none()).await.unwrap();
  assert_eq!(listed, meta);
}

#[tokio::test]
async fn restore_reproduces_captured_state() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let before = capture_all(&db).await;
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  exec(
    &db,
    "DELETE FROM audit_logs; UPDATE users SET name = 'Changed' WHERE id = 'u1';
     INSERT INTO courses (id, title, created_at, updated_at)
       VALUES ('c2', 'Extra', '2026-03-01T00:00:00.000000Z', '2026-03-01T00:00:00.000000Z');",
  )
  .await;

  let report = backups
    .restore_from_backup(&meta.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  assert!(report.success);
  assert_eq!(report.details.chain, vec![meta.backup_id.clone()]);
  assert_eq!(report.details.rows_written, 10);
  assert_eq!(capture_all(&db).await.data, before.data);
}

#[tokio::test]
async fn restore_into_a_fresh_database() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let fresh = DatabaseHandle::open_in_memory().await.unwrap();
  backups
    .restore_into(&fresh, &meta.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  assert_eq!(capture_all(&fresh).await.data, capture_all(&db).await.data);
}

#[tokio::test]
async fn restore_keeps_rows_that_predate_column_validation() {
  let db = db().await;
  seed(&db).await;
  exec(
    &db,
    "UPDATE requirements SET answers = '{\"q1\": 3}' WHERE id = 'r1';
     UPDATE audit_logs SET detail = 'logged in from 1.2.3.4' WHERE id = 'l1';",
  )
  .await;
  let (backups, _) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let fresh = DatabaseHandle::open_in_memory().await.unwrap();
  let report = backups
    .restore_into(&fresh, &meta.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  assert!(report.success);
  assert_eq!(
    text_column(&fresh, "requirements", "answers", "r1").await.as_deref(),
    Some("{\"q1\": 3}")
  );
  assert_eq!(
    text_column(&fresh, "audit_logs", "detail", "l1").await.as_deref(),
    Some("logged in from 1.2.3.4")
  );
}

#[tokio::test]
async fn restore_keeps_every_bit_of_a_real() {
  let db = db().await;
  seed(&db).await;
  exec(&db, "UPDATE health_analysis SET score = 0.9856906946328695").await;
  let (backups, _) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let fresh = DatabaseHandle::open_in_memory().await.unwrap();
  backups
    .restore_into(&fresh, &meta.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  assert_eq!(score(&fresh).await.to_bits(), score(&db).await.to_bits());
}

#[tokio::test]
async fn incremental_chain_replays_deletions() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let full = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  exec(&db, "DELETE FROM users WHERE id = 'u3'").await;
  let incr = backups
    .create_incremental_backup(&full.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  assert_eq!(incr.backup_type, BackupType::Incremental);
  assert_eq!(incr.previous_backup_id.as_deref(), Some(full.backup_id.as_str()));
  assert!(incr.storage_key.starts_with("backups/incremental/"));
  assert_eq!(incr.total_records, 0);

  let fresh = DatabaseHandle::open_in_memory().await.unwrap();
  let report = backups
    .restore_into(&fresh, &incr.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  assert_eq!(report.details.chain, vec![full.backup_id, incr.backup_id]);
  assert_eq!(ids(&fresh, "users").await, vec!["u1", "u2"]);
  assert_eq!(count(&fresh, "requirements").await, 1);
}

#[tokio::test]
async fn incremental_carries_changed_and_new_rows() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let full = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  exec(&db, "UPDATE users SET name = 'Robert' WHERE id = 'u2'").await;
  let first = backups
    .create_incremental_backup(&full.backup_id, ops(), Deadline::none())
    .await
    .unwrap();
  assert_eq!(first.total_records, 1);

  exec(
    &db,
    "INSERT INTO users (id, email, created_at, updated_at)
       VALUES ('u4', 'dee@example.com', '2026-03-01T00:00:00.000000Z', '2026-03-01T00:00:00.000000Z')",
  )
  .await;
  let second = backups
    .create_incremental_backup(&first.backup_id, ops(), Deadline::none())
    .await
    .unwrap();
  assert_eq!(second.total_records, 1);

  let fresh = DatabaseHandle::open_in_memory().await.unwrap();
  backups
    .restore_into(&fresh, &second.backup_id, ops(), Deadline::none())
    .await
    .unwrap();
  assert_eq!(ids(&fresh, "users").await, vec!["u1", "u2", "u3", "u4"]);
  assert_eq!(text_column(&fresh, "users", "name", "u2").await.as_deref(), Some("Robert"));
}

#[tokio::test]
async fn incremental_restore_handles_swapped_unique_values() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let full = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  exec(
    &db,
    "UPDATE users SET email = 'swap@example.com' WHERE id = 'u1';
     UPDATE users SET email = 'ann@example.com' WHERE id = 'u2';
     UPDATE users SET email = 'bob@example.com' WHERE id = 'u1';",
  )
  .await;
  let incr = backups
    .create_incremental_backup(&full.backup_id, ops(), Deadline::none())
    .await
    .unwrap();
  assert_eq!(incr.total_records, 2);

  let fresh = DatabaseHandle::open_in_memory().await.unwrap();
  let report = backups
    .restore_into(&fresh, &incr.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  assert!(report.success);
  assert_eq!(text_column(&fresh, "users", "email", "u1").await.as_deref(), Some("bob@example.com"));
  assert_eq!(text_column(&fresh, "users", "email", "u2").await.as_deref(), Some("ann@example.com"));
  assert_eq!(count(&fresh, "requirements").await, 1);
}

#[tokio::test]
async fn corrupted_artifact_is_detected_and_nothing_is_written() {
  let db = db().await;
  seed(&db).await;
  let (backups, store) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let mut bytes = store.get(&meta.storage_key).await.unwrap().unwrap();
  let last = bytes.len() - 2;
  bytes[last] ^= 0x01;
  store.put(&meta.storage_key, bytes).await.unwrap();

  let verify = backups.verify_backup(&meta.backup_id, Deadline::none()).await.unwrap();
  assert!(!verify.valid);
  assert_eq!(verify.expected_checksum, meta.checksum);
  assert_ne!(verify.actual_checksum.as_deref(), Some(meta.checksum.as_str()));

  exec(&db, "DELETE FROM audit_logs").await;
  let err = backups
    .restore_from_backup(&meta.backup_id, ops(), Deadline::none())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ChecksumMismatch { .. }), "{err:?}");
  assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
  assert_eq!(count(&db, "audit_logs").await, 0);
}

#[tokio::test]
async fn corrupt_parent_blocks_incremental_restore() {
  let db = db().await;
  seed(&db).await;
  let (backups, store) = manager(&db);
  let full = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();
  exec(&db, "DELETE FROM users WHERE id = 'u3'").await;
  let incr = backups
    .create_incremental_backup(&full.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  store.put(&full.storage_key, b"{}".to_vec()).await.unwrap();

  let fresh = DatabaseHandle::open_in_memory().await.unwrap();
  let err = backups
    .restore_into(&fresh, &incr.backup_id, ops(), Deadline::none())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ChecksumMismatch { ref backup_id, .. } if *backup_id == full.backup_id));
  assert_eq!(count(&fresh, "users").await, 0);
}

#[tokio::test]
async fn intact_backup_verifies() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let report = backups.verify_backup(&meta.backup_id, Deadline::none()).await.unwrap();
  assert!(report.valid, "{report:?}");
  assert_eq!(report.actual_checksum.as_deref(), Some(meta.checksum.as_str()));
}

#[tokio::test]
async fn missing_artifact_fails_verification() {
  let db = db().await;
  let (backups, store) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();
  store.delete(&meta.storage_key).await.unwrap();

  let report = backups.verify_backup(&meta.backup_id, Deadline::none()).await.unwrap();
  assert!(!report.valid);
  assert_eq!(report.actual_checksum, None);

  let err = backups
    .get_backup_download_url(&meta.backup_id, Duration::from_secs(60), Deadline::none())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn unknown_backup_is_not_found() {
  let db = db().await;
  let (backups, _) = manager(&db);

  for err in [
    backups.verify_backup("nope", Deadline::none()).await.unwrap_err(),
    backups
      .delete_backup("nope", DeletePolicy::Refuse, Deadline::none())
      .await
      .unwrap_err(),
    backups
      .restore_from_backup("nope", ops(), Deadline::none())
      .await
      .unwrap_err(),
  ] {
    assert_eq!(err.kind(), ErrorKind::NotFound, "{err:?}");
  }
}

#[tokio::test]
async fn deleting_a_parent_is_refused_unless_chain_is_broken() {
  let db = db().await;
  seed(&db).await;
  let (backups, store) = manager(&db);
  let full = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();
  let incr = backups
    .create_incremental_backup(&full.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  let err = backups
    .delete_backup(&full.backup_id, DeletePolicy::Refuse, Deadline::none())
    .await
    .unwrap_err();
  assert!(
    matches!(err, Error::Dependency { ref dependents, .. } if *dependents == vec![incr.backup_id.clone()])
  );
  assert!(store.exists(&full.storage_key).await.unwrap());

  let outcome = backups
    .delete_backup(&full.backup_id, DeletePolicy::BreakChain, Deadline::none())
    .await
    .unwrap();
  assert!(outcome.deleted);
  assert!(outcome.artifact_removed);
  assert_eq!(outcome.orphaned, vec![incr.backup_id.clone()]);
  assert!(!store.exists(&full.storage_key).await.unwrap());

  let err = backups
    .restore_from_backup(&incr.backup_id, ops(), Deadline::none())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ChainBroken { ref missing, .. } if *missing == full.backup_id));
}

#[tokio::test]
async fn deleting_a_leaf_backup_succeeds() {
  let db = db().await;
  let (backups, store) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let outcome = backups
    .delete_backup(&meta.backup_id, DeletePolicy::Refuse, Deadline::none())
    .await
    .unwrap();
  assert!(outcome.deleted && outcome.artifact_removed);
  assert!(outcome.orphaned.is_empty());
  assert!(!store.exists(&meta.storage_key).await.unwrap());
  assert!(backups.list_backups(Deadline::none()).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_artifact_delete_leaves_no_catalog_entry() {
  let db = db().await;
  let store = Arc::new(StuckDeletes(ObjectArtifactStore::in_memory()));
  let backups = BackupManager::new(db.clone(), Arc::clone(&store), &config());
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let err = backups
    .delete_backup(&meta.backup_id, DeletePolicy::Refuse, Deadline::none())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Connection, "{err:?}");

  let err = backups.get_backup(&meta.backup_id, Deadline::none()).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotFound);
  assert!(store.0.exists(&meta.storage_key).await.unwrap());
}

#[tokio::test]
async fn backups_are_listed_newest_first() {
  let db = db().await;
  let (backups, _) = manager(&db);
  let first = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();
  let second = backups
    .create_incremental_backup(&first.backup_id, ops(), Deadline::none())
    .await
    .unwrap();

  let listed: Vec<String> = backups
    .list_backups(Deadline::none())
    .await
    .unwrap()
    .into_iter()
    .map(|m| m.backup_id)
    .collect();
  assert_eq!(listed, vec![second.backup_id, first.backup_id]);
}

#[tokio::test]
async fn download_url_is_signed_for_the_artifact() {
  let db = db().await;
  let (backups, store) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let url = backups
    .get_backup_download_url(&meta.backup_id, Duration::from_secs(300), Deadline::none())
    .await
    .unwrap();
  assert_eq!(store.signer().verify(&url, Utc::now()).unwrap(), meta.storage_key);
}

#[tokio::test]
async fn restore_waits_for_migrations() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  hold_migration_guard(&db, "migrator").await;
  let err = backups
    .restore_from_backup(&meta.backup_id, ops(), Deadline::none())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::MigrationInProgress);
}

#[tokio::test]
async fn restore_refuses_an_outdated_schema() {
  let db = db().await;
  seed(&db).await;
  let (backups, _) = manager(&db);
  let meta = backups.create_full_backup(ops(), Deadline::none()).await.unwrap();

  let target = DatabaseHandle::open_in_memory().await.unwrap();
  exec(&target, "ALTER TABLE users DROP COLUMN phone").await;

  let err = backups
    .restore_into(&target, &meta.backup_id, ops(), Deadline::none())
    .await
    .unwrap_err();
  assert!(
    matches!(err, Error::SchemaIncompatible { ref missing } if *missing == vec!["users.phone".to_owned()])
  );
  assert_eq!(count(&target, "users").await, 0);
}
