//! [`BackupManager`]: full and incremental backups, their catalog, and
//! restore.
//!
//! An artifact is the compact JSON of a [`SnapshotBundle`]. Its SHA-256 and
//! size go into `backup_metadata` next to the storage key. An incremental
//! backup stores only what changed since its parent, so restoring one means
//! walking `previous_backup_id` back to a full backup and replaying the chain
//! oldest first.

use std::{collections::HashSet, sync::Arc, time::Duration};

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use checkup_core::{
  Deadline,
  apply::ApplyMode,
  artifact::ArtifactStore,
  backup::{
    BackupMetadata, BackupRequest, BackupType, DeleteOutcome, DeletePolicy, RestoreDetails,
    RestoreReport, VerifyReport,
  },
  snapshot::{ChainState, SnapshotBundle},
  table::TrackedTable,
};

use crate::{
  DatabaseHandle, EngineConfig, Error, Result, SchemaIntrospector, SnapshotCodec,
  checksum::sha256_hex,
  encode::{RawBackupMetadata, encode_dt},
  export::ExportManager,
  handle::bounded,
  lock,
  schema::required_schema,
};

/// One verified link of a backup chain.
struct ChainLink {
  metadata: BackupMetadata,
  bundle:   SnapshotBundle,
}

pub struct BackupManager<A> {
  db:        DatabaseHandle,
  artifacts: Arc<A>,
  codec:     SnapshotCodec,
  config:    EngineConfig,
}

impl<A> Clone for BackupManager<A> {
  fn clone(&self) -> Self {
    Self {
      db:        self.db.clone(),
      artifacts: Arc::clone(&self.artifacts),
      codec:     self.codec.clone(),
      config:    self.config.clone(),
    }
  }
}

impl<A: ArtifactStore> BackupManager<A> {
  pub fn new(db: DatabaseHandle, artifacts: Arc<A>, config: &EngineConfig) -> Self {
    Self {
      codec: SnapshotCodec::new(db.clone(), config),
      db,
      artifacts,
      config: config.clone(),
    }
  }

  /// An export manager sharing this manager's database and storage.
  pub fn exports(&self) -> ExportManager<A> {
    ExportManager::new(self.db.clone(), Arc::clone(&self.artifacts), &self.config)
  }

  // ─── Create ───────────────────────────────────────────────────────────────

  /// Capture every tracked table and store it as a new full backup.
  pub async fn create_full_backup(
    &self,
    request: BackupRequest,
    deadline: Deadline,
  ) -> Result<BackupMetadata> {
    lock::ensure_idle(&self.db, self.config.lock_ttl(), deadline).await?;

    let bundle = self
      .codec
      .capture(&TrackedTable::in_dependency_order(), deadline)
      .await?;
    self.store(BackupType::Full, None, &bundle, request, deadline).await
  }

  /// Store only what changed since `previous_backup_id`.
  ///
  /// The parent chain is downloaded and verified first, so an incremental
  /// is never built on a corrupt or broken chain.
  pub async fn create_incremental_backup(
    &self,
    previous_backup_id: &str,
    request: BackupRequest,
    deadline: Deadline,
  ) -> Result<BackupMetadata> {
    lock::ensure_idle(&self.db, self.config.lock_ttl(), deadline).await?;

    let chain = self.load_chain(previous_backup_id, deadline).await?;
    let state = fold_chain(&chain)?;
    let current = self
      .codec
      .capture(&TrackedTable::in_dependency_order(), deadline)
      .await?;
    let delta = state.delta_to(&current)?;

    self
      .store(
        BackupType::Incremental,
        Some(previous_backup_id.to_owned()),
        &delta,
        request,
        deadline,
      )
      .await
  }

  async fn store(
    &self,
    backup_type: BackupType,
    previous_backup_id: Option<String>,
    bundle: &SnapshotBundle,
    request: BackupRequest,
    deadline: Deadline,
  ) -> Result<BackupMetadata> {
    let bytes = bundle.to_bytes()?;
    let backup_id = Uuid::new_v4().to_string();
    let metadata = BackupMetadata {
      storage_key: format!("backups/{}/{backup_id}.json", backup_type.key_segment()),
      backup_type,
      backup_date: bundle.timestamp,
      table_count: bundle.table_count(),
      total_records: bundle.total_records(),
      file_size_bytes: bytes.len() as u64,
      checksum: sha256_hex(&bytes),
      previous_backup_id,
      created_by: request.created_by,
      description: request.description,
      backup_id,
    };

    bounded(deadline, self.artifacts.put(&metadata.storage_key, bytes))
      .await?
      .map_err(Error::artifact)?;

    let row = metadata.clone();
    let recorded = self
      .db
      .call(deadline, move |conn| {
        insert_metadata(conn, &row)?;
        Ok(())
      })
      .await;

    if let Err(e) = recorded {
      // Without a catalog row the artifact is unreachable; remove it.
      if let Err(cleanup) = self.artifacts.delete(&metadata.storage_key).await {
        tracing::warn!(
          storage_key = %metadata.storage_key,
          error = %cleanup,
          "could not remove artifact of unrecorded backup"
        );
      }
      return Err(e);
    }

    tracing::info!(
      backup_id = %metadata.backup_id,
      backup_type = metadata.backup_type.as_str(),
      records = metadata.total_records,
      bytes = metadata.file_size_bytes,
      created_by = %metadata.created_by,
      "backup created"
    );
    Ok(metadata)
  }

  // ─── Catalog ──────────────────────────────────────────────────────────────

  /// Every backup, newest first.
  pub async fn list_backups(&self, deadline: Deadline) -> Result<Vec<BackupMetadata>> {
    self
      .db
      .call(deadline, |conn| {
        let sql = format!(
          "SELECT {} FROM backup_metadata ORDER BY backup_date DESC, rowid DESC",
          RawBackupMetadata::COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let raws = stmt
          .query_map([], RawBackupMetadata::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawBackupMetadata::into_metadata).collect()
      })
      .await
  }

  pub async fn get_backup(&self, backup_id: &str, deadline: Deadline) -> Result<BackupMetadata> {
    self
      .find(backup_id, deadline)
      .await?
      .ok_or_else(|| Error::BackupNotFound(backup_id.to_owned()))
  }

  async fn find(&self, backup_id: &str, deadline: Deadline) -> Result<Option<BackupMetadata>> {
    let id = backup_id.to_owned();
    self
      .db
      .call(deadline, move |conn| {
        let sql = format!(
          "SELECT {} FROM backup_metadata WHERE backup_id = ?1",
          RawBackupMetadata::COLUMNS
        );
        conn
          .query_row(&sql, rusqlite::params![id], RawBackupMetadata::from_row)
          .optional()?
          .map(RawBackupMetadata::into_metadata)
          .transpose()
      })
      .await
  }

  /// Remove a backup's artifact and catalog entry.
  ///
  /// Refuses while incremental backups name it as their parent, unless
  /// `policy` is [`DeletePolicy::BreakChain`]; those dependents are then
  /// returned as orphaned and can no longer be restored.
  pub async fn delete_backup(
    &self,
    backup_id: &str,
    policy: DeletePolicy,
    deadline: Deadline,
  ) -> Result<DeleteOutcome> {
    let metadata = self.get_backup(backup_id, deadline).await?;

    let id = backup_id.to_owned();
    let dependents = self
      .db
      .call(deadline, move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT backup_id FROM backup_metadata WHERE previous_backup_id = ?1 ORDER BY backup_date",
        )?;
        let ids = stmt
          .query_map(rusqlite::params![id], |r| r.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
      })
      .await?;

    if !dependents.is_empty() && policy == DeletePolicy::Refuse {
      return Err(Error::Dependency { backup_id: backup_id.to_owned(), dependents });
    }

    // Catalog row first. The only possible leftover is an unreferenced
    // artifact.
    let id = backup_id.to_owned();
    self
      .db
      .call(deadline, move |conn| {
        conn.execute(
          "DELETE FROM backup_metadata WHERE backup_id = ?1",
          rusqlite::params![id],
        )?;
        Ok(())
      })
      .await?;

    let artifact_removed =
      match bounded(deadline, self.artifacts.delete(&metadata.storage_key)).await? {
        Ok(removed) => removed,
        Err(e) => {
          tracing::warn!(
            backup_id,
            storage_key = %metadata.storage_key,
            error = %e,
            "catalog entry removed but artifact delete failed"
          );
          return Err(Error::artifact(e));
        }
      };

    if dependents.is_empty() {
      tracing::info!(backup_id, artifact_removed, "backup deleted");
    } else {
      tracing::warn!(backup_id, orphaned = ?dependents, "backup deleted; chain broken");
    }
    Ok(DeleteOutcome { deleted: true, artifact_removed, orphaned: dependents })
  }

  // ─── Verify / download ────────────────────────────────────────────────────

  /// Recompute the stored artifact's checksum and compare it with the
  /// catalog. Never modifies anything.
  pub async fn verify_backup(&self, backup_id: &str, deadline: Deadline) -> Result<VerifyReport> {
    let metadata = self.get_backup(backup_id, deadline).await?;
    let bytes = bounded(deadline, self.artifacts.get(&metadata.storage_key))
      .await?
      .map_err(Error::artifact)?;

    let report = match bytes {
      None => VerifyReport {
        valid:             false,
        expected_checksum: metadata.checksum,
        actual_checksum:   None,
        details:           format!("artifact {} is missing", metadata.storage_key),
      },
      Some(bytes) => {
        let actual = sha256_hex(&bytes);
        let size_ok = bytes.len() as u64 == metadata.file_size_bytes;
        let valid = actual == metadata.checksum && size_ok;
        let details = match (actual == metadata.checksum, size_ok) {
          (true, true) => "checksum and size match".to_owned(),
          (false, _) => "checksum mismatch".to_owned(),
          (true, false) => format!(
            "size mismatch: expected {} bytes, found {}",
            metadata.file_size_bytes,
            bytes.len()
          ),
        };
        VerifyReport {
          valid,
          expected_checksum: metadata.checksum,
          actual_checksum: Some(actual),
          details,
        }
      }
    };

    if report.valid {
      tracing::info!(backup_id, "backup verified");
    } else {
      tracing::warn!(backup_id, details = %report.details, "backup failed verification");
    }
    Ok(report)
  }

  /// A time-limited URL for downloading the backup's artifact.
  pub async fn get_backup_download_url(
    &self,
    backup_id: &str,
    expires_in: Duration,
    deadline: Deadline,
  ) -> Result<String> {
    let metadata = self.get_backup(backup_id, deadline).await?;
    bounded(deadline, self.artifacts.signed_url(&metadata.storage_key, expires_in))
      .await?
      .map_err(Error::artifact)?
      .ok_or(Error::ArtifactMissing {
        backup_id:   metadata.backup_id,
        storage_key: metadata.storage_key,
      })
  }

  // ─── Restore ──────────────────────────────────────────────────────────────

  /// Restore this manager's own database to the state captured by
  /// `backup_id`.
  pub async fn restore_from_backup(
    &self,
    backup_id: &str,
    request: BackupRequest,
    deadline: Deadline,
  ) -> Result<RestoreReport> {
    self.restore_into(&self.db, backup_id, request, deadline).await
  }

  /// Restore the chain ending at `backup_id` into `target`.
  ///
  /// Every artifact in the chain is downloaded and checksum-verified and the
  /// target schema is checked before anything is written. The write itself
  /// is one transaction: on any failure the target is left exactly as it
  /// was.
  pub async fn restore_into(
    &self,
    target: &DatabaseHandle,
    backup_id: &str,
    request: BackupRequest,
    deadline: Deadline,
  ) -> Result<RestoreReport> {
    lock::ensure_idle(target, self.config.lock_ttl(), deadline).await?;

    let chain = self.load_chain(backup_id, deadline).await?;

    let diff = SchemaIntrospector::new(target.clone())
      .diff(&required_schema(), deadline)
      .await?;
    if !diff.is_compatible {
      let missing = diff
        .missing_columns
        .iter()
        .map(|c| format!("{}.{}", c.table, c.name))
        .collect();
      return Err(Error::SchemaIncompatible { missing });
    }

    let ids: Vec<String> = chain.iter().map(|l| l.metadata.backup_id.clone()).collect();
    let layers = chain.into_iter().map(|l| l.bundle).collect();
    let result = SnapshotCodec::new(target.clone(), &self.config)
      .apply_chain(layers, ApplyMode::strict_overwrite(), deadline)
      .await?;

    let rows_written = result.rows_written();
    tracing::info!(
      backup_id,
      chain = ?ids,
      rows_written,
      requested_by = %request.created_by,
      "backup restored"
    );
    Ok(RestoreReport {
      success: true,
      message: format!(
        "Restored backup {backup_id} ({} backup(s), {rows_written} rows)",
        ids.len()
      ),
      details: RestoreDetails {
        backup_id: backup_id.to_owned(),
        chain: ids,
        rows_written,
        tables: result.tables,
      },
    })
  }

  /// Resolve the chain ending at `backup_id`, oldest first, with every
  /// artifact downloaded and its checksum verified.
  async fn load_chain(&self, backup_id: &str, deadline: Deadline) -> Result<Vec<ChainLink>> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(backup_id.to_owned());

    while let Some(id) = cursor {
      if !seen.insert(id.clone()) {
        return Err(Error::ChainBroken { backup_id: backup_id.to_owned(), missing: id });
      }
      let metadata = match self.find(&id, deadline).await? {
        Some(m) => m,
        None if entries.is_empty() => return Err(Error::BackupNotFound(id)),
        None => {
          return Err(Error::ChainBroken { backup_id: backup_id.to_owned(), missing: id });
        }
      };
      cursor = match metadata.backup_type {
        BackupType::Full => None,
        BackupType::Incremental => Some(metadata.previous_backup_id.clone().ok_or_else(|| {
          Error::ChainBroken {
            backup_id: backup_id.to_owned(),
            missing:   format!("parent of {}", metadata.backup_id),
          }
        })?),
      };
      entries.push(metadata);
    }
    entries.reverse();

    let mut chain = Vec::with_capacity(entries.len());
    for metadata in entries {
      let bytes = bounded(deadline, self.artifacts.get(&metadata.storage_key))
        .await?
        .map_err(Error::artifact)?
        .ok_or_else(|| Error::ArtifactMissing {
          backup_id:   metadata.backup_id.clone(),
          storage_key: metadata.storage_key.clone(),
        })?;

      let actual = sha256_hex(&bytes);
      if actual != metadata.checksum {
        tracing::warn!(backup_id = %metadata.backup_id, "checksum mismatch");
        return Err(Error::ChecksumMismatch {
          backup_id: metadata.backup_id,
          expected: metadata.checksum,
          actual,
        });
      }

      let bundle = SnapshotBundle::from_bytes(&bytes)?;
      chain.push(ChainLink { metadata, bundle });
    }
    Ok(chain)
  }
}

fn fold_chain(chain: &[ChainLink]) -> Result<ChainState> {
  let Some((full, deltas)) = chain.split_first() else {
    return Ok(ChainState::default());
  };
  let mut state = ChainState::from_full(&full.bundle)?;
  for link in deltas {
    state.apply_delta(&link.bundle)?;
  }
  Ok(state)
}

fn insert_metadata(conn: &rusqlite::Connection, m: &BackupMetadata) -> Result<()> {
  let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
  conn.execute(
    "INSERT INTO backup_metadata
       (backup_id, backup_type, backup_date, table_count, total_records, file_size_bytes,
        checksum, previous_backup_id, created_by, description, storage_key)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    rusqlite::params![
      m.backup_id,
      m.backup_type.as_str(),
      encode_dt(m.backup_date),
      count(m.table_count),
      count(m.total_records),
      i64::try_from(m.file_size_bytes).unwrap_or(i64::MAX),
      m.checksum,
      m.previous_backup_id,
      m.created_by,
      m.description,
      m.storage_key,
    ],
  )?;
  Ok(())
}
