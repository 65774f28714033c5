//! [`ExportManager`]: ad-hoc exports and imports outside the backup chain.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use checkup_core::{
  Deadline,
  apply::ApplyMode,
  artifact::ArtifactStore,
  backup::BackupRequest,
  export::{ExportDocument, ExportUpload, ImportOptions, ImportReport},
  snapshot::SnapshotBundle,
  table::TrackedTable,
};

use crate::{
  DatabaseHandle, EngineConfig, Error, Result, SnapshotCodec, checksum::sha256_hex,
  handle::bounded, lock,
};

pub struct ExportManager<A> {
  db:        DatabaseHandle,
  artifacts: Arc<A>,
  codec:     SnapshotCodec,
  config:    EngineConfig,
}

impl<A> Clone for ExportManager<A> {
  fn clone(&self) -> Self {
    Self {
      db:        self.db.clone(),
      artifacts: Arc::clone(&self.artifacts),
      codec:     self.codec.clone(),
      config:    self.config.clone(),
    }
  }
}

impl<A: ArtifactStore> ExportManager<A> {
  pub fn new(db: DatabaseHandle, artifacts: Arc<A>, config: &EngineConfig) -> Self {
    Self {
      codec: SnapshotCodec::new(db.clone(), config),
      db,
      artifacts,
      config: config.clone(),
    }
  }

  /// Every tracked table as one document.
  pub async fn export_all_data(
    &self,
    created_by: &str,
    deadline: Deadline,
  ) -> Result<ExportDocument> {
    lock::ensure_idle(&self.db, self.config.lock_ttl(), deadline).await?;

    let bundle = self
      .codec
      .capture(&TrackedTable::in_dependency_order(), deadline)
      .await?;
    let document = ExportDocument::from_bundle(bundle, created_by);

    tracing::info!(
      created_by,
      users = document.total_users,
      tables = document.statistics.len(),
      "data exported"
    );
    Ok(document)
  }

  /// Export everything and place the document in artifact storage. The
  /// upload is standalone: no backup metadata is written.
  pub async fn export_and_upload(
    &self,
    request: BackupRequest,
    deadline: Deadline,
  ) -> Result<ExportUpload> {
    let document = self.export_all_data(&request.created_by, deadline).await?;
    let bytes = serde_json::to_vec(&document)?;

    let storage_key = format!(
      "exports/export-{}-{}.json",
      document.timestamp.format("%Y%m%dT%H%M%SZ"),
      Uuid::new_v4()
    );
    let upload = ExportUpload {
      storage_key,
      timestamp: document.timestamp,
      statistics: document.statistics,
      checksum: sha256_hex(&bytes),
      file_size_bytes: bytes.len() as u64,
    };

    bounded(deadline, self.artifacts.put(&upload.storage_key, bytes))
      .await?
      .map_err(Error::artifact)?;

    tracing::info!(
      storage_key = %upload.storage_key,
      bytes = upload.file_size_bytes,
      created_by = %request.created_by,
      "export uploaded"
    );
    Ok(upload)
  }

  /// Parse an import payload: a plain bundle, an export document, or either
  /// nested inside `{"data": {"data": ...}}` wrappers.
  pub fn parse_import(&self, bytes: &[u8]) -> Result<SnapshotBundle> {
    let value: serde_json::Value =
      serde_json::from_slice(bytes).map_err(checkup_core::Error::from)?;
    Ok(SnapshotBundle::from_import_value(value, Utc::now())?)
  }

  /// Write an imported bundle.
  ///
  /// Each table is applied on its own: a table that fails is rolled back and
  /// reported while the others are kept. `success` is true only when every
  /// table went in.
  pub async fn import_data(
    &self,
    bundle: SnapshotBundle,
    options: ImportOptions,
    deadline: Deadline,
  ) -> Result<ImportReport> {
    lock::ensure_idle(&self.db, self.config.lock_ttl(), deadline).await?;

    let mode = if options.overwrite { ApplyMode::overwrite() } else { ApplyMode::merge() };
    let result = self.codec.apply(bundle, mode, deadline).await?;

    let rows = result.rows_written();
    let failed = result.failed_tables().join(", ");
    let success = result.is_success();
    let message = if success {
      format!("Imported {rows} rows")
    } else {
      format!("Imported {rows} rows; failed tables: {failed}")
    };

    if success {
      tracing::info!(
        created_by = %options.created_by,
        overwrite = options.overwrite,
        description = ?options.description,
        rows,
        "data imported"
      );
    } else {
      tracing::warn!(
        created_by = %options.created_by,
        overwrite = options.overwrite,
        rows,
        failed = %failed,
        "import partially failed"
      );
    }

    Ok(ImportReport { success, message, details: result })
  }
}
