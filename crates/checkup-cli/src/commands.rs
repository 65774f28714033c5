//! Subcommands and their dispatch onto the engine.

use std::{path::PathBuf, sync::Arc, time::Duration};

use checkup_artifacts::ObjectArtifactStore;
use checkup_core::{
  Deadline, ErrorKind,
  backup::{BackupRequest, DeletePolicy},
  export::ImportOptions,
  report::OperationReport,
};
use checkup_store_sqlite::{
  BackupManager, DatabaseHandle, EngineConfig, ExportManager, MigrationManager,
};
use clap::{Args, Subcommand};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Engine(#[from] checkup_store_sqlite::Error),

  #[error("cannot access {}: {source}", .path.display())]
  File {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(
    "artifact provider `memory` cannot keep artifacts between runs; configure `local` or `s3`"
  )]
  EphemeralArtifacts,
}

impl RunError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Engine(e) => e.kind(),
      Self::File { .. } | Self::EphemeralArtifacts => ErrorKind::InvalidInput,
    }
  }
}

impl From<serde_json::Error> for RunError {
  fn from(e: serde_json::Error) -> Self { Self::Engine(e.into()) }
}

type Result<T, E = RunError> = std::result::Result<T, E>;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Compare the live schema with the required schema.
  SchemaDiff,
  /// Apply pending additive migrations.
  Migrate,
  /// List recent migrations, newest first.
  Migrations {
    #[arg(long, default_value_t = 20)]
    limit: usize,
  },
  /// Undo one migration.
  Rollback { migration_id: String },
  /// Create a backup.
  Backup {
    #[command(subcommand)]
    kind: BackupKind,
  },
  /// List backups, newest first.
  Backups,
  /// Show one backup's metadata.
  Show { backup_id: String },
  /// Delete a backup and its artifact.
  Delete {
    backup_id:   String,
    /// Delete even if incremental backups depend on it.
    #[arg(long)]
    break_chain: bool,
  },
  /// Check a backup's artifact against its recorded checksum.
  Verify { backup_id: String },
  /// Issue a time-limited download URL for a backup.
  DownloadUrl {
    backup_id:    String,
    #[arg(long, default_value_t = 3600)]
    expires_secs: u64,
  },
  /// Restore a backup (and its chain).
  Restore {
    backup_id: String,
    /// Restore into another database file instead of the configured one.
    #[arg(long, value_name = "PATH")]
    target:    Option<PathBuf>,
    #[command(flatten)]
    who:       Who,
  },
  /// Export every tracked table.
  Export {
    /// Upload the export to artifact storage instead of printing it.
    #[arg(long, conflicts_with = "output")]
    upload: bool,
    /// Write the export document to a file.
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
    #[command(flatten)]
    who:    Who,
  },
  /// Import an export or bundle file.
  Import {
    file:      PathBuf,
    /// Clear each imported table first instead of merging.
    #[arg(long)]
    overwrite: bool,
    #[command(flatten)]
    who:       Who,
  },
}

impl Command {
  /// Whether the command reads or writes artifacts that must outlive this
  /// process.
  pub fn needs_durable_artifacts(&self) -> bool {
    matches!(
      self,
      Self::Backup { .. }
        | Self::Verify { .. }
        | Self::DownloadUrl { .. }
        | Self::Restore { .. }
        | Self::Delete { .. }
        | Self::Export { upload: true, .. }
    )
  }
}

#[derive(Subcommand, Debug)]
pub enum BackupKind {
  Full {
    #[command(flatten)]
    who: Who,
  },
  Incremental {
    /// The backup this one builds on.
    #[arg(long)]
    previous: String,
    #[command(flatten)]
    who:      Who,
  },
}

/// Who is acting, for the audit trail in logs and metadata.
#[derive(Args, Debug)]
pub struct Who {
  #[arg(long = "by", default_value = "cli")]
  pub created_by:  String,
  #[arg(long)]
  pub description: Option<String>,
}

impl Who {
  fn request(self) -> BackupRequest {
    BackupRequest { created_by: self.created_by, description: self.description }
  }
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

pub struct Engine {
  migrations: MigrationManager,
  backups:    BackupManager<ObjectArtifactStore>,
  exports:    ExportManager<ObjectArtifactStore>,
}

impl Engine {
  pub fn new(db: DatabaseHandle, artifacts: Arc<ObjectArtifactStore>, config: &EngineConfig) -> Self {
    let backups = BackupManager::new(db.clone(), artifacts, config);
    Self {
      migrations: MigrationManager::new(db, config),
      exports: backups.exports(),
      backups,
    }
  }

  pub async fn run(&self, command: Command, deadline: Deadline) -> Result<OperationReport> {
    match command {
      Command::SchemaDiff => {
        let diff = self.migrations.diff(deadline).await?;
        let message = if diff.is_compatible {
          "Schema is compatible"
        } else {
          "Schema is missing required columns"
        };
        ok(message, &diff)
      }

      Command::Migrate => {
        let report = self.migrations.ensure_database_schema(deadline).await?;
        let message = format!(
          "{} migration(s) applied, {} error(s)",
          report.executed.len(),
          report.errors.len()
        );
        Ok(OperationReport { success: report.success, ..ok(message, &report)? })
      }

      Command::Migrations { limit } => {
        let history = self.migrations.get_migration_history(limit, deadline).await?;
        ok(format!("{} migration(s)", history.len()), &history)
      }

      Command::Rollback { migration_id } => {
        let report = self.migrations.rollback_migration(&migration_id, deadline).await?;
        ok(report.message.clone(), &report.details)
      }

      Command::Backup { kind: BackupKind::Full { who } } => {
        let meta = self.backups.create_full_backup(who.request(), deadline).await?;
        ok(format!("Full backup {} created", meta.backup_id), &meta)
      }

      Command::Backup { kind: BackupKind::Incremental { previous, who } } => {
        let meta = self
          .backups
          .create_incremental_backup(&previous, who.request(), deadline)
          .await?;
        ok(format!("Incremental backup {} created", meta.backup_id), &meta)
      }

      Command::Backups => {
        let list = self.backups.list_backups(deadline).await?;
        ok(format!("{} backup(s)", list.len()), &list)
      }

      Command::Show { backup_id } => {
        let meta = self.backups.get_backup(&backup_id, deadline).await?;
        ok(format!("Backup {backup_id}"), &meta)
      }

      Command::Delete { backup_id, break_chain } => {
        let policy = if break_chain { DeletePolicy::BreakChain } else { DeletePolicy::Refuse };
        let outcome = self.backups.delete_backup(&backup_id, policy, deadline).await?;
        ok(format!("Backup {backup_id} deleted"), &outcome)
      }

      Command::Verify { backup_id } => {
        let report = self.backups.verify_backup(&backup_id, deadline).await?;
        Ok(OperationReport {
          success: report.valid,
          ..ok(report.details.clone(), &report)?
        })
      }

      Command::DownloadUrl { backup_id, expires_secs } => {
        let url = self
          .backups
          .get_backup_download_url(&backup_id, Duration::from_secs(expires_secs), deadline)
          .await?;
        ok("Download URL issued", &json!({ "url": url, "expiresInSecs": expires_secs }))
      }

      Command::Restore { backup_id, target, who } => {
        let report = match target {
          Some(path) => {
            let target = DatabaseHandle::open(&path).await?;
            let report = self
              .backups
              .restore_into(&target, &backup_id, who.request(), deadline)
              .await;
            target.close().await?;
            report?
          }
          None => {
            self
              .backups
              .restore_from_backup(&backup_id, who.request(), deadline)
              .await?
          }
        };
        ok(report.message.clone(), &report.details)
      }

      Command::Export { upload: true, who, .. } => {
        let upload = self.exports.export_and_upload(who.request(), deadline).await?;
        ok(format!("Export uploaded to {}", upload.storage_key), &upload)
      }

      Command::Export { output: Some(path), who, .. } => {
        let doc = self.exports.export_all_data(&who.created_by, deadline).await?;
        let bytes = serde_json::to_vec_pretty(&doc)?;
        if let Err(source) = tokio::fs::write(&path, &bytes).await {
          return Err(RunError::File { path, source });
        }
        ok(
          format!("Export written to {}", path.display()),
          &json!({ "statistics": doc.statistics, "totalUsers": doc.total_users }),
        )
      }

      Command::Export { who, .. } => {
        let doc = self.exports.export_all_data(&who.created_by, deadline).await?;
        ok(format!("Exported {} user(s)", doc.total_users), &doc)
      }

      Command::Import { file, overwrite, who } => {
        let bytes = match tokio::fs::read(&file).await {
          Ok(bytes) => bytes,
          Err(source) => return Err(RunError::File { path: file, source }),
        };
        let bundle = self.exports.parse_import(&bytes)?;
        let options = ImportOptions {
          created_by: who.created_by,
          overwrite,
          description: who.description,
        };
        let report = self.exports.import_data(bundle, options, deadline).await?;
        Ok(OperationReport {
          success: report.success,
          ..ok(report.message.clone(), &report.details)?
        })
      }
    }
  }
}

fn ok<T: serde::Serialize>(message: impl Into<String>, details: &T) -> Result<OperationReport> {
  Ok(OperationReport::ok(message, details)?)
}
