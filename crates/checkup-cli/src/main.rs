//! `checkup`: operator CLI for the Checkup backup, migration and export
//! engine.
//!
//! Every subcommand prints one JSON report (`{success, message, details}`)
//! on stdout and exits non-zero when `success` is false. Logs go to stderr.
//!
//! ```text
//! checkup --config /etc/checkup.toml migrate
//! checkup backup full --by ops@example.com --description nightly
//! checkup restore 6f1c… --target /tmp/scratch.db
//! ```

mod commands;
mod settings;

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use anyhow::Context as _;
use checkup_artifacts::{ArtifactProvider, ObjectArtifactStore};
use checkup_core::{Deadline, report::OperationReport};
use checkup_store_sqlite::DatabaseHandle;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{
  commands::{Command, Engine, RunError},
  settings::AppConfig,
};

#[derive(Parser, Debug)]
#[command(name = "checkup", version, about = "Backups, schema migrations and exports")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "checkup.toml")]
  config: PathBuf,

  /// Override the configured per-operation time budget.
  #[arg(long, value_name = "SECS")]
  deadline_secs: Option<u64>,

  /// Include raw error text in failure reports.
  #[arg(long, env = "CHECKUP_DEV_DETAILS")]
  dev_details: bool,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let app = AppConfig::load(&cli.config)?;

  let db = DatabaseHandle::open(&app.database_path)
    .await
    .with_context(|| format!("failed to open database at {:?}", app.database_path))?;
  let artifacts = Arc::new(
    ObjectArtifactStore::from_config(&app.artifacts).context("failed to configure artifacts")?,
  );

  let deadline = match cli.deadline_secs {
    Some(secs) => Deadline::after(Duration::from_secs(secs)),
    None => app.engine.deadline(),
  };
  let dev_details = cli.dev_details || app.dev_details;

  let result = if app.artifacts.provider == ArtifactProvider::Memory
    && cli.command.needs_durable_artifacts()
  {
    Err(RunError::EphemeralArtifacts)
  } else {
    Engine::new(db.clone(), artifacts, &app.engine)
      .run(cli.command, deadline)
      .await
  };
  let report = match result {
    Ok(report) => report,
    Err(e) => {
      tracing::error!(kind = ?e.kind(), error = %e, "operation failed");
      OperationReport::failure(e.kind(), &e, dev_details)
    }
  };

  println!("{}", serde_json::to_string_pretty(&report)?);
  db.close().await.context("failed to close database")?;

  Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
