//! Layered configuration: an optional TOML file overlaid by `CHECKUP_*`
//! environment variables.
//!
//! Nested keys use `__`, e.g. `CHECKUP_ENGINE__PAGE_SIZE=200` or
//! `CHECKUP_ARTIFACTS__PROVIDER=s3`.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use checkup_artifacts::ArtifactConfig;
use checkup_store_sqlite::EngineConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  #[serde(default = "default_database_path")]
  pub database_path: PathBuf,
  #[serde(default)]
  pub artifacts:     ArtifactConfig,
  #[serde(default)]
  pub engine:        EngineConfig,
  /// Attach raw error text to failure reports. Never enable in production.
  #[serde(default)]
  pub dev_details:   bool,
}

fn default_database_path() -> PathBuf { PathBuf::from("checkup.db") }

impl AppConfig {
  pub fn load(file: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(
        config::Environment::with_prefix("CHECKUP")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read configuration")?;

    let mut app: Self = settings
      .try_deserialize()
      .context("failed to deserialise configuration")?;
    app.database_path = expand_tilde(&app.database_path);
    if let Some(root) = &app.artifacts.root {
      app.artifacts.root = Some(expand_tilde(root));
    }
    Ok(app)
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
