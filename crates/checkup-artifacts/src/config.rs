//! Artifact storage configuration, deserialised from the `[artifacts]` table
//! of the application config.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactProvider {
  /// Process-local, lost on exit.
  #[default]
  Memory,
  /// A directory on the local filesystem.
  Local,
  /// Amazon S3 or an S3-compatible service.
  S3,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
  pub provider:          ArtifactProvider,
  /// Root directory for the `local` provider.
  pub root:              Option<PathBuf>,
  pub bucket:            Option<String>,
  pub region:            Option<String>,
  /// Custom endpoint URL for S3-compatible stores.
  pub endpoint:          Option<String>,
  pub access_key_id:     Option<String>,
  pub secret_access_key: Option<String>,
  /// Prepended to every key, e.g. `"production/"`.
  pub prefix:            Option<String>,
  /// Base of download URLs for providers without native presigning.
  pub public_base_url:   Option<String>,
  /// HMAC key for download URLs for providers without native presigning.
  pub signing_secret:    Option<String>,
}
