//! Export and import documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  apply::ApplyResult,
  snapshot::{Row, SnapshotBundle},
};

/// A human/ops-facing dump of every tracked table.
///
/// Shaped like a [`SnapshotBundle`] (`timestamp`, `statistics`, `data`) so it
/// can be fed straight back into an import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
  pub timestamp:   DateTime<Utc>,
  pub created_by:  String,
  pub total_users: usize,
  pub statistics:  BTreeMap<String, usize>,
  pub data:        BTreeMap<String, Vec<Row>>,
}

impl ExportDocument {
  pub fn from_bundle(bundle: SnapshotBundle, created_by: &str) -> Self {
    let total_users = bundle.rows("users").len();
    Self {
      timestamp: bundle.timestamp,
      created_by: created_by.to_owned(),
      total_users,
      statistics: bundle.statistics,
      data: bundle.data,
    }
  }
}

/// A one-off export artifact placed in object storage. Not part of any
/// backup chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportUpload {
  pub storage_key:     String,
  pub timestamp:       DateTime<Utc>,
  pub statistics:      BTreeMap<String, usize>,
  pub checksum:        String,
  pub file_size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
  pub created_by:  String,
  /// Clear the imported tables first instead of merging.
  pub overwrite:   bool,
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
  pub success: bool,
  pub message: String,
  pub details: ApplyResult,
}
