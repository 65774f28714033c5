//! Engine tuning, deserialised from the `[engine]` table of the application
//! config.

use std::time::Duration;

use checkup_core::Deadline;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Rows read per `SELECT` while capturing a snapshot.
  pub page_size:     usize,
  /// Rows written between deadline checks while applying a snapshot.
  pub chunk_size:    usize,
  /// Age after which a migration guard is considered abandoned.
  pub lock_ttl_secs: u64,
  /// Default budget for one operation.
  pub deadline_secs: u64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      page_size:     500,
      chunk_size:    500,
      lock_ttl_secs: 900,
      deadline_secs: 300,
    }
  }
}

impl EngineConfig {
  pub fn lock_ttl(&self) -> Duration { Duration::from_secs(self.lock_ttl_secs) }

  /// A fresh deadline `deadline_secs` from now.
  pub fn deadline(&self) -> Deadline {
    Deadline::after(Duration::from_secs(self.deadline_secs))
  }

  pub(crate) fn page_size(&self) -> usize { self.page_size.max(1) }

  pub(crate) fn chunk_size(&self) -> usize { self.chunk_size.max(1) }
}
