//! Error type for `checkup-artifacts`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Config(String),

  #[error("object store error: {0}")]
  ObjectStore(#[from] object_store::Error),

  #[error("invalid artifact key {key:?}: {reason}")]
  InvalidKey { key: String, reason: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("signing error: {0}")]
  Signing(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
