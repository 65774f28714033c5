//! The `ArtifactStore` trait: durable object storage for backup and export
//! artifacts.
//!
//! Implemented by storage backends (e.g. `checkup-artifacts`). The engine
//! depends on this abstraction, not on any concrete provider.

use std::{future::Future, time::Duration};

/// Opaque blob storage keyed by string.
///
/// All methods return `Send` futures so implementations can be shared across
/// tasks of a multi-threaded runtime.
pub trait ArtifactStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Store `bytes` under `key`, replacing any existing object.
  fn put<'a>(
    &'a self,
    key: &'a str,
    bytes: Vec<u8>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Fetch the object at `key`. Returns `None` if it does not exist.
  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send + 'a;

  /// Remove the object at `key`. Returns `false` if there was nothing to
  /// remove.
  fn delete<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn exists<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Issue a time-limited download URL. Returns `None` if the object does
  /// not exist.
  fn signed_url<'a>(
    &'a self,
    key: &'a str,
    expires_in: Duration,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;
}
