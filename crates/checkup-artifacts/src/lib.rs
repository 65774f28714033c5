//! Object-storage backend for Checkup backup and export artifacts.
//!
//! Wraps the [`object_store`] crate so the same code path serves an
//! in-memory store (tests, development), a local directory, or an
//! S3-compatible bucket.

mod config;
mod signing;
mod store;

pub mod error;

pub use config::{ArtifactConfig, ArtifactProvider};
pub use error::{Error, Result};
pub use signing::UrlSigner;
pub use store::ObjectArtifactStore;
