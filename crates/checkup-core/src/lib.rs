//! Core types and trait definitions for the Checkup data-maintenance engine.
//!
//! This crate is deliberately free of database and storage dependencies.
//! It holds the domain model shared by the backup, migration and export
//! components, the pure algebra over snapshot bundles, and the
//! [`artifact::ArtifactStore`] abstraction backends implement.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod apply;
pub mod artifact;
pub mod backup;
pub mod deadline;
pub mod error;
pub mod export;
pub mod migration;
pub mod report;
pub mod snapshot;
pub mod structured;
pub mod table;

pub use deadline::Deadline;
pub use error::{Error, ErrorKind, Result};
