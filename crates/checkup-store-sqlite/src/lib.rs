//! SQLite backend for the Checkup data-maintenance engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Every component takes an
//! explicit [`DatabaseHandle`]; nothing here holds global state.

mod checksum;
mod encode;
mod lock;

pub mod backup;
pub mod config;
pub mod error;
pub mod export;
pub mod handle;
pub mod introspect;
pub mod migration;
pub mod schema;
pub mod snapshot;

pub use backup::BackupManager;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use export::ExportManager;
pub use handle::DatabaseHandle;
pub use introspect::SchemaIntrospector;
pub use migration::MigrationManager;
pub use snapshot::SnapshotCodec;

#[cfg(test)]
mod tests;
