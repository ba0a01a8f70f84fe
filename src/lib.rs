//! Data Catalog Server Library
//!
//! Audit lifecycle, search index synchronization and download grants for a
//! governed data catalog. This library exposes the internal modules for
//! testing and reuse by the server binary.

pub mod audit;
pub mod background_jobs;
pub mod catalog_store;
pub mod config;
pub mod download_grants;
pub mod error;
pub mod fanout;
pub mod index_sync;
pub mod server;
pub mod sqlite_persistence;
pub mod workflow;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use audit::AuditCoordinator;
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use download_grants::DownloadGrantCoordinator;
pub use error::{CatalogError, CatalogResult, ConflictReason};
pub use index_sync::IndexSyncPublisher;
pub use server::{run_server, RequestsLoggingLevel};
