//! Outbox-style synchronization of catalogs into the search index.

mod enrichment;
mod models;
mod publisher;
mod sink;
mod worker;

#[cfg(feature = "mock")]
pub use enrichment::MockCatalogEnricher;
pub use enrichment::{CatalogEnricher, EnrichedCatalog, StoreEnricher};
pub use models::*;
pub use publisher::{
    build_message, build_message_as, IndexSyncPublisher, IndexSyncSettings, MAX_RECONCILE_CHUNK,
};
#[cfg(feature = "mock")]
pub use sink::MockIndexSink;
pub use sink::{HttpIndexSink, IndexSink, IndexedDocument, MemoryIndexSink};
pub use worker::IndexDeliveryWorker;
