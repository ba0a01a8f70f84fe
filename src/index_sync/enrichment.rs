//! Loading the related data denormalized into search documents.

use crate::catalog_store::{Catalog, CatalogRelations, CatalogStore};
use crate::error::CatalogResult;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedCatalog {
    pub catalog: Catalog,
    pub relations: CatalogRelations,
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CatalogEnricher: Send + Sync {
    /// Attach relations to each catalog, preserving order.
    async fn enrich(&self, catalogs: Vec<Catalog>) -> CatalogResult<Vec<EnrichedCatalog>>;
}

/// Reads relations from the catalog store's relation tables.
pub struct StoreEnricher {
    store: Arc<dyn CatalogStore>,
}

impl StoreEnricher {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CatalogEnricher for StoreEnricher {
    async fn enrich(&self, catalogs: Vec<Catalog>) -> CatalogResult<Vec<EnrichedCatalog>> {
        let store = self.store.clone();
        let enriched = tokio::task::spawn_blocking(move || {
            catalogs
                .into_iter()
                .map(|catalog| {
                    let relations = store.get_relations(catalog.id)?;
                    Ok(EnrichedCatalog { catalog, relations })
                })
                .collect::<anyhow::Result<Vec<_>>>()
        })
        .await
        .map_err(|e| anyhow::anyhow!("Enrichment task failed: {}", e))??;
        Ok(enriched)
    }
}
