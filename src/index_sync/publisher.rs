//! Outbox side of index synchronization.
//!
//! Catalog mutations become [`IndexMessage`]s on a bounded channel drained by
//! the delivery worker. A catalog stays `is_indexed = 0` until the ack for
//! the exact version it was published at comes back, so lost messages are
//! found again by [`IndexSyncPublisher::reconcile_unindexed`].

use super::enrichment::{CatalogEnricher, EnrichedCatalog};
use super::models::*;
use crate::catalog_store::{Catalog, CatalogChanges, CatalogGuard, CatalogRelations, CatalogState, CatalogStore};
use crate::error::{CatalogError, CatalogResult};
use crate::fanout::BoundedFanout;
use crate::server::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct IndexSyncSettings {
    pub channel_capacity: usize,
    pub enqueue_timeout: Duration,
    /// Catalogs per enrichment chunk, capped at 100
    pub reconcile_chunk_size: usize,
    pub reconcile_concurrency: usize,
    pub reconcile_deadline: Duration,
}

impl Default for IndexSyncSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            enqueue_timeout: Duration::from_secs(5),
            reconcile_chunk_size: MAX_RECONCILE_CHUNK,
            reconcile_concurrency: 4,
            reconcile_deadline: Duration::from_secs(60),
        }
    }
}

pub const MAX_RECONCILE_CHUNK: usize = 100;

fn is_live(catalog: &Catalog) -> bool {
    catalog.state == CatalogState::Online && catalog.current_version
}

/// Build the index message for the current state of `catalog`.
///
/// Online catalogs produce a `create` (never acknowledged) or `update`
/// carrying the denormalized document; anything else produces a `delete`
/// tombstone.
pub fn build_message(catalog: &Catalog, relations: &CatalogRelations) -> IndexMessage {
    let msg_type = if !is_live(catalog) {
        IndexMessageType::Delete
    } else if catalog.is_indexed {
        IndexMessageType::Update
    } else {
        IndexMessageType::Create
    };
    build_message_as(catalog, relations, msg_type)
}

/// Build a message of a type the caller already knows. A catalog that is not
/// online always produces a tombstone.
pub fn build_message_as(
    catalog: &Catalog,
    relations: &CatalogRelations,
    msg_type: IndexMessageType,
) -> IndexMessage {
    let doc_id = encode_doc_id(&catalog.code);

    let (msg_type, body) = if msg_type == IndexMessageType::Delete || !is_live(catalog) {
        let tombstone = Tombstone {
            doc_id: doc_id.clone(),
            code: catalog.code.clone(),
            id: catalog.id,
        };
        (
            IndexMessageType::Delete,
            serde_json::to_value(tombstone).unwrap_or_default(),
        )
    } else {
        let document = CatalogDocument::new(catalog, relations);
        (msg_type, serde_json::to_value(document).unwrap_or_default())
    };

    IndexMessage {
        msg_type,
        doc_id,
        catalog_id: catalog.id,
        version: catalog.updated_at,
        body,
    }
}

pub struct IndexSyncPublisher {
    store: Arc<dyn CatalogStore>,
    enricher: Arc<dyn CatalogEnricher>,
    sender: mpsc::Sender<IndexMessage>,
    settings: IndexSyncSettings,
    fanout: BoundedFanout,
}

impl IndexSyncPublisher {
    /// Returns the publisher and the receiving end of its outbox channel,
    /// which the delivery worker consumes.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        enricher: Arc<dyn CatalogEnricher>,
        settings: IndexSyncSettings,
    ) -> (Self, mpsc::Receiver<IndexMessage>) {
        let (sender, receiver) = mpsc::channel(settings.channel_capacity.max(1));
        let fanout = BoundedFanout::new(settings.reconcile_concurrency, settings.reconcile_deadline);
        (
            Self {
                store,
                enricher,
                sender,
                settings,
                fanout,
            },
            receiver,
        )
    }

    /// Enqueue the message for `catalog`, waiting at most the configured
    /// enqueue timeout for channel capacity.
    pub async fn publish(
        &self,
        catalog: &Catalog,
        enrichment: &CatalogRelations,
    ) -> CatalogResult<()> {
        self.enqueue(build_message(catalog, enrichment)).await
    }

    /// Enrich `catalog` through the configured enricher, then publish it.
    /// Tombstones need no enrichment.
    pub async fn publish_catalog(&self, catalog: &Catalog) -> CatalogResult<()> {
        let relations = self.relations_for(catalog).await?;
        self.enqueue(build_message(catalog, &relations)).await
    }

    /// Like [`Self::publish_catalog`], for callers that know whether the
    /// document already exists downstream while its latest version is still
    /// unacknowledged.
    pub async fn publish_catalog_as(
        &self,
        catalog: &Catalog,
        msg_type: IndexMessageType,
    ) -> CatalogResult<()> {
        let relations = self.relations_for(catalog).await?;
        self.enqueue(build_message_as(catalog, &relations, msg_type))
            .await
    }

    async fn relations_for(&self, catalog: &Catalog) -> CatalogResult<CatalogRelations> {
        if !is_live(catalog) {
            return Ok(CatalogRelations::default());
        }
        let enriched = self.enricher.enrich(vec![catalog.clone()]).await?;
        Ok(enriched
            .into_iter()
            .next()
            .map(|e| e.relations)
            .unwrap_or_default())
    }

    async fn enqueue(&self, message: IndexMessage) -> CatalogResult<()> {
        let msg_type = message.msg_type.as_str();
        let doc_id = message.doc_id.clone();

        match self
            .sender
            .send_timeout(message, self.settings.enqueue_timeout)
            .await
        {
            Ok(()) => {
                metrics::record_index_message(msg_type, "enqueued");
                debug!("Enqueued index {} for {}", msg_type, doc_id);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                metrics::record_index_message(msg_type, "timeout");
                warn!("Index channel full, dropped {} for {}", msg_type, doc_id);
                Err(CatalogError::Timeout(self.settings.enqueue_timeout))
            }
            Err(SendTimeoutError::Closed(_)) => {
                metrics::record_index_message(msg_type, "closed");
                Err(CatalogError::Upstream("index channel closed".to_string()))
            }
        }
    }

    /// Mark the catalog indexed if the acked message carries its current
    /// version. Returns whether the flag was set.
    pub fn on_produce_ack(&self, ack: &ProduceAck) -> CatalogResult<bool> {
        let message = &ack.message;
        if let Some(err) = &ack.error {
            metrics::record_index_ack("failed");
            warn!(
                "Index delivery of {} v{} failed: {}",
                message.doc_id, message.version, err
            );
            return Ok(false);
        }

        let mut guard = CatalogGuard::new(message.catalog_id).version(message.version);
        // Tombstones of deleted catalogs are acked against the retired row
        guard.current_only = false;
        let changes = CatalogChanges {
            is_indexed: Some(true),
            ..Default::default()
        };

        let applied = self.store.update_catalog(&guard, &changes)?;
        if applied {
            metrics::record_index_ack("indexed");
            debug!("Catalog {} indexed at v{}", message.catalog_id, message.version);
        } else {
            metrics::record_index_ack("stale");
            debug!(
                "Ignoring stale ack for catalog {} v{}",
                message.catalog_id, message.version
            );
        }
        Ok(applied)
    }

    /// Consume delivery acks until cancelled or the channel closes.
    pub async fn run_ack_consumer(
        self: Arc<Self>,
        mut acks: mpsc::Receiver<ProduceAck>,
        shutdown: CancellationToken,
    ) {
        info!("Index ack consumer started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Index ack consumer shutting down");
                    break;
                }
                ack = acks.recv() => {
                    let Some(ack) = ack else {
                        info!("Index ack channel closed");
                        break;
                    };
                    if let Err(e) = self.on_produce_ack(&ack) {
                        error!("Failed to record index ack for {}: {}", ack.message.doc_id, e);
                    }
                }
            }
        }
    }

    /// Republish every current catalog that has a mounted resource but was
    /// never confirmed indexed.
    pub async fn reconcile_unindexed(&self) -> CatalogResult<ReconcileReport> {
        let candidates = self.store.list_unindexed_catalogs()?;
        let mut report = ReconcileReport {
            found: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            return Ok(report);
        }

        let chunk_size = self.settings.reconcile_chunk_size.clamp(1, MAX_RECONCILE_CHUNK);
        let enricher = self.enricher.clone();
        let enriched: Vec<EnrichedCatalog> = self
            .fanout
            .run(candidates, chunk_size, move |chunk| {
                let enricher = enricher.clone();
                async move { enricher.enrich(chunk).await }
            })
            .await?;

        for EnrichedCatalog { catalog, relations } in &enriched {
            match self.publish(catalog, relations).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Reconcile could not republish {}: {}", catalog.code, e);
                }
            }
        }

        metrics::record_reconcile(report.found, report.published, report.failed);
        info!(
            "Index reconcile: found {}, published {}, failed {}",
            report.found, report.published, report.failed
        );
        Ok(report)
    }
}
