//! Fakes shared by unit tests.

use crate::audit::SnowflakeSnGenerator;
use crate::background_jobs::JobContext;
use crate::catalog_store::CatalogStore;
use crate::download_grants::{DownloadGrantCoordinator, DownloadSettings};
use crate::index_sync::IndexSyncPublisher;
use crate::workflow::{AuditApply, AuditCancel, WebhookRoutes, WorkflowEngine};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Workflow engine that records every outbound call.
#[derive(Default)]
pub struct RecordingEngine {
    pub applies: Mutex<Vec<AuditApply>>,
    pub cancels: Mutex<Vec<AuditCancel>>,
}

#[async_trait]
impl WorkflowEngine for RecordingEngine {
    async fn apply(&self, apply: &AuditApply) -> Result<()> {
        self.applies.lock().unwrap().push(apply.clone());
        Ok(())
    }

    async fn cancel(&self, cancel: &AuditCancel) -> Result<()> {
        self.cancels.lock().unwrap().push(cancel.clone());
        Ok(())
    }
}

pub fn job_context(
    store: Arc<dyn CatalogStore>,
    index: Arc<IndexSyncPublisher>,
    runtime: Handle,
) -> JobContext {
    let downloads = Arc::new(DownloadGrantCoordinator::new(
        store,
        Arc::new(RecordingEngine::default()),
        Arc::new(SnowflakeSnGenerator::new(0)),
        WebhookRoutes::new("http://localhost:3001"),
        DownloadSettings::default(),
    ));
    JobContext::new(CancellationToken::new(), index, downloads, runtime)
}
