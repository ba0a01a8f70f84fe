use crate::download_grants::DownloadGrantCoordinator;
use crate::index_sync::IndexSyncPublisher;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Contains references to shared components and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    pub index: Arc<IndexSyncPublisher>,

    pub downloads: Arc<DownloadGrantCoordinator>,

    /// Runtime the scheduler was started on, for jobs driving async work
    /// from their blocking thread.
    pub runtime: Handle,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        index: Arc<IndexSyncPublisher>,
        downloads: Arc<DownloadGrantCoordinator>,
        runtime: Handle,
    ) -> Self {
        Self {
            cancellation_token,
            index,
            downloads,
            runtime,
        }
    }

    /// Same context with a different cancellation token.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            ..self.clone()
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
