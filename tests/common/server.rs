//! Test server lifecycle management
//!
//! Each test gets an isolated server: its own on-disk catalog database, a
//! recording workflow engine and an in-memory search index, with the
//! delivery worker and ack consumer running as in production.

use super::constants::*;
use super::fixtures::{bind_audit_flows, RecordingEngine};
use data_catalog_server::audit::{AuditCoordinator, SnowflakeSnGenerator};
use data_catalog_server::catalog_store::SqliteCatalogStore;
use data_catalog_server::download_grants::{DownloadGrantCoordinator, DownloadSettings};
use data_catalog_server::index_sync::{
    IndexDeliveryWorker, IndexSyncPublisher, IndexSyncSettings, MemoryIndexSink, StoreEnricher,
};
use data_catalog_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use data_catalog_server::workflow::WebhookRoutes;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Test server instance with isolated database and fakes.
///
/// When dropped, the server and its background tasks shut down and temp
/// resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    pub store: Arc<SqliteCatalogStore>,
    pub engine: Arc<RecordingEngine>,
    pub sink: Arc<MemoryIndexSink>,
    pub audit: Arc<AuditCoordinator>,
    pub downloads: Arc<DownloadGrantCoordinator>,
    pub index: Arc<IndexSyncPublisher>,

    /// On-disk database file, for tests that need to age rows directly
    pub db_path: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port with every audit type bound.
    ///
    /// # Panics
    ///
    /// Panics if the database, the port binding or the server fail, or the
    /// server doesn't become ready within timeout.
    pub async fn spawn() -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_db_dir.path().join("catalog.db");
        let store = Arc::new(
            SqliteCatalogStore::new(&db_path)
                .expect("Failed to open catalog store"),
        );
        bind_audit_flows(store.as_ref()).expect("Failed to bind audit flows");

        let engine = Arc::new(RecordingEngine::default());
        let sink = Arc::new(MemoryIndexSink::new());
        let sn = Arc::new(SnowflakeSnGenerator::new(1));
        let shutdown = CancellationToken::new();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);
        let webhooks = WebhookRoutes::new(&base_url);

        let settings = IndexSyncSettings {
            enqueue_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let enricher = Arc::new(StoreEnricher::new(store.clone()));
        let (index, outbox) = IndexSyncPublisher::new(store.clone(), enricher, settings);
        let index = Arc::new(index);
        let (ack_tx, ack_rx) = mpsc::channel(64);
        tokio::spawn(IndexDeliveryWorker::new(sink.clone(), outbox, ack_tx).run(shutdown.clone()));
        tokio::spawn(index.clone().run_ack_consumer(ack_rx, shutdown.clone()));

        let downloads = Arc::new(DownloadGrantCoordinator::new(
            store.clone(),
            engine.clone(),
            sn.clone(),
            webhooks.clone(),
            DownloadSettings::default(),
        ));
        let audit = Arc::new(AuditCoordinator::new(
            store.clone(),
            engine.clone(),
            sn,
            index.clone(),
            downloads.clone(),
            webhooks,
        ));

        let config = ServerConfig {
            port,
            metrics_port: 0,
            requests_logging_level: RequestsLoggingLevel::None,
        };
        let state = ServerState::new(config, audit.clone(), downloads.clone(), "test".to_string());
        let app = make_app(state);

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            store,
            engine,
            sink,
            audit,
            downloads,
            index,
            db_path,
            _temp_db_dir: temp_db_dir,
            shutdown,
        };
        server.wait_for_ready().await;
        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
