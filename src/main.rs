use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use data_catalog_server::audit::{ApplySnGenerator, AuditCoordinator, SnowflakeSnGenerator};
use data_catalog_server::background_jobs::jobs::{GrantExpiryJob, IndexReconcileJob};
use data_catalog_server::background_jobs::{JobContext, JobScheduler};
use data_catalog_server::catalog_store::{CatalogStore, SqliteCatalogStore};
use data_catalog_server::config::{AppConfig, CliConfig, FileConfig};
use data_catalog_server::download_grants::DownloadGrantCoordinator;
use data_catalog_server::index_sync::{
    HttpIndexSink, IndexDeliveryWorker, IndexSink, IndexSyncPublisher, MemoryIndexSink,
    StoreEnricher,
};
use data_catalog_server::server::{
    metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState,
};
use data_catalog_server::workflow::{HttpWorkflowEngine, WebhookRoutes, WorkflowEngine};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the SQLite databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on for workflow webhooks.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Node id partitioning apply serial numbers. Random when omitted.
    #[clap(long)]
    pub node_id: Option<u16>,

    /// Base URL of the workflow engine.
    #[clap(long)]
    pub workflow_engine_url: Option<String>,

    /// Timeout in seconds for workflow engine requests.
    #[clap(long, default_value_t = 10)]
    pub workflow_timeout_sec: u64,

    /// Public base URL the workflow engine calls back on.
    #[clap(long)]
    pub webhook_base_url: Option<String>,

    /// Base URL of the search index. Documents stay in memory when omitted.
    #[clap(long)]
    pub index_url: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            node_id: self.node_id,
            workflow_engine_url: self.workflow_engine_url.clone(),
            workflow_timeout_sec: self.workflow_timeout_sec,
            webhook_base_url: self.webhook_base_url.clone(),
            index_url: self.index_url.clone(),
        }
    }
}

async fn wait_for_shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    let hash = env!("GIT_HASH").to_string();
    info!("Starting data catalog server ({})", hash);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let db_path = config.catalog_db_path();
    info!("Opening SQLite catalog database at {:?}...", db_path);
    let store: Arc<dyn CatalogStore> = Arc::new(SqliteCatalogStore::new(&db_path)?);

    let sn_generator: Arc<dyn ApplySnGenerator> = Arc::new(match config.node_id {
        Some(node_id) => SnowflakeSnGenerator::new(node_id),
        None => SnowflakeSnGenerator::with_random_node(),
    });

    info!("Workflow engine at {}", config.workflow_engine_url);
    let engine: Arc<dyn WorkflowEngine> = Arc::new(HttpWorkflowEngine::new(
        config.workflow_engine_url.clone(),
        config.workflow_timeout_sec,
    )?);
    let webhooks = WebhookRoutes::new(&config.webhook_base_url);

    let sink: Arc<dyn IndexSink> = match &config.index.url {
        Some(url) => {
            info!("Search index at {} ({})", url, config.index.name);
            Arc::new(HttpIndexSink::new(
                url.clone(),
                config.index.name.clone(),
                config.index.timeout_sec,
            )?)
        }
        None => {
            info!("No search index configured, keeping documents in memory");
            Arc::new(MemoryIndexSink::new())
        }
    };

    let shutdown = CancellationToken::new();

    let enricher = Arc::new(StoreEnricher::new(store.clone()));
    let (publisher, outbox) =
        IndexSyncPublisher::new(store.clone(), enricher, config.index.sync.clone());
    let publisher = Arc::new(publisher);
    let (ack_tx, ack_rx) = mpsc::channel(config.index.sync.channel_capacity.max(1));

    let worker_handle =
        tokio::spawn(IndexDeliveryWorker::new(sink, outbox, ack_tx).run(shutdown.clone()));
    let ack_handle = tokio::spawn(publisher.clone().run_ack_consumer(ack_rx, shutdown.clone()));

    let downloads = Arc::new(DownloadGrantCoordinator::new(
        store.clone(),
        engine.clone(),
        sn_generator.clone(),
        webhooks.clone(),
        config.download.grants.clone(),
    ));
    let audit = Arc::new(AuditCoordinator::new(
        store,
        engine,
        sn_generator,
        publisher.clone(),
        downloads.clone(),
        webhooks,
    ));

    let job_context = JobContext::new(
        shutdown.child_token(),
        publisher,
        downloads.clone(),
        tokio::runtime::Handle::current(),
    );
    let mut scheduler = JobScheduler::new(shutdown.clone(), job_context);
    scheduler
        .register_job(Arc::new(IndexReconcileJob::new(config.index.reconcile_interval)))
        .await;
    scheduler
        .register_job(Arc::new(GrantExpiryJob::new(config.download.expiry_interval)))
        .await;
    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    tokio::spawn(wait_for_shutdown_signal(shutdown.clone()));

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
    };
    let state = ServerState::new(server_config, audit, downloads, hash);
    let served = run_server(state, shutdown.clone()).await;
    // A bind failure must still stop the background tasks
    shutdown.cancel();

    let tasks = [
        ("index delivery worker", worker_handle),
        ("index ack consumer", ack_handle),
        ("job scheduler", scheduler_handle),
    ];
    for (name, handle) in tasks {
        if let Err(e) = handle.await {
            error!("{} terminated abnormally: {}", name, e);
        }
    }
    info!("Shutdown complete");
    served
}
