mod file_config;

pub use file_config::{DownloadConfig, FileConfig, IndexConfig};

use crate::download_grants::DownloadSettings;
use crate::index_sync::{IndexSyncSettings, MAX_RECONCILE_CHUNK};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub node_id: Option<u16>,
    pub workflow_engine_url: Option<String>,
    pub workflow_timeout_sec: u64,
    pub webhook_base_url: Option<String>,
    pub index_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Apply SN node id; random when unset
    pub node_id: Option<u16>,
    pub workflow_engine_url: String,
    pub workflow_timeout_sec: u64,
    /// Base URL the workflow engine calls back on
    pub webhook_base_url: String,

    // Feature configs (with defaults)
    pub index: IndexSettings,
    pub download: DownloadJobSettings,
}

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub url: Option<String>,
    pub name: String,
    pub timeout_sec: u64,
    pub reconcile_interval: Duration,
    pub sync: IndexSyncSettings,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            url: None,
            name: "data-catalog".to_string(),
            timeout_sec: 10,
            reconcile_interval: Duration::from_secs(300),
            sync: IndexSyncSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadJobSettings {
    pub expiry_interval: Duration,
    pub grants: DownloadSettings,
}

impl Default for DownloadJobSettings {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(60),
            grants: DownloadSettings::default(),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port == metrics_port {
            bail!("port and metrics_port must differ (both {})", port);
        }

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let node_id = file.node_id.or(cli.node_id);
        if let Some(node_id) = node_id {
            if node_id > crate::audit::MAX_NODE_ID {
                bail!(
                    "node_id {} out of range (max {})",
                    node_id,
                    crate::audit::MAX_NODE_ID
                );
            }
        }

        let workflow_engine_url = file
            .workflow_engine_url
            .or_else(|| cli.workflow_engine_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "workflow_engine_url must be specified via --workflow-engine-url or in config file"
                )
            })?;
        let workflow_timeout_sec = file
            .workflow_timeout_sec
            .unwrap_or(cli.workflow_timeout_sec);

        let webhook_base_url = file
            .webhook_base_url
            .or_else(|| cli.webhook_base_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        // Index settings - merge file config with defaults
        let index_file = file.index.unwrap_or_default();
        let index_defaults = IndexSettings::default();
        let sync_defaults = index_defaults.sync;
        let index = IndexSettings {
            url: index_file.url.or_else(|| cli.index_url.clone()),
            name: index_file.name.unwrap_or(index_defaults.name),
            timeout_sec: index_file.timeout_sec.unwrap_or(index_defaults.timeout_sec),
            reconcile_interval: index_file
                .reconcile_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(index_defaults.reconcile_interval),
            sync: IndexSyncSettings {
                channel_capacity: index_file
                    .channel_capacity
                    .unwrap_or(sync_defaults.channel_capacity),
                enqueue_timeout: index_file
                    .enqueue_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(sync_defaults.enqueue_timeout),
                reconcile_chunk_size: index_file
                    .reconcile_chunk_size
                    .unwrap_or(sync_defaults.reconcile_chunk_size)
                    .clamp(1, MAX_RECONCILE_CHUNK),
                reconcile_concurrency: index_file
                    .reconcile_concurrency
                    .unwrap_or(sync_defaults.reconcile_concurrency)
                    .max(1),
                reconcile_deadline: index_file
                    .reconcile_deadline_secs
                    .map(Duration::from_secs)
                    .unwrap_or(sync_defaults.reconcile_deadline),
            },
        };

        let download_file = file.download.unwrap_or_default();
        let download_defaults = DownloadJobSettings::default();
        let download = DownloadJobSettings {
            expiry_interval: download_file
                .expiry_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(download_defaults.expiry_interval),
            grants: DownloadSettings {
                max_requested_days: download_file
                    .max_requested_days
                    .unwrap_or(download_defaults.grants.max_requested_days),
            },
        };

        Ok(Self {
            db_dir,
            port,
            metrics_port,
            logging_level,
            node_id,
            workflow_engine_url,
            workflow_timeout_sec,
            webhook_base_url,
            index,
            download,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
