use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub node_id: Option<u16>,
    pub workflow_engine_url: Option<String>,
    pub workflow_timeout_sec: Option<u64>,
    pub webhook_base_url: Option<String>,

    // Feature configs
    pub index: Option<IndexConfig>,
    pub download: Option<DownloadConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Search index base URL. Without it documents go to an in-memory sink.
    pub url: Option<String>,
    pub name: Option<String>,
    pub timeout_sec: Option<u64>,
    pub channel_capacity: Option<usize>,
    pub enqueue_timeout_ms: Option<u64>,
    pub reconcile_interval_secs: Option<u64>,
    pub reconcile_chunk_size: Option<usize>,
    pub reconcile_concurrency: Option<usize>,
    pub reconcile_deadline_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    pub expiry_interval_secs: Option<u64>,
    pub max_requested_days: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
