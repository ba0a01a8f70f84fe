//! Destinations index messages are delivered to.

use super::models::{IndexMessage, IndexMessageType};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Apply one message to the index. Must be idempotent per
    /// `(doc_id, version)`.
    async fn deliver(&self, message: &IndexMessage) -> Result<()>;
}

/// Elasticsearch-compatible document API with external versioning, so a
/// replayed older version never overwrites a newer document.
pub struct HttpIndexSink {
    client: reqwest::Client,
    base_url: String,
    index_name: String,
}

impl HttpIndexSink {
    pub fn new(base_url: String, index_name: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name,
        })
    }

    fn doc_url(&self, doc_id: &str) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.base_url,
            self.index_name,
            urlencoding::encode(doc_id)
        )
    }
}

#[async_trait]
impl IndexSink for HttpIndexSink {
    async fn deliver(&self, message: &IndexMessage) -> Result<()> {
        let url = self.doc_url(&message.doc_id);
        let version = message.version.to_string();
        let query = [("version", version.as_str()), ("version_type", "external_gte")];

        let request = match message.msg_type {
            IndexMessageType::Create | IndexMessageType::Update => {
                self.client.put(&url).query(&query).json(&message.body)
            }
            IndexMessageType::Delete => self.client.delete(&url).query(&query),
        };
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach search index for {}", message.doc_id))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Document already holds a newer version
            StatusCode::CONFLICT => Ok(()),
            StatusCode::NOT_FOUND if message.msg_type == IndexMessageType::Delete => Ok(()),
            status => bail!(
                "Search index rejected {} {}: status {}",
                message.msg_type.as_str(),
                message.doc_id,
                status
            ),
        }
    }
}

/// A stored document of [`MemoryIndexSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub version: i64,
    pub body: serde_json::Value,
}

#[derive(Default)]
struct MemoryIndex {
    docs: HashMap<String, IndexedDocument>,
    /// Version of the latest delete per doc id
    tombstones: HashMap<String, i64>,
}

impl MemoryIndex {
    fn is_stale(&self, message: &IndexMessage) -> bool {
        let newer_doc = self
            .docs
            .get(&message.doc_id)
            .is_some_and(|doc| doc.version > message.version);
        let newer_delete = self
            .tombstones
            .get(&message.doc_id)
            .is_some_and(|&deleted| match message.msg_type {
                IndexMessageType::Delete => deleted > message.version,
                _ => deleted >= message.version,
            });
        newer_doc || newer_delete
    }
}

/// In-process index used by tests and local runs without a search service.
#[derive(Default)]
pub struct MemoryIndexSink {
    index: Mutex<MemoryIndex>,
    deliveries: AtomicUsize,
    failures_left: AtomicUsize,
}

impl MemoryIndexSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` deliveries fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn get(&self, doc_id: &str) -> Option<IndexedDocument> {
        self.index.lock().ok()?.docs.get(doc_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.lock().map(|index| index.docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IndexSink for MemoryIndexSink {
    async fn deliver(&self, message: &IndexMessage) -> Result<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("Injected delivery failure for {}", message.doc_id);
        }

        let mut index = self
            .index
            .lock()
            .map_err(|_| anyhow::anyhow!("Index mutex poisoned"))?;
        if index.is_stale(message) {
            return Ok(());
        }
        match message.msg_type {
            IndexMessageType::Create | IndexMessageType::Update => {
                index.tombstones.remove(&message.doc_id);
                index.docs.insert(
                    message.doc_id.clone(),
                    IndexedDocument {
                        version: message.version,
                        body: message.body.clone(),
                    },
                );
            }
            IndexMessageType::Delete => {
                index.docs.remove(&message.doc_id);
                index
                    .tombstones
                    .insert(message.doc_id.clone(), message.version);
            }
        }
        Ok(())
    }
}
