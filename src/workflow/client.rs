//! HTTP client for the external workflow engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::models::{AuditApply, AuditCancel};

/// Outbound side of the workflow engine.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start an approval process.
    async fn apply(&self, apply: &AuditApply) -> Result<()>;

    /// Withdraw approval processes that are still running.
    async fn cancel(&self, cancel: &AuditCancel) -> Result<()>;
}

/// Workflow engine reached over its JSON HTTP API.
pub struct HttpWorkflowEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkflowEngine {
    /// # Arguments
    /// * `base_url` - Base URL of the workflow engine (e.g., "http://workflow:8080")
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(base_url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn apply(&self, apply: &AuditApply) -> Result<()> {
        let url = format!("{}/api/v1/audit/apply", self.base_url);
        debug!("Dispatching audit apply {} to {}", apply.apply_id, url);
        self.client
            .post(&url)
            .json(apply)
            .send()
            .await
            .context("Failed to connect to workflow engine")?
            .error_for_status()
            .with_context(|| format!("Workflow engine refused apply {}", apply.apply_id))?;
        Ok(())
    }

    async fn cancel(&self, cancel: &AuditCancel) -> Result<()> {
        let url = format!("{}/api/v1/audit/cancel", self.base_url);
        debug!(
            "Cancelling {} audit application(s) at {}",
            cancel.apply_ids.len(),
            url
        );
        self.client
            .post(&url)
            .json(cancel)
            .send()
            .await
            .context("Failed to connect to workflow engine")?
            .error_for_status()
            .context("Workflow engine refused cancellation")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let engine = HttpWorkflowEngine::new("http://workflow:8080/".to_string(), 5).unwrap();
        assert_eq!(engine.base_url, "http://workflow:8080");
    }
}
