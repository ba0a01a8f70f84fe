//! Workflow engine integration: outbound audit applications and
//! cancellations, inbound callback messages.

mod client;
mod models;

pub use client::{HttpWorkflowEngine, WorkflowEngine};
#[cfg(feature = "mock")]
pub use client::MockWorkflowEngine;
pub use models::*;

/// Callback routes the engine is told about when an audit starts.
#[derive(Debug, Clone)]
pub struct WebhookRoutes {
    base_url: String,
}

impl WebhookRoutes {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Webhooks for a callback family (`catalog` or `download`).
    pub fn for_family(&self, family: &str) -> Vec<Webhook> {
        vec![
            Webhook {
                kind: WebhookKind::Result,
                url: format!("{}/v1/workflow/{}/result", self.base_url, family),
            },
            Webhook {
                kind: WebhookKind::Process,
                url: format!("{}/v1/workflow/{}/process", self.base_url, family),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_urls_follow_callback_routes() {
        let routes = WebhookRoutes::new("http://catalog:3001/");
        let hooks = routes.for_family("download");
        assert_eq!(hooks[0].url, "http://catalog:3001/v1/workflow/download/result");
        assert_eq!(hooks[1].kind, WebhookKind::Process);
    }
}
