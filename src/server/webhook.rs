//! Workflow engine callbacks.
//!
//! The engine delivers at least once and retries on non-2xx responses, so
//! only storage failures answer 500. Everything else is acknowledged: stale
//! results are no-ops and malformed apply ids will never succeed on retry.

use super::state::{GuardedAuditCoordinator, GuardedDownloadCoordinator, ServerState};
use crate::error::{CatalogError, CatalogResult};
use crate::workflow::{AuditProcDefDelMsg, AuditProcessMsg, AuditResultMsg};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
struct WebhookAck {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl WebhookAck {
    fn ok() -> Self {
        Self {
            status: "ok",
            reason: None,
        }
    }
}

fn acknowledge(apply_id: &str, result: CatalogResult<()>) -> Response {
    match result {
        Ok(()) => Json(WebhookAck::ok()).into_response(),
        Err(CatalogError::Database(e)) => {
            error!("Storage failure handling {}: {:#}", apply_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookAck {
                    status: "error",
                    reason: Some("storage failure".to_string()),
                }),
            )
                .into_response()
        }
        Err(e) => {
            warn!("Ignoring workflow callback for {}: {}", apply_id, e);
            Json(WebhookAck {
                status: "ignored",
                reason: Some(e.to_string()),
            })
            .into_response()
        }
    }
}

async fn catalog_result(
    State(audit): State<GuardedAuditCoordinator>,
    Json(msg): Json<AuditResultMsg>,
) -> Response {
    let result = audit.handle_audit_result(&msg.apply_id, msg.result).await;
    acknowledge(&msg.apply_id, result)
}

async fn catalog_process(
    State(audit): State<GuardedAuditCoordinator>,
    Json(msg): Json<AuditProcessMsg>,
) -> Response {
    audit.handle_audit_process_step(&msg);
    Json(WebhookAck::ok()).into_response()
}

async fn download_result(
    State(downloads): State<GuardedDownloadCoordinator>,
    Json(msg): Json<AuditResultMsg>,
) -> Response {
    let result = downloads
        .on_download_audit_result(&msg.apply_id, msg.result)
        .await;
    acknowledge(&msg.apply_id, result)
}

async fn download_process(
    State(downloads): State<GuardedDownloadCoordinator>,
    Json(msg): Json<AuditProcessMsg>,
) -> Response {
    downloads.on_download_process_step(&msg);
    Json(WebhookAck::ok()).into_response()
}

async fn proc_def_deleted(
    State(audit): State<GuardedAuditCoordinator>,
    Json(msg): Json<AuditProcDefDelMsg>,
) -> Response {
    let result = audit
        .handle_audit_definition_deleted(&msg.proc_def_keys)
        .map(|_| ());
    acknowledge(&msg.proc_def_keys.join(","), result)
}

pub fn make_workflow_routes(state: ServerState) -> Router {
    Router::new()
        .route("/catalog/result", post(catalog_result))
        .route("/catalog/process", post(catalog_process))
        .route("/download/result", post(download_result))
        .route("/download/process", post(download_process))
        .route("/proc-def-deleted", post(proc_def_deleted))
        .with_state(state)
}
