use crate::audit::{decode_apply_id, encode_apply_id, ApplySnGenerator};
use crate::catalog_store::{
    now_millis, ApplicationState, CatalogChanges, CatalogGuard, CatalogState, CatalogStore,
    DownloadApplication, DownloadGrant, NewDownloadApplication,
};
use crate::error::{CatalogError, CatalogResult, ConflictReason};
use crate::server::metrics;
use crate::workflow::{
    AbstractInfo, AuditApply, AuditCancel, AuditProcessMsg, AuditResult, WebhookRoutes,
    WorkflowEngine,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Audit type download applications are bound under.
pub const DOWNLOAD_AUDIT_TYPE: &str = "af-data-catalog-download";

/// Reason sent with cancellations of applications for a withdrawn catalog.
pub const CATALOG_WITHDRAWN_REASON: &str = "catalog withdrawn";

const DAY_MS: i64 = 86_400_000;

/// Whether a user may download a catalog's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    Authorized,
    UnderReview,
    Unauthorized,
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub max_requested_days: u32,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_requested_days: 365,
        }
    }
}

pub struct DownloadGrantCoordinator {
    store: Arc<dyn CatalogStore>,
    engine: Arc<dyn WorkflowEngine>,
    sn_generator: Arc<dyn ApplySnGenerator>,
    webhooks: WebhookRoutes,
    settings: DownloadSettings,
}

impl DownloadGrantCoordinator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        engine: Arc<dyn WorkflowEngine>,
        sn_generator: Arc<dyn ApplySnGenerator>,
        webhooks: WebhookRoutes,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            store,
            engine,
            sn_generator,
            webhooks,
            settings,
        }
    }

    /// Request download access to an online catalog and start its audit.
    pub async fn apply_download(
        &self,
        user_id: &str,
        code: &str,
        requested_days: u32,
    ) -> CatalogResult<DownloadApplication> {
        if requested_days == 0 || requested_days > self.settings.max_requested_days {
            return Err(CatalogError::Conflict(ConflictReason::NotAllowed));
        }
        let catalog = self
            .store
            .get_catalog_by_code(code)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog {}", code)))?;
        if catalog.state != CatalogState::Online {
            return Err(CatalogError::Conflict(ConflictReason::NotAllowed));
        }
        let binding = self
            .store
            .get_audit_flow_binding(DOWNLOAD_AUDIT_TYPE)?
            .ok_or_else(|| {
                CatalogError::NotFound(format!("audit flow binding {}", DOWNLOAD_AUDIT_TYPE))
            })?;

        let application = self.record_application(&NewDownloadApplication {
            apply_sn: self.sn_generator.next_sn(),
            code: code.to_string(),
            user_id: user_id.to_string(),
            requested_days,
            proc_def_key: Some(binding.proc_def_key.clone()),
        })?;
        metrics::record_download_application("applied");
        info!(
            "Download application {} by {} for {} ({} days)",
            application.id, user_id, code, requested_days
        );

        let apply = AuditApply {
            apply_id: encode_apply_id(application.id, application.apply_sn),
            audit_type: DOWNLOAD_AUDIT_TYPE.to_string(),
            user_id: user_id.to_string(),
            process_def_key: binding.proc_def_key,
            abstract_info: AbstractInfo {
                title: format!("Download {}", catalog.title),
                lines: vec![
                    format!("code: {}", code),
                    format!("days: {}", requested_days),
                ],
            },
            webhooks: self.webhooks.for_family("download"),
        };
        if let Err(e) = self.engine.apply(&apply).await {
            error!(
                "Failed to dispatch download audit {}: {:#}",
                apply.apply_id, e
            );
            return Err(CatalogError::Upstream(e.to_string()));
        }
        Ok(application)
    }

    fn record_application(
        &self,
        application: &NewDownloadApplication,
    ) -> CatalogResult<DownloadApplication> {
        let tx = self.store.begin()?;
        if tx
            .find_pending_application(&application.user_id, &application.code)?
            .is_some()
            || tx
                .find_active_grant(&application.user_id, &application.code, now_millis())?
                .is_some()
        {
            return Err(CatalogError::Conflict(ConflictReason::Duplicate));
        }
        let created = tx.create_download_application(application)?;
        tx.commit()?;
        Ok(created)
    }

    /// Settle a download audit. On pass the grant is created in the same
    /// transaction as the application update; replays are no-ops.
    pub async fn on_download_audit_result(
        &self,
        apply_id: &str,
        result: AuditResult,
    ) -> CatalogResult<()> {
        let (id, apply_sn) = decode_apply_id(apply_id)?;

        match self.settle_application(id, apply_sn, result)? {
            Some((application, grant)) => {
                metrics::record_download_application(result.as_str());
                match grant {
                    Some(grant) => info!(
                        "Granted {} download of {} until {}",
                        application.user_id, application.code, grant.expires_at
                    ),
                    None => info!(
                        "Download application {} settled as {}",
                        application.id,
                        result.as_str()
                    ),
                }
            }
            None => debug!("Ignoring replayed download result for {}", apply_id),
        }
        Ok(())
    }

    fn settle_application(
        &self,
        id: u64,
        apply_sn: u64,
        result: AuditResult,
    ) -> CatalogResult<Option<(DownloadApplication, Option<DownloadGrant>)>> {
        let tx = self.store.begin()?;
        let application = tx
            .get_download_application(id)?
            .ok_or_else(|| CatalogError::NotFound(format!("download application {}", id)))?;
        if application.apply_sn != apply_sn || application.state != ApplicationState::UnderReview
        {
            return Ok(None);
        }

        let to = match result {
            AuditResult::Pass => ApplicationState::Pass,
            AuditResult::Reject => ApplicationState::Reject,
            AuditResult::Undone => ApplicationState::Undone,
        };
        if !tx.transition_application(id, apply_sn, to, None)? {
            return Ok(None);
        }

        let grant = if to == ApplicationState::Pass {
            let expires_at = now_millis() + application.requested_days as i64 * DAY_MS;
            Some(tx.insert_download_grant(&application, expires_at)?)
        } else {
            None
        };
        tx.commit()?;
        Ok(Some((application, grant)))
    }

    /// Node-level progress of a download audit. Only rejections matter here.
    pub fn on_download_process_step(&self, msg: &AuditProcessMsg) {
        if !msg.is_node_rejection() {
            debug!("Download audit {} advanced", msg.apply_id);
            return;
        }
        let (id, apply_sn) = match decode_apply_id(&msg.apply_id) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping download process step: {}", e);
                return;
            }
        };
        match self.store.transition_application(
            id,
            apply_sn,
            ApplicationState::Reject,
            msg.process_input.audit_idea.as_deref(),
        ) {
            Ok(true) => {
                metrics::record_download_application("reject");
                info!("Download application {} rejected at node", id);
            }
            Ok(false) => debug!("Download application {} already settled", id),
            Err(e) => error!("Failed to reject download application {}: {:#}", id, e),
        }
    }

    /// Owner shortcut, then an active unexpired grant, then a pending
    /// application.
    pub fn check_access(&self, user_id: &str, code: &str) -> CatalogResult<AccessStatus> {
        let catalog = self
            .store
            .get_catalog_by_code(code)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog {}", code)))?;
        if catalog.owner_id == user_id {
            return Ok(AccessStatus::Authorized);
        }
        if self
            .store
            .find_active_grant(user_id, code, now_millis())?
            .is_some()
        {
            return Ok(AccessStatus::Authorized);
        }
        if self.store.find_pending_application(user_id, code)?.is_some() {
            return Ok(AccessStatus::UnderReview);
        }
        Ok(AccessStatus::Unauthorized)
    }

    /// Deactivate expired grants. Idempotent.
    pub fn expire_sweep(&self) -> CatalogResult<usize> {
        let expired = self.store.expire_grants(now_millis())?;
        if expired > 0 {
            metrics::record_grants_expired(expired);
            info!("Expired {} download grant(s)", expired);
        }
        Ok(expired)
    }

    /// Cancel every under-review application for `code` at the workflow
    /// engine and settle them locally as `undone`, then flag the catalog as
    /// cancelled (at most once per withdrawal). Returns the number of
    /// applications cancelled.
    pub async fn cancel_in_flight_applications(&self, code: &str) -> CatalogResult<usize> {
        let pending = self.store.list_pending_applications(code)?;
        if !pending.is_empty() {
            let cancel = AuditCancel {
                apply_ids: pending
                    .iter()
                    .map(|a| encode_apply_id(a.id, a.apply_sn))
                    .collect(),
                reason: CATALOG_WITHDRAWN_REASON.to_string(),
            };
            self.engine.cancel(&cancel).await.map_err(|e| {
                error!("Failed to cancel download audits for {}: {:#}", code, e);
                CatalogError::Upstream(e.to_string())
            })?;

            let mut withdrawn = 0;
            for application in &pending {
                // A result that settled the application first wins
                if self.store.transition_application(
                    application.id,
                    application.apply_sn,
                    ApplicationState::Undone,
                    Some(CATALOG_WITHDRAWN_REASON),
                )? {
                    withdrawn += 1;
                }
            }
            metrics::record_download_application("withdrawn");
            info!(
                "Cancelled {} download application(s) for {}, {} withdrawn locally",
                pending.len(),
                code,
                withdrawn
            );
        }

        if let Some(catalog) = self.store.get_catalog_by_code(code)? {
            let mut guard = CatalogGuard::new(catalog.id).in_states(&[catalog.state]);
            guard.is_canceled = Some(false);
            let changes = CatalogChanges {
                is_canceled: Some(true),
                ..Default::default()
            };
            if self.store.update_catalog(&guard, &changes)? {
                debug!("Catalog {} flagged as cancelled", code);
            }
        }
        Ok(pending.len())
    }
}
