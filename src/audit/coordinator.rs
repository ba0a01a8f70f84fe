//! The catalog audit lifecycle.
//!
//! Every transition is one guarded UPDATE, so concurrent submissions and
//! replayed callbacks resolve at the row: exactly one submitter wins and a
//! result is applied at most once. Side effects (index publish, download
//! cancellation) run after commit and are not transactional; the index
//! reconcile sweep covers what they miss.

use super::apply_id::{decode_apply_id, encode_apply_id};
use super::sn_generator::ApplySnGenerator;
use super::transition::{AuditSubmission, AuditTransition};
use crate::catalog_store::{
    now_millis, ArchiveReason, AuditState, Catalog, CatalogChanges, CatalogGuard, CatalogState,
    CatalogStore, FlowType,
};
use crate::download_grants::DownloadGrantCoordinator;
use crate::error::{CatalogError, CatalogResult, ConflictReason};
use crate::index_sync::IndexSyncPublisher;
use crate::server::metrics;
use crate::workflow::{
    AbstractInfo, AuditApply, AuditProcessMsg, AuditResult, WebhookRoutes, WorkflowEngine,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Advice recorded on audits whose process definition was deleted.
pub const PROC_DEF_DELETED_ADVICE: &str = "audit process definition deleted, audit cancelled";

pub struct AuditCoordinator {
    store: Arc<dyn CatalogStore>,
    engine: Arc<dyn WorkflowEngine>,
    sn_generator: Arc<dyn ApplySnGenerator>,
    index: Arc<IndexSyncPublisher>,
    downloads: Arc<DownloadGrantCoordinator>,
    webhooks: WebhookRoutes,
}

impl AuditCoordinator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        engine: Arc<dyn WorkflowEngine>,
        sn_generator: Arc<dyn ApplySnGenerator>,
        index: Arc<IndexSyncPublisher>,
        downloads: Arc<DownloadGrantCoordinator>,
        webhooks: WebhookRoutes,
    ) -> Self {
        Self {
            store,
            engine,
            sn_generator,
            index,
            downloads,
            webhooks,
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Open a `flow_type` audit on the catalog and dispatch it to the
    /// workflow engine. Returns the apply id.
    pub async fn submit_audit_apply(
        &self,
        catalog_id: u64,
        flow_type: FlowType,
        user_id: &str,
    ) -> CatalogResult<String> {
        let result = self.open_audit(catalog_id, flow_type);
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(CatalogError::Conflict(_)) => "conflict",
            Err(CatalogError::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        metrics::record_audit_submission(flow_type.as_db_str(), outcome);
        let (submission, catalog) = result?;

        let apply_id = encode_apply_id(catalog_id, submission.apply_sn);
        info!(
            "Catalog {} entered {} review as {}",
            catalog.code,
            flow_type.as_db_str(),
            apply_id
        );

        let apply = AuditApply {
            apply_id: apply_id.clone(),
            audit_type: flow_type.audit_type().unwrap_or_default().to_string(),
            user_id: user_id.to_string(),
            process_def_key: submission.proc_def_key.clone(),
            abstract_info: AbstractInfo {
                title: catalog.title.clone(),
                lines: vec![
                    format!("code: {}", catalog.code),
                    format!("flow: {}", flow_type.as_db_str()),
                ],
            },
            webhooks: self.webhooks.for_family("catalog"),
        };
        // Not rolled back: the catalog stays under review until the engine
        // calls back or the process definition is deleted
        if let Err(e) = self.engine.apply(&apply).await {
            error!("Failed to dispatch audit {}: {:#}", apply_id, e);
            return Err(CatalogError::Upstream(e.to_string()));
        }
        Ok(apply_id)
    }

    fn open_audit(
        &self,
        catalog_id: u64,
        flow_type: FlowType,
    ) -> CatalogResult<(AuditSubmission, Catalog)> {
        let audit_type = flow_type
            .audit_type()
            .ok_or(CatalogError::Conflict(ConflictReason::NotAllowed))?;
        let binding = self
            .store
            .get_audit_flow_binding(audit_type)?
            .ok_or_else(|| CatalogError::NotFound(format!("audit flow binding {}", audit_type)))?;

        let submission = AuditSubmission {
            catalog_id,
            flow_type,
            apply_sn: self.sn_generator.next_sn(),
            proc_def_key: binding.proc_def_key,
        };
        let applied = self
            .store
            .update_catalog(&submission.guard(), &submission.changes())?;

        let current = self
            .store
            .get_catalog(catalog_id)?
            .filter(|c| c.current_version)
            .ok_or_else(|| CatalogError::NotFound(format!("catalog {}", catalog_id)))?;

        if applied {
            return Ok((submission, current));
        }

        let reason = if current.is_under_review() {
            ConflictReason::Duplicate
        } else if submission.allowed_for(&current) {
            // The row matched by the time we re-read it: another writer moved it
            ConflictReason::Concurrent
        } else {
            ConflictReason::NotAllowed
        };
        debug!(
            "Catalog {} refused {} submission: {}",
            catalog_id,
            flow_type.as_db_str(),
            reason
        );
        Err(CatalogError::Conflict(reason))
    }

    // =========================================================================
    // Workflow Callbacks
    // =========================================================================

    /// Apply the final result of an audit. Stale or replayed results are
    /// no-ops.
    pub async fn handle_audit_result(
        &self,
        apply_id: &str,
        result: AuditResult,
    ) -> CatalogResult<()> {
        let (catalog_id, apply_sn) = decode_apply_id(apply_id)?;

        let Some((transition, before, after)) =
            self.apply_result(catalog_id, apply_sn, result)?
        else {
            metrics::record_audit_result("unknown", result.as_str(), "ignored");
            debug!("Ignoring stale or replayed result for {}", apply_id);
            return Ok(());
        };
        metrics::record_audit_result(
            transition.flow_type().as_db_str(),
            result.as_str(),
            "applied",
        );
        info!(
            "Catalog {} {} audit settled as {} (state {})",
            after.code,
            transition.flow_type().as_db_str(),
            result.as_str(),
            after.state.as_db_str()
        );

        if let Some(msg_type) = transition.index_message(&before) {
            if let Err(e) = self.index.publish_catalog_as(&after, msg_type).await {
                warn!(
                    "Index publish for {} failed, left for reconcile: {}",
                    after.code, e
                );
            }
        }
        if transition.withdraws() {
            if let Err(e) = self.downloads.cancel_in_flight_applications(&after.code).await {
                error!(
                    "Failed to cancel download applications for {}: {}",
                    after.code, e
                );
            }
        }
        Ok(())
    }

    /// Transaction body of [`Self::handle_audit_result`]: guarded update plus
    /// history archive. Returns `None` when nothing was applied.
    fn apply_result(
        &self,
        catalog_id: u64,
        apply_sn: u64,
        result: AuditResult,
    ) -> CatalogResult<Option<(AuditTransition, Catalog, Catalog)>> {
        let tx = self.store.begin()?;
        let before = tx
            .get_catalog(catalog_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog {}", catalog_id)))?;
        if before.audit_apply_sn != apply_sn || !before.is_under_review() {
            return Ok(None);
        }
        let Some(transition) = AuditTransition::resolve(before.flow_type, apply_sn, result) else {
            return Ok(None);
        };

        let changes = transition.changes(&before, now_millis());
        if !tx.update_catalog(&transition.guard(catalog_id), &changes)? {
            return Ok(None);
        }
        if let Some(reason) = transition.archive_reason() {
            tx.archive_catalog(&before, reason)?;
        }
        let after = tx
            .get_catalog(catalog_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog {}", catalog_id)))?;
        tx.commit()?;
        Ok(Some((transition, before, after)))
    }

    /// Record node-level progress. Best-effort: failures are logged.
    pub fn handle_audit_process_step(&self, msg: &AuditProcessMsg) {
        let (catalog_id, apply_sn) = match decode_apply_id(&msg.apply_id) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping audit process step: {}", e);
                return;
            }
        };
        let catalog = match self.store.get_catalog(catalog_id) {
            Ok(Some(catalog)) => catalog,
            Ok(None) => {
                warn!("Audit process step for unknown catalog {}", catalog_id);
                return;
            }
            Err(e) => {
                error!("Failed to load catalog {}: {:#}", catalog_id, e);
                return;
            }
        };

        let guard = CatalogGuard::new(catalog_id).under_review(catalog.flow_type, apply_sn);
        let activity = msg.pending_activity();
        let mut changes = CatalogChanges {
            flow_id: Some(Some(msg.process_input.flow_id.clone())),
            flow_node_id: Some(activity.map(|a| a.id.clone())),
            flow_node_name: Some(activity.map(|a| a.name.clone())),
            ..Default::default()
        };
        if msg.is_node_rejection() {
            changes.audit_state = Some(AuditState::Reject);
            changes.audit_advice = Some(msg.process_input.audit_idea.clone());
            changes.touch = true;
        }

        match self.store.update_catalog(&guard, &changes) {
            Ok(true) if msg.is_node_rejection() => {
                metrics::record_audit_result(catalog.flow_type.as_db_str(), "reject", "applied");
                info!("Catalog {} audit rejected at node", catalog.code);
            }
            Ok(true) => debug!("Catalog {} audit progressed", catalog.code),
            Ok(false) => debug!("Ignoring stale process step for {}", msg.apply_id),
            Err(e) => error!(
                "Failed to record process step for catalog {}: {:#}",
                catalog_id, e
            ),
        }
    }

    /// Reject every audit running under the deleted process definitions and
    /// drop bindings that point at them. Returns the rejected catalog count.
    pub fn handle_audit_definition_deleted(&self, proc_def_keys: &[String]) -> CatalogResult<usize> {
        let catalogs = self
            .store
            .reject_catalogs_by_proc_def(proc_def_keys, PROC_DEF_DELETED_ADVICE)?;
        let applications = self
            .store
            .reject_applications_by_proc_def(proc_def_keys, PROC_DEF_DELETED_ADVICE)?;
        let bindings = self.store.delete_bindings_by_proc_def(proc_def_keys)?;
        info!(
            "Process definitions {:?} deleted: rejected {} catalog audit(s), {} download application(s), removed {} binding(s)",
            proc_def_keys,
            catalogs.len(),
            applications,
            bindings
        );
        Ok(catalogs.len())
    }

    // =========================================================================
    // Catalog Retirement and Bindings
    // =========================================================================

    /// Retire a draft or offline catalog with no audit in flight, archiving it
    /// and removing it from the index.
    pub async fn delete_catalog(&self, catalog_id: u64) -> CatalogResult<()> {
        let retired = self.retire_catalog(catalog_id)?;
        info!("Catalog {} deleted", retired.code);

        if let Err(e) = self.index.publish_catalog(&retired).await {
            warn!("Tombstone for {} not enqueued: {}", retired.code, e);
        }
        Ok(())
    }

    fn retire_catalog(&self, catalog_id: u64) -> CatalogResult<Catalog> {
        let tx = self.store.begin()?;
        let before = tx
            .get_catalog(catalog_id)?
            .filter(|c| c.current_version)
            .ok_or_else(|| CatalogError::NotFound(format!("catalog {}", catalog_id)))?;

        let guard = CatalogGuard::new(catalog_id)
            .in_states(&[CatalogState::Draft, CatalogState::Offline])
            .not_under_review();
        let changes = CatalogChanges {
            current_version: Some(false),
            is_indexed: Some(false),
            touch: true,
            ..Default::default()
        };
        if !tx.update_catalog(&guard, &changes)? {
            return Err(CatalogError::Conflict(ConflictReason::NotAllowed));
        }
        tx.archive_catalog(&before, ArchiveReason::Deleted)?;
        let retired = tx
            .get_catalog(catalog_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog {}", catalog_id)))?;
        tx.commit()?;
        Ok(retired)
    }

    pub fn bind_audit_flow(&self, audit_type: &str, proc_def_key: &str) -> CatalogResult<()> {
        self.store
            .upsert_audit_flow_binding(audit_type, proc_def_key)?;
        info!("Audit type {} bound to {}", audit_type, proc_def_key);
        Ok(())
    }

    pub fn unbind_audit_flow(&self, audit_type: &str) -> CatalogResult<()> {
        if !self.store.delete_audit_flow_binding(audit_type)? {
            return Err(CatalogError::NotFound(format!(
                "audit flow binding {}",
                audit_type
            )));
        }
        info!("Audit type {} unbound", audit_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SnowflakeSnGenerator;
    use crate::catalog_store::{MountedResource, NewCatalog, SqliteCatalogStore};
    use crate::catalog_store::ApplicationState;
    use crate::download_grants::{DownloadSettings, CATALOG_WITHDRAWN_REASON, DOWNLOAD_AUDIT_TYPE};
    use crate::download_grants::AccessStatus;
    use crate::index_sync::{
        IndexMessage, IndexMessageType, IndexSyncSettings, ProduceAck, StoreEnricher,
    };
    use crate::test_support::RecordingEngine;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<SqliteCatalogStore>,
        engine: Arc<RecordingEngine>,
        downloads: Arc<DownloadGrantCoordinator>,
        coordinator: Arc<AuditCoordinator>,
        outbox: mpsc::Receiver<IndexMessage>,
    }

    fn setup() -> Fixture {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let engine = Arc::new(RecordingEngine::default());
        let sn: Arc<dyn ApplySnGenerator> = Arc::new(SnowflakeSnGenerator::new(3));
        let webhooks = WebhookRoutes::new("http://catalog:3001");
        for flow in [FlowType::Publish, FlowType::Online, FlowType::Offline, FlowType::Change] {
            store
                .upsert_audit_flow_binding(flow.audit_type().unwrap(), "proc-catalog")
                .unwrap();
        }
        store
            .upsert_audit_flow_binding(DOWNLOAD_AUDIT_TYPE, "proc-download")
            .unwrap();

        let enricher = Arc::new(StoreEnricher::new(store.clone()));
        let (publisher, outbox) =
            IndexSyncPublisher::new(store.clone(), enricher, IndexSyncSettings::default());
        let downloads = Arc::new(DownloadGrantCoordinator::new(
            store.clone(),
            engine.clone(),
            sn.clone(),
            webhooks.clone(),
            DownloadSettings::default(),
        ));
        let coordinator = Arc::new(AuditCoordinator::new(
            store.clone(),
            engine.clone(),
            sn,
            Arc::new(publisher),
            downloads.clone(),
            webhooks,
        ));
        Fixture {
            store,
            engine,
            downloads,
            coordinator,
            outbox,
        }
    }

    fn draft(store: &SqliteCatalogStore, code: &str) -> Catalog {
        let catalog = store
            .create_catalog(&NewCatalog {
                code: code.to_string(),
                title: "Ledger".to_string(),
                owner_id: "owner".to_string(),
                ..Default::default()
            })
            .unwrap();
        store
            .add_mount(
                catalog.id,
                &MountedResource {
                    resource_type: "table".to_string(),
                    resource_id: "t-1".to_string(),
                    name: "ledger".to_string(),
                },
            )
            .unwrap();
        catalog
    }

    async fn pass(f: &Fixture, catalog_id: u64, flow_type: FlowType) {
        let apply_id = f
            .coordinator
            .submit_audit_apply(catalog_id, flow_type, "alice")
            .await
            .unwrap();
        f.coordinator
            .handle_audit_result(&apply_id, AuditResult::Pass)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_then_online_enqueues_create() {
        let mut f = setup();
        let catalog = draft(&f.store, "fin/ledger");

        pass(&f, catalog.id, FlowType::Publish).await;
        let published = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(published.state, CatalogState::Published);
        assert!(published.published_at.is_some());
        assert!(f.outbox.try_recv().is_err());

        pass(&f, catalog.id, FlowType::Online).await;
        let online = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(online.state, CatalogState::Online);
        assert_eq!(online.audit_state, AuditState::None);
        assert!(!online.is_indexed);

        let message = f.outbox.try_recv().unwrap();
        assert_eq!(message.msg_type, IndexMessageType::Create);
        assert_eq!(message.version, online.updated_at);
        assert_eq!(message.body["title"], "Ledger");

        let apply = &f.engine.applies.lock().unwrap()[0];
        assert_eq!(apply.audit_type, "af-data-catalog-publish");
        assert_eq!(apply.process_def_key, "proc-catalog");
        assert_eq!(apply.webhooks.len(), 2);
    }

    #[tokio::test]
    async fn change_to_indexed_catalog_enqueues_update() {
        let mut f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        pass(&f, catalog.id, FlowType::Publish).await;
        pass(&f, catalog.id, FlowType::Online).await;
        let created = f.outbox.try_recv().unwrap();
        assert_eq!(created.msg_type, IndexMessageType::Create);
        assert!(f
            .coordinator
            .index
            .on_produce_ack(&ProduceAck::delivered(created))
            .unwrap());

        pass(&f, catalog.id, FlowType::Change).await;
        let refreshed = f.outbox.try_recv().unwrap();
        assert_eq!(refreshed.msg_type, IndexMessageType::Update);
        let changed = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(refreshed.version, changed.updated_at);
        assert!(!changed.is_indexed);
    }

    #[tokio::test]
    async fn second_submission_while_under_review_is_duplicate() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        f.coordinator
            .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
            .await
            .unwrap();

        let err = f
            .coordinator
            .submit_audit_apply(catalog.id, FlowType::Change, "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(ConflictReason::Duplicate)));
        assert_eq!(f.engine.applies.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn submission_from_wrong_state_is_not_allowed() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");

        let err = f
            .coordinator
            .submit_audit_apply(catalog.id, FlowType::Offline, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(ConflictReason::NotAllowed)));
        assert!(matches!(
            f.coordinator
                .submit_audit_apply(catalog.id, FlowType::None, "alice")
                .await,
            Err(CatalogError::Conflict(ConflictReason::NotAllowed))
        ));
        assert!(matches!(
            f.coordinator
                .submit_audit_apply(999, FlowType::Publish, "alice")
                .await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_binding_is_not_found() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        f.coordinator
            .unbind_audit_flow("af-data-catalog-publish")
            .unwrap();

        assert!(matches!(
            f.coordinator
                .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
                .await,
            Err(CatalogError::NotFound(_))
        ));
        assert!(matches!(
            f.coordinator.unbind_audit_flow("af-data-catalog-publish"),
            Err(CatalogError::NotFound(_))
        ));

        f.coordinator
            .bind_audit_flow("af-data-catalog-publish", "proc-catalog-v2")
            .unwrap();
        f.coordinator
            .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
            .await
            .unwrap();
        let reviewing = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(reviewing.proc_def_key.as_deref(), Some("proc-catalog-v2"));
    }

    #[tokio::test]
    async fn replayed_result_is_a_no_op() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        let apply_id = f
            .coordinator
            .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
            .await
            .unwrap();

        f.coordinator
            .handle_audit_result(&apply_id, AuditResult::Pass)
            .await
            .unwrap();
        let settled = f.store.get_catalog(catalog.id).unwrap().unwrap();

        f.coordinator
            .handle_audit_result(&apply_id, AuditResult::Reject)
            .await
            .unwrap();
        let replayed = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(replayed.updated_at, settled.updated_at);
        assert_eq!(replayed.state, CatalogState::Published);
        assert_eq!(replayed.audit_state, AuditState::None);
    }

    #[tokio::test]
    async fn result_for_superseded_audit_is_ignored() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        let first = f
            .coordinator
            .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
            .await
            .unwrap();
        f.coordinator
            .handle_audit_result(&first, AuditResult::Reject)
            .await
            .unwrap();
        let second = f
            .coordinator
            .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
            .await
            .unwrap();

        f.coordinator
            .handle_audit_result(&first, AuditResult::Pass)
            .await
            .unwrap();
        let current = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(current.state, CatalogState::Draft);
        assert!(current.is_under_review());

        f.coordinator
            .handle_audit_result(&second, AuditResult::Pass)
            .await
            .unwrap();
        assert_eq!(
            f.store.get_catalog(catalog.id).unwrap().unwrap().state,
            CatalogState::Published
        );
    }

    #[tokio::test]
    async fn malformed_apply_id_is_rejected() {
        let f = setup();
        assert!(matches!(
            f.coordinator
                .handle_audit_result("not-an-id", AuditResult::Pass)
                .await,
            Err(CatalogError::InvalidApplyId(_))
        ));
        assert!(matches!(
            f.coordinator
                .handle_audit_result(&encode_apply_id(42, 1), AuditResult::Pass)
                .await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn offline_archives_and_withdraws_downloads() {
        let mut f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        pass(&f, catalog.id, FlowType::Publish).await;
        pass(&f, catalog.id, FlowType::Online).await;
        let _ = f.outbox.try_recv();

        let pending = f.downloads.apply_download("u1", "fin/ledger", 3).await.unwrap();
        pass(&f, catalog.id, FlowType::Offline).await;

        let offline = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(offline.state, CatalogState::Offline);
        assert!(offline.offline_at.is_some());
        assert!(offline.is_canceled);

        let history = f.store.list_history(catalog.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason, ArchiveReason::Offline);
        assert_eq!(history[0].snapshot["state"], "online");

        assert_eq!(f.outbox.try_recv().unwrap().msg_type, IndexMessageType::Delete);
        assert_eq!(f.engine.cancels.lock().unwrap()[0].apply_ids.len(), 1);

        let withdrawn = f
            .store
            .get_download_application(pending.id)
            .unwrap()
            .unwrap();
        assert_eq!(withdrawn.state, ApplicationState::Undone);
        assert_eq!(withdrawn.audit_advice.as_deref(), Some(CATALOG_WITHDRAWN_REASON));
        assert_eq!(
            f.downloads.check_access("u1", "fin/ledger").unwrap(),
            AccessStatus::Unauthorized
        );

        // Back online, the same user may apply again
        pass(&f, catalog.id, FlowType::Publish).await;
        pass(&f, catalog.id, FlowType::Online).await;
        f.downloads.apply_download("u1", "fin/ledger", 3).await.unwrap();
    }

    #[tokio::test]
    async fn node_rejection_records_advice_without_moving_state() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        let apply_id = f
            .coordinator
            .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
            .await
            .unwrap();

        let progress: AuditProcessMsg = serde_json::from_value(serde_json::json!({
            "apply_id": apply_id,
            "next_activity": [{"id": "n2", "name": "Data steward"}],
            "process_input": {"flow_id": "flow-1"}
        }))
        .unwrap();
        f.coordinator.handle_audit_process_step(&progress);
        let reviewing = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(reviewing.flow_id.as_deref(), Some("flow-1"));
        assert_eq!(reviewing.flow_node_name.as_deref(), Some("Data steward"));
        assert!(reviewing.is_under_review());

        let rejection: AuditProcessMsg = serde_json::from_value(serde_json::json!({
            "apply_id": apply_id,
            "process_input": {"flow_id": "flow-1", "audit_result": "reject", "audit_idea": "missing owner"}
        }))
        .unwrap();
        f.coordinator.handle_audit_process_step(&rejection);
        let rejected = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(rejected.audit_state, AuditState::Reject);
        assert_eq!(rejected.state, CatalogState::Draft);
        assert_eq!(rejected.audit_advice.as_deref(), Some("missing owner"));
    }

    #[tokio::test]
    async fn deleted_definition_rejects_running_audits() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        f.coordinator
            .submit_audit_apply(catalog.id, FlowType::Publish, "alice")
            .await
            .unwrap();

        let rejected = f
            .coordinator
            .handle_audit_definition_deleted(&["proc-catalog".to_string()])
            .unwrap();
        assert_eq!(rejected, 1);

        let current = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(current.audit_state, AuditState::Reject);
        assert_eq!(current.audit_advice.as_deref(), Some(PROC_DEF_DELETED_ADVICE));
        assert!(f
            .store
            .get_audit_flow_binding("af-data-catalog-publish")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_retires_draft_and_publishes_tombstone() {
        let mut f = setup();
        let catalog = draft(&f.store, "fin/ledger");

        f.coordinator.delete_catalog(catalog.id).await.unwrap();
        let retired = f.store.get_catalog(catalog.id).unwrap().unwrap();
        assert!(!retired.current_version);
        assert!(f.store.get_catalog_by_code("fin/ledger").unwrap().is_none());
        assert_eq!(
            f.store.list_history(catalog.id).unwrap()[0].reason,
            ArchiveReason::Deleted
        );
        assert_eq!(f.outbox.try_recv().unwrap().msg_type, IndexMessageType::Delete);

        assert!(matches!(
            f.coordinator.delete_catalog(catalog.id).await,
            Err(CatalogError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_refuses_online_catalog() {
        let f = setup();
        let catalog = draft(&f.store, "fin/ledger");
        pass(&f, catalog.id, FlowType::Publish).await;

        assert!(matches!(
            f.coordinator.delete_catalog(catalog.id).await,
            Err(CatalogError::Conflict(ConflictReason::NotAllowed))
        ));
    }
}
