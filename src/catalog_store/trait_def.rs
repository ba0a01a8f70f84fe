//! CatalogStore trait definition.
//!
//! Every catalog mutation is a conditional UPDATE described by a
//! [`CatalogGuard`] (the expected prior state of the row) and a
//! [`CatalogChanges`] (the columns it writes). A guard that matches no row is
//! reported as `Ok(false)`, never as an error, so callers decide whether that
//! means "not found", "conflict" or "already applied".

use super::models::*;
use anyhow::Result;

/// Expected prior state of a catalog row.
#[derive(Clone, Debug)]
pub struct CatalogGuard {
    pub id: u64,
    /// Row must be the current version of its code
    pub current_only: bool,
    /// Row state must be one of these; empty accepts any state
    pub states: Vec<CatalogState>,
    pub flow_type: Option<FlowType>,
    pub audit_state: Option<AuditState>,
    pub audit_state_not: Option<AuditState>,
    pub audit_apply_sn: Option<u64>,
    pub updated_at: Option<i64>,
    pub is_canceled: Option<bool>,
}

impl CatalogGuard {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            current_only: true,
            states: Vec::new(),
            flow_type: None,
            audit_state: None,
            audit_state_not: None,
            audit_apply_sn: None,
            updated_at: None,
            is_canceled: None,
        }
    }

    pub fn in_states(mut self, states: &[CatalogState]) -> Self {
        self.states = states.to_vec();
        self
    }

    pub fn not_under_review(mut self) -> Self {
        self.audit_state_not = Some(AuditState::UnderReview);
        self
    }

    /// Matches only the audit identified by `(flow_type, apply_sn)` while it
    /// is still under review.
    pub fn under_review(mut self, flow_type: FlowType, apply_sn: u64) -> Self {
        self.flow_type = Some(flow_type);
        self.audit_apply_sn = Some(apply_sn);
        self.audit_state = Some(AuditState::UnderReview);
        self
    }

    pub fn version(mut self, updated_at: i64) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

/// Column assignments of a conditional catalog update. `None` leaves the
/// column untouched; `Some(None)` on a nullable column clears it.
#[derive(Clone, Debug, Default)]
pub struct CatalogChanges {
    pub state: Option<CatalogState>,
    pub flow_type: Option<FlowType>,
    pub audit_state: Option<AuditState>,
    pub audit_apply_sn: Option<u64>,
    pub proc_def_key: Option<Option<String>>,
    pub flow_id: Option<Option<String>>,
    pub flow_node_id: Option<Option<String>>,
    pub flow_node_name: Option<Option<String>>,
    pub audit_advice: Option<Option<String>>,
    pub is_indexed: Option<bool>,
    pub is_canceled: Option<bool>,
    pub current_version: Option<bool>,
    pub published_at: Option<i64>,
    pub online_at: Option<i64>,
    pub offline_at: Option<i64>,
    /// Bump `updated_at`. Bookkeeping-only updates (index acks, the
    /// cancellation flag) leave the version stamp alone.
    pub touch: bool,
}

/// Writes that must commit or roll back together.
///
/// Dropping a transaction without calling [`CatalogTx::commit`] rolls it back.
/// While a transaction is open the store's connection is held, so only the
/// transaction's own methods may be used until it is committed or dropped.
pub trait CatalogTx {
    fn get_catalog(&self, id: u64) -> Result<Option<Catalog>>;

    fn update_catalog(&self, guard: &CatalogGuard, changes: &CatalogChanges) -> Result<bool>;

    /// Append a history row snapshotting `catalog`.
    fn archive_catalog(&self, catalog: &Catalog, reason: ArchiveReason) -> Result<i64>;

    fn find_pending_application(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<Option<DownloadApplication>>;

    fn find_active_grant(&self, user_id: &str, code: &str, now: i64)
        -> Result<Option<DownloadGrant>>;

    fn create_download_application(
        &self,
        application: &NewDownloadApplication,
    ) -> Result<DownloadApplication>;

    fn get_download_application(&self, id: u64) -> Result<Option<DownloadApplication>>;

    /// Move an application out of `under_review`, guarded by `(id, apply_sn)`.
    fn transition_application(
        &self,
        id: u64,
        apply_sn: u64,
        to: ApplicationState,
        advice: Option<&str>,
    ) -> Result<bool>;

    fn insert_download_grant(&self, application: &DownloadApplication, expires_at: i64)
        -> Result<DownloadGrant>;

    fn commit(self: Box<Self>) -> Result<()>;
}

/// Persistence boundary for catalogs, their history, audit-flow bindings,
/// download applications and download grants.
pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Transactions
    // =========================================================================

    fn begin(&self) -> Result<Box<dyn CatalogTx + '_>>;

    // =========================================================================
    // Catalogs
    // =========================================================================

    /// Register a new draft catalog. Fails if a current catalog already uses
    /// the code.
    fn create_catalog(&self, catalog: &NewCatalog) -> Result<Catalog>;

    fn get_catalog(&self, id: u64) -> Result<Option<Catalog>>;

    /// Current version of the catalog with this code.
    fn get_catalog_by_code(&self, code: &str) -> Result<Option<Catalog>>;

    fn update_catalog(&self, guard: &CatalogGuard, changes: &CatalogChanges) -> Result<bool>;

    /// Reject every under-review catalog audit running under one of the
    /// process definitions. Returns the affected catalog ids.
    fn reject_catalogs_by_proc_def(&self, proc_def_keys: &[String], advice: &str)
        -> Result<Vec<u64>>;

    /// Current catalogs with `is_indexed = 0` that have at least one mounted
    /// resource.
    fn list_unindexed_catalogs(&self) -> Result<Vec<Catalog>>;

    fn list_history(&self, catalog_id: u64) -> Result<Vec<CatalogHistory>>;

    // =========================================================================
    // Relations
    // =========================================================================

    fn set_relations(&self, catalog_id: u64, kind: RelationKind, refs: &[NamedRef])
        -> Result<()>;

    fn set_columns(&self, catalog_id: u64, columns: &[CatalogColumn]) -> Result<()>;

    fn add_mount(&self, catalog_id: u64, mount: &MountedResource) -> Result<()>;

    fn get_relations(&self, catalog_id: u64) -> Result<CatalogRelations>;

    // =========================================================================
    // Audit-Flow Bindings
    // =========================================================================

    fn get_audit_flow_binding(&self, audit_type: &str) -> Result<Option<AuditFlowBinding>>;

    fn upsert_audit_flow_binding(&self, audit_type: &str, proc_def_key: &str) -> Result<()>;

    fn delete_audit_flow_binding(&self, audit_type: &str) -> Result<bool>;

    /// Remove every binding pointing at one of the process definitions.
    fn delete_bindings_by_proc_def(&self, proc_def_keys: &[String]) -> Result<usize>;

    // =========================================================================
    // Download Applications and Grants
    // =========================================================================

    fn get_download_application(&self, id: u64) -> Result<Option<DownloadApplication>>;

    fn find_pending_application(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<Option<DownloadApplication>>;

    fn list_pending_applications(&self, code: &str) -> Result<Vec<DownloadApplication>>;

    fn transition_application(
        &self,
        id: u64,
        apply_sn: u64,
        to: ApplicationState,
        advice: Option<&str>,
    ) -> Result<bool>;

    /// Reject every under-review application running under one of the
    /// process definitions.
    fn reject_applications_by_proc_def(&self, proc_def_keys: &[String], advice: &str)
        -> Result<usize>;

    fn find_active_grant(&self, user_id: &str, code: &str, now: i64)
        -> Result<Option<DownloadGrant>>;

    fn get_grant_by_application(&self, application_id: u64) -> Result<Option<DownloadGrant>>;

    /// Deactivate every active grant with `expires_at <= now`.
    fn expire_grants(&self, now: i64) -> Result<usize>;
}
