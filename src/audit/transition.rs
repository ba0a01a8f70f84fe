//! Typed catalog lifecycle transitions.
//!
//! ```text
//! draft     --publish--> under_review(publish) --pass--> published
//! published --online---> under_review(online)  --pass--> online
//! online    --offline--> under_review(offline) --pass--> offline
//! offline   --publish--> under_review(publish)
//! any       --change---> under_review(change)  --pass--> (state unchanged)
//! ```
//!
//! Reject and undone never move `state`; they only settle `audit_state`.

use crate::catalog_store::{
    ArchiveReason, AuditState, Catalog, CatalogChanges, CatalogGuard, CatalogState, FlowType,
};
use crate::index_sync::IndexMessageType;
use crate::workflow::AuditResult;

/// States from which an audit of `flow_type` may be submitted. Empty means
/// any settled state.
pub fn submit_states(flow_type: FlowType) -> &'static [CatalogState] {
    match flow_type {
        FlowType::Publish => &[CatalogState::Draft, CatalogState::Offline],
        FlowType::Online => &[CatalogState::Published],
        FlowType::Offline => &[CatalogState::Online],
        FlowType::Change | FlowType::None => &[],
    }
}

/// Opening a new audit on a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSubmission {
    pub catalog_id: u64,
    pub flow_type: FlowType,
    pub apply_sn: u64,
    pub proc_def_key: String,
}

impl AuditSubmission {
    pub fn guard(&self) -> CatalogGuard {
        CatalogGuard::new(self.catalog_id)
            .in_states(submit_states(self.flow_type))
            .not_under_review()
    }

    pub fn changes(&self) -> CatalogChanges {
        CatalogChanges {
            flow_type: Some(self.flow_type),
            audit_state: Some(AuditState::UnderReview),
            audit_apply_sn: Some(self.apply_sn),
            proc_def_key: Some(Some(self.proc_def_key.clone())),
            flow_id: Some(None),
            flow_node_id: Some(None),
            flow_node_name: Some(None),
            audit_advice: Some(None),
            touch: true,
            ..Default::default()
        }
    }

    /// Whether `catalog` satisfies the submit precondition right now.
    pub fn allowed_for(&self, catalog: &Catalog) -> bool {
        let states = submit_states(self.flow_type);
        catalog.current_version
            && !catalog.is_under_review()
            && (states.is_empty() || states.contains(&catalog.state))
    }
}

/// Settling the audit identified by `(flow_type, apply_sn)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTransition {
    PublishPassed { apply_sn: u64 },
    OnlinePassed { apply_sn: u64 },
    OfflinePassed { apply_sn: u64 },
    ChangePassed { apply_sn: u64 },
    Rejected { flow_type: FlowType, apply_sn: u64 },
    Undone { flow_type: FlowType, apply_sn: u64 },
}

impl AuditTransition {
    /// Map a workflow result onto the audit it settles. `None` when the
    /// catalog carries no audit.
    pub fn resolve(flow_type: FlowType, apply_sn: u64, result: AuditResult) -> Option<Self> {
        let transition = match (result, flow_type) {
            (_, FlowType::None) => return None,
            (AuditResult::Pass, FlowType::Publish) => AuditTransition::PublishPassed { apply_sn },
            (AuditResult::Pass, FlowType::Online) => AuditTransition::OnlinePassed { apply_sn },
            (AuditResult::Pass, FlowType::Offline) => AuditTransition::OfflinePassed { apply_sn },
            (AuditResult::Pass, FlowType::Change) => AuditTransition::ChangePassed { apply_sn },
            (AuditResult::Reject, flow_type) => AuditTransition::Rejected {
                flow_type,
                apply_sn,
            },
            (AuditResult::Undone, flow_type) => AuditTransition::Undone {
                flow_type,
                apply_sn,
            },
        };
        Some(transition)
    }

    pub fn flow_type(&self) -> FlowType {
        match self {
            AuditTransition::PublishPassed { .. } => FlowType::Publish,
            AuditTransition::OnlinePassed { .. } => FlowType::Online,
            AuditTransition::OfflinePassed { .. } => FlowType::Offline,
            AuditTransition::ChangePassed { .. } => FlowType::Change,
            AuditTransition::Rejected { flow_type, .. }
            | AuditTransition::Undone { flow_type, .. } => *flow_type,
        }
    }

    pub fn apply_sn(&self) -> u64 {
        match self {
            AuditTransition::PublishPassed { apply_sn }
            | AuditTransition::OnlinePassed { apply_sn }
            | AuditTransition::OfflinePassed { apply_sn }
            | AuditTransition::ChangePassed { apply_sn }
            | AuditTransition::Rejected { apply_sn, .. }
            | AuditTransition::Undone { apply_sn, .. } => *apply_sn,
        }
    }

    pub fn guard(&self, catalog_id: u64) -> CatalogGuard {
        CatalogGuard::new(catalog_id).under_review(self.flow_type(), self.apply_sn())
    }

    /// Columns written when the transition applies to `before`.
    pub fn changes(&self, before: &Catalog, now: i64) -> CatalogChanges {
        let settled = CatalogChanges {
            flow_type: Some(FlowType::None),
            audit_state: Some(AuditState::None),
            flow_id: Some(None),
            flow_node_id: Some(None),
            flow_node_name: Some(None),
            audit_advice: Some(None),
            touch: true,
            ..Default::default()
        };

        match self {
            AuditTransition::PublishPassed { .. } => CatalogChanges {
                state: Some(CatalogState::Published),
                published_at: Some(now),
                ..settled
            },
            AuditTransition::OnlinePassed { .. } => CatalogChanges {
                state: Some(CatalogState::Online),
                online_at: Some(now),
                is_indexed: Some(false),
                is_canceled: Some(false),
                ..settled
            },
            AuditTransition::OfflinePassed { .. } => CatalogChanges {
                state: Some(CatalogState::Offline),
                offline_at: Some(now),
                is_indexed: Some(false),
                ..settled
            },
            AuditTransition::ChangePassed { .. } => CatalogChanges {
                is_indexed: (before.state == CatalogState::Online).then_some(false),
                ..settled
            },
            AuditTransition::Rejected { .. } => CatalogChanges {
                audit_state: Some(AuditState::Reject),
                touch: true,
                ..Default::default()
            },
            AuditTransition::Undone { .. } => CatalogChanges {
                audit_state: Some(AuditState::Undone),
                touch: true,
                ..Default::default()
            },
        }
    }

    /// History row written in the same transaction, archiving the
    /// pre-transition snapshot.
    pub fn archive_reason(&self) -> Option<ArchiveReason> {
        match self {
            AuditTransition::OfflinePassed { .. } => Some(ArchiveReason::Offline),
            AuditTransition::ChangePassed { .. } => Some(ArchiveReason::Superseded),
            _ => None,
        }
    }

    /// Index message the settled catalog needs, if any. A change to an
    /// online catalog refreshes a document that already exists downstream.
    pub fn index_message(&self, before: &Catalog) -> Option<IndexMessageType> {
        match self {
            AuditTransition::OnlinePassed { .. } => Some(IndexMessageType::Create),
            AuditTransition::OfflinePassed { .. } => Some(IndexMessageType::Delete),
            AuditTransition::ChangePassed { .. } if before.state == CatalogState::Online => {
                Some(IndexMessageType::Update)
            }
            _ => None,
        }
    }

    /// Whether the catalog is withdrawn, cancelling pending download
    /// applications.
    pub fn withdraws(&self) -> bool {
        matches!(self, AuditTransition::OfflinePassed { .. })
    }
}
