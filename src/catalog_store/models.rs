//! Catalog governance models.
//!
//! All timestamps are Unix milliseconds. `Catalog::updated_at` doubles as the
//! optimistic version stamp matched by index delivery acknowledgements.

use serde::{Deserialize, Serialize};

// =============================================================================
// Enumerations
// =============================================================================

/// Lifecycle state of a catalog.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogState {
    Draft,
    Published,
    Online,
    Offline,
}

impl CatalogState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CatalogState::Draft => "draft",
            CatalogState::Published => "published",
            CatalogState::Online => "online",
            CatalogState::Offline => "offline",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CatalogState::Draft),
            "published" => Some(CatalogState::Published),
            "online" => Some(CatalogState::Online),
            "offline" => Some(CatalogState::Offline),
            _ => None,
        }
    }
}

/// Kind of audit currently attached to a catalog.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    None,
    Online,
    Change,
    Offline,
    Publish,
}

impl FlowType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            FlowType::None => "none",
            FlowType::Online => "online",
            FlowType::Change => "change",
            FlowType::Offline => "offline",
            FlowType::Publish => "publish",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(FlowType::None),
            "online" => Some(FlowType::Online),
            "change" => Some(FlowType::Change),
            "offline" => Some(FlowType::Offline),
            "publish" => Some(FlowType::Publish),
            _ => None,
        }
    }

    /// Audit type announced to the workflow engine, also the key of the
    /// audit-flow binding table.
    pub fn audit_type(&self) -> Option<&'static str> {
        match self {
            FlowType::None => None,
            FlowType::Online => Some("af-data-catalog-online"),
            FlowType::Change => Some("af-data-catalog-change"),
            FlowType::Offline => Some("af-data-catalog-offline"),
            FlowType::Publish => Some("af-data-catalog-publish"),
        }
    }
}

/// Progress of the audit attached to a catalog.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditState {
    None,
    UnderReview,
    Pass,
    Reject,
    Undone,
}

impl AuditState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AuditState::None => "none",
            AuditState::UnderReview => "under_review",
            AuditState::Pass => "pass",
            AuditState::Reject => "reject",
            AuditState::Undone => "undone",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(AuditState::None),
            "under_review" => Some(AuditState::UnderReview),
            "pass" => Some(AuditState::Pass),
            "reject" => Some(AuditState::Reject),
            "undone" => Some(AuditState::Undone),
            _ => None,
        }
    }
}

/// State of a download application. Mirrors the audit result vocabulary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    UnderReview,
    Pass,
    Reject,
    Undone,
}

impl ApplicationState {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ApplicationState::UnderReview => "under_review",
            ApplicationState::Pass => "pass",
            ApplicationState::Reject => "reject",
            ApplicationState::Undone => "undone",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "under_review" => Some(ApplicationState::UnderReview),
            "pass" => Some(ApplicationState::Pass),
            "reject" => Some(ApplicationState::Reject),
            "undone" => Some(ApplicationState::Undone),
            _ => None,
        }
    }
}

/// Why a history row was written.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    /// A change audit passed and replaced the previous content.
    Superseded,
    /// An offline audit passed.
    Offline,
    /// The catalog was deleted.
    Deleted,
}

impl ArchiveReason {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ArchiveReason::Superseded => "superseded",
            ArchiveReason::Offline => "offline",
            ArchiveReason::Deleted => "deleted",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "superseded" => Some(ArchiveReason::Superseded),
            "offline" => Some(ArchiveReason::Offline),
            "deleted" => Some(ArchiveReason::Deleted),
            _ => None,
        }
    }
}

// =============================================================================
// Aggregates
// =============================================================================

/// The governed metadata aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: u64,
    /// Business key, unique among current versions
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub department_id: Option<String>,
    pub state: CatalogState,
    pub flow_type: FlowType,
    pub audit_state: AuditState,
    pub audit_apply_sn: u64,
    /// Process definition the in-flight audit runs under
    pub proc_def_key: Option<String>,
    pub flow_id: Option<String>,
    pub flow_node_id: Option<String>,
    pub flow_node_name: Option<String>,
    pub audit_advice: Option<String>,
    pub is_indexed: bool,
    pub is_canceled: bool,
    pub current_version: bool,
    pub created_at: i64,
    /// Strictly increasing on every mutation
    pub updated_at: i64,
    pub published_at: Option<i64>,
    pub online_at: Option<i64>,
    pub offline_at: Option<i64>,
}

impl Catalog {
    pub fn is_under_review(&self) -> bool {
        self.audit_state == AuditState::UnderReview
    }
}

/// Input for registering a new draft catalog.
#[derive(Clone, Debug, Default)]
pub struct NewCatalog {
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub department_id: Option<String>,
}

/// Append-only archive of a superseded or deleted catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogHistory {
    pub id: i64,
    pub catalog_id: u64,
    pub code: String,
    pub state: CatalogState,
    pub reason: ArchiveReason,
    /// Full catalog row at archive time
    pub snapshot: serde_json::Value,
    pub archived_at: i64,
}

/// A related entity referenced by id and display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

/// One field of the catalog's data resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub description: Option<String>,
}

/// Data resource (table, API, file) mounted under a catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountedResource {
    pub resource_type: String,
    pub resource_id: String,
    pub name: String,
}

/// Relation kinds stored in `catalog_relations`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RelationKind {
    BusinessObject,
    InfoSystem,
}

impl RelationKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RelationKind::BusinessObject => "business_object",
            RelationKind::InfoSystem => "info_system",
        }
    }
}

/// Everything denormalized into a catalog's search document besides the
/// catalog row itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRelations {
    pub business_objects: Vec<NamedRef>,
    pub info_systems: Vec<NamedRef>,
    pub columns: Vec<CatalogColumn>,
    pub mounts: Vec<MountedResource>,
}

/// Data a download user requests approval for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadApplication {
    pub id: u64,
    pub apply_sn: u64,
    pub code: String,
    pub user_id: String,
    pub requested_days: u32,
    pub state: ApplicationState,
    pub proc_def_key: Option<String>,
    pub audit_advice: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for recording a new download application.
#[derive(Clone, Debug)]
pub struct NewDownloadApplication {
    pub apply_sn: u64,
    pub code: String,
    pub user_id: String,
    pub requested_days: u32,
    pub proc_def_key: Option<String>,
}

/// Time-boxed download permission materialized from an approved application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadGrant {
    pub id: i64,
    pub user_id: String,
    pub code: String,
    pub application_id: u64,
    pub expires_at: i64,
    pub active: bool,
    pub created_at: i64,
}

/// Which process definition an audit type runs under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFlowBinding {
    pub audit_type: String,
    pub proc_def_key: String,
    pub updated_at: i64,
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
