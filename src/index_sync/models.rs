use crate::catalog_store::{Catalog, CatalogColumn, CatalogRelations, CatalogState, NamedRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMessageType {
    Create,
    Update,
    Delete,
}

impl IndexMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMessageType::Create => "create",
            IndexMessageType::Update => "update",
            IndexMessageType::Delete => "delete",
        }
    }
}

/// One outbox entry for the search index. `(doc_id, version)` identifies the
/// change; replaying it is harmless because the index upserts by `doc_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMessage {
    #[serde(rename = "type")]
    pub msg_type: IndexMessageType,
    pub doc_id: String,
    pub catalog_id: u64,
    /// `updated_at` of the catalog row the message was built from
    pub version: i64,
    pub body: serde_json::Value,
}

/// Delivery outcome reported back by the index pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProduceAck {
    pub message: IndexMessage,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProduceAck {
    pub fn delivered(message: IndexMessage) -> Self {
        Self {
            message,
            error: None,
        }
    }

    pub fn failed(message: IndexMessage, error: impl Into<String>) -> Self {
        Self {
            message,
            error: Some(error.into()),
        }
    }
}

/// Search documents are keyed by the catalog code with `/` replaced by `-`.
pub fn encode_doc_id(code: &str) -> String {
    code.replace('/', "-")
}

/// Denormalized search document of an online catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    pub id: u64,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub department_id: Option<String>,
    pub state: CatalogState,
    pub online_at: Option<i64>,
    pub updated_at: i64,
    pub business_objects: Vec<NamedRef>,
    pub info_systems: Vec<NamedRef>,
    pub fields: Vec<CatalogColumn>,
}

impl CatalogDocument {
    pub fn new(catalog: &Catalog, relations: &CatalogRelations) -> Self {
        Self {
            id: catalog.id,
            code: catalog.code.clone(),
            title: catalog.title.clone(),
            description: catalog.description.clone(),
            owner_id: catalog.owner_id.clone(),
            department_id: catalog.department_id.clone(),
            state: catalog.state,
            online_at: catalog.online_at,
            updated_at: catalog.updated_at,
            business_objects: relations.business_objects.clone(),
            info_systems: relations.info_systems.clone(),
            fields: relations.columns.clone(),
        }
    }
}

/// Body of a delete message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub doc_id: String,
    pub code: String,
    pub id: u64,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub found: usize,
    pub published: usize,
    pub failed: usize,
}
