//! SQLite schema definitions for the catalog governance database.
//!
//! Every timestamp column holds Unix milliseconds and is written explicitly by
//! the store, so none of them carry a SQL default.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Catalog Tables
// =============================================================================

/// Catalogs table - one row per catalog, retired rows keep current_version = 0
const CATALOGS_TABLE: Table = Table {
    name: "catalogs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("code", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("department_id", &SqlType::Text),
        sqlite_column!(
            "state",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'draft'")
        ), // 'draft', 'published', 'online', 'offline'
        sqlite_column!(
            "flow_type",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'none'")
        ),
        sqlite_column!(
            "audit_state",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'none'")
        ),
        sqlite_column!(
            "audit_apply_sn",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("proc_def_key", &SqlType::Text),
        sqlite_column!("flow_id", &SqlType::Text),
        sqlite_column!("flow_node_id", &SqlType::Text),
        sqlite_column!("flow_node_name", &SqlType::Text),
        sqlite_column!("audit_advice", &SqlType::Text),
        sqlite_column!(
            "is_indexed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "is_canceled",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "current_version",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("published_at", &SqlType::Integer),
        sqlite_column!("online_at", &SqlType::Integer),
        sqlite_column!("offline_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_catalogs_code", "code, current_version"),
        ("idx_catalogs_indexed", "is_indexed, current_version"),
        ("idx_catalogs_proc_def", "proc_def_key"),
    ],
    unique_constraints: &[],
};

/// Related business objects and info systems, kind distinguishes them
const CATALOG_RELATIONS_TABLE: Table = Table {
    name: "catalog_relations",
    columns: &[
        sqlite_column!("catalog_id", &SqlType::Integer, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true), // 'business_object', 'info_system'
        sqlite_column!("ref_id", &SqlType::Text, non_null = true),
        sqlite_column!("ref_name", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_catalog_relations_catalog", "catalog_id, kind")],
    unique_constraints: &[&["catalog_id", "kind", "ref_id"]],
};

/// Field list of the catalog's data resource
const CATALOG_COLUMNS_TABLE: Table = Table {
    name: "catalog_columns",
    columns: &[
        sqlite_column!("catalog_id", &SqlType::Integer, non_null = true),
        sqlite_column!("position", &SqlType::Integer, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("data_type", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
    ],
    indices: &[("idx_catalog_columns_catalog", "catalog_id")],
    unique_constraints: &[&["catalog_id", "position"]],
};

/// Data resources mounted under a catalog
const CATALOG_MOUNTS_TABLE: Table = Table {
    name: "catalog_mounts",
    columns: &[
        sqlite_column!("catalog_id", &SqlType::Integer, non_null = true),
        sqlite_column!("resource_type", &SqlType::Text, non_null = true),
        sqlite_column!("resource_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_catalog_mounts_catalog", "catalog_id")],
    unique_constraints: &[&["catalog_id", "resource_type", "resource_id"]],
};

/// Append-only archive written on supersede, offline and delete
const CATALOG_HISTORY_TABLE: Table = Table {
    name: "catalog_history",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("catalog_id", &SqlType::Integer, non_null = true),
        sqlite_column!("code", &SqlType::Text, non_null = true),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!("reason", &SqlType::Text, non_null = true),
        sqlite_column!("snapshot", &SqlType::Text, non_null = true), // JSON
        sqlite_column!("archived_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_catalog_history_catalog", "catalog_id")],
    unique_constraints: &[],
};

// =============================================================================
// Audit Tables
// =============================================================================

/// Process definition each audit type runs under
const AUDIT_FLOW_BINDINGS_TABLE: Table = Table {
    name: "audit_flow_bindings",
    columns: &[
        sqlite_column!("audit_type", &SqlType::Text, is_primary_key = true),
        sqlite_column!("proc_def_key", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_audit_flow_bindings_key", "proc_def_key")],
    unique_constraints: &[],
};

// =============================================================================
// Download Tables
// =============================================================================

const DOWNLOAD_APPLICATIONS_TABLE: Table = Table {
    name: "download_applications",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("apply_sn", &SqlType::Integer, non_null = true),
        sqlite_column!("code", &SqlType::Text, non_null = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("requested_days", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "state",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'under_review'")
        ),
        sqlite_column!("proc_def_key", &SqlType::Text),
        sqlite_column!("audit_advice", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_download_applications_code", "code, state"),
        ("idx_download_applications_user", "user_id, code"),
    ],
    unique_constraints: &[],
};

const DOWNLOAD_GRANTS_TABLE: Table = Table {
    name: "download_grants",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("code", &SqlType::Text, non_null = true),
        sqlite_column!("application_id", &SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_download_grants_user_code", "user_id, code"),
        ("idx_download_grants_expiry", "active, expires_at"),
    ],
    unique_constraints: &[&["application_id"]],
};

// =============================================================================
// Versioned Schema
// =============================================================================

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        CATALOGS_TABLE,
        CATALOG_RELATIONS_TABLE,
        CATALOG_COLUMNS_TABLE,
        CATALOG_MOUNTS_TABLE,
        CATALOG_HISTORY_TABLE,
        AUDIT_FLOW_BINDINGS_TABLE,
        DOWNLOAD_APPLICATIONS_TABLE,
        DOWNLOAD_GRANTS_TABLE,
    ],
    migration: None,
}];
