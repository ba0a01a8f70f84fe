//! SQLite-backed catalog store.
//!
//! A single connection behind a mutex serializes writers. Multi-statement
//! writes run between `BEGIN IMMEDIATE` and `COMMIT`, either inside one store
//! method or through an explicit [`CatalogTx`].

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::{CatalogChanges, CatalogGuard, CatalogStore, CatalogTx};
use crate::sqlite_persistence::open_versioned_db;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const CATALOG_SELECT: &str = "SELECT id, code, title, description, owner_id, department_id, \
     state, flow_type, audit_state, audit_apply_sn, proc_def_key, flow_id, flow_node_id, \
     flow_node_name, audit_advice, is_indexed, is_canceled, current_version, created_at, \
     updated_at, published_at, online_at, offline_at FROM catalogs";

const APPLICATION_SELECT: &str = "SELECT id, apply_sn, code, user_id, requested_days, state, \
     proc_def_key, audit_advice, created_at, updated_at FROM download_applications";

const GRANT_SELECT: &str = "SELECT id, user_id, code, application_id, expires_at, active, \
     created_at FROM download_grants";

/// SQLite-backed store for catalogs and download access.
#[derive(Clone)]
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    /// Open (or create) the catalog database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = open_versioned_db(db_path, CATALOG_VERSIONED_SCHEMAS)
            .with_context(|| format!("Failed to open catalog database {:?}", db_path))?;
        info!("Catalog store ready at {:?}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Fresh in-memory store with the latest schema.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        CATALOG_VERSIONED_SCHEMAS
            .last()
            .context("No catalog schema defined")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Catalog database mutex poisoned"))
    }

    /// Run `body` between `BEGIN IMMEDIATE` and `COMMIT`, rolling back on error.
    fn write_tx<T>(&self, body: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        match body(&conn) {
            Ok(value) => {
                if let Err(e) = conn.execute("COMMIT", []) {
                    let _ = conn.execute("ROLLBACK", []);
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            }
        }
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn parse_text<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{}'", raw).into(),
        )
    })
}

fn row_to_catalog(row: &Row) -> rusqlite::Result<Catalog> {
    Ok(Catalog {
        id: row.get::<_, i64>(0)? as u64,
        code: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        owner_id: row.get(4)?,
        department_id: row.get(5)?,
        state: parse_text(row, 6, CatalogState::from_db_str)?,
        flow_type: parse_text(row, 7, FlowType::from_db_str)?,
        audit_state: parse_text(row, 8, AuditState::from_db_str)?,
        audit_apply_sn: row.get::<_, i64>(9)? as u64,
        proc_def_key: row.get(10)?,
        flow_id: row.get(11)?,
        flow_node_id: row.get(12)?,
        flow_node_name: row.get(13)?,
        audit_advice: row.get(14)?,
        is_indexed: row.get::<_, i64>(15)? != 0,
        is_canceled: row.get::<_, i64>(16)? != 0,
        current_version: row.get::<_, i64>(17)? != 0,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
        published_at: row.get(20)?,
        online_at: row.get(21)?,
        offline_at: row.get(22)?,
    })
}

fn row_to_application(row: &Row) -> rusqlite::Result<DownloadApplication> {
    Ok(DownloadApplication {
        id: row.get::<_, i64>(0)? as u64,
        apply_sn: row.get::<_, i64>(1)? as u64,
        code: row.get(2)?,
        user_id: row.get(3)?,
        requested_days: row.get(4)?,
        state: parse_text(row, 5, ApplicationState::from_db_str)?,
        proc_def_key: row.get(6)?,
        audit_advice: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn row_to_grant(row: &Row) -> rusqlite::Result<DownloadGrant> {
    Ok(DownloadGrant {
        id: row.get(0)?,
        user_id: row.get(1)?,
        code: row.get(2)?,
        application_id: row.get::<_, i64>(3)? as u64,
        expires_at: row.get(4)?,
        active: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

fn row_to_history(row: &Row) -> rusqlite::Result<CatalogHistory> {
    let snapshot: String = row.get(5)?;
    Ok(CatalogHistory {
        id: row.get(0)?,
        catalog_id: row.get::<_, i64>(1)? as u64,
        code: row.get(2)?,
        state: parse_text(row, 3, CatalogState::from_db_str)?,
        reason: parse_text(row, 4, ArchiveReason::from_db_str)?,
        snapshot: serde_json::from_str(&snapshot).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
        })?,
        archived_at: row.get(6)?,
    })
}

// =============================================================================
// Queries shared by the store and its transactions
// =============================================================================

/// Collects positional parameters for dynamically built statements.
#[derive(Default)]
struct Binder {
    values: Vec<Value>,
}

impl Binder {
    fn bind(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("?{}", self.values.len())
    }

    fn bind_all<'a>(&mut self, values: impl IntoIterator<Item = &'a String>) -> String {
        values
            .into_iter()
            .map(|v| self.bind(v.clone()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

mod queries {
    use super::*;

    pub fn get_catalog(conn: &Connection, id: u64) -> Result<Option<Catalog>> {
        Ok(conn
            .query_row(
                &format!("{} WHERE id = ?1", CATALOG_SELECT),
                params![id as i64],
                row_to_catalog,
            )
            .optional()?)
    }

    pub fn update_catalog(
        conn: &Connection,
        guard: &CatalogGuard,
        changes: &CatalogChanges,
    ) -> Result<bool> {
        let mut b = Binder::default();
        let mut sets = Vec::new();

        if let Some(state) = changes.state {
            sets.push(format!("state = {}", b.bind(state.as_db_str().to_string())));
        }
        if let Some(flow_type) = changes.flow_type {
            sets.push(format!(
                "flow_type = {}",
                b.bind(flow_type.as_db_str().to_string())
            ));
        }
        if let Some(audit_state) = changes.audit_state {
            sets.push(format!(
                "audit_state = {}",
                b.bind(audit_state.as_db_str().to_string())
            ));
        }
        if let Some(sn) = changes.audit_apply_sn {
            sets.push(format!("audit_apply_sn = {}", b.bind(sn as i64)));
        }
        for (column, value) in [
            ("proc_def_key", &changes.proc_def_key),
            ("flow_id", &changes.flow_id),
            ("flow_node_id", &changes.flow_node_id),
            ("flow_node_name", &changes.flow_node_name),
            ("audit_advice", &changes.audit_advice),
        ] {
            if let Some(value) = value {
                sets.push(format!("{} = {}", column, b.bind(value.clone())));
            }
        }
        for (column, value) in [
            ("is_indexed", changes.is_indexed),
            ("is_canceled", changes.is_canceled),
            ("current_version", changes.current_version),
        ] {
            if let Some(value) = value {
                sets.push(format!("{} = {}", column, b.bind(value as i64)));
            }
        }
        for (column, value) in [
            ("published_at", changes.published_at),
            ("online_at", changes.online_at),
            ("offline_at", changes.offline_at),
        ] {
            if let Some(value) = value {
                sets.push(format!("{} = {}", column, b.bind(value)));
            }
        }
        if changes.touch {
            sets.push(format!(
                "updated_at = MAX({}, updated_at + 1)",
                b.bind(now_millis())
            ));
        }
        if sets.is_empty() {
            bail!("Catalog update for {} writes no columns", guard.id);
        }

        let mut conditions = vec![format!("id = {}", b.bind(guard.id as i64))];
        if guard.current_only {
            conditions.push("current_version = 1".to_string());
        }
        if !guard.states.is_empty() {
            let states: Vec<String> = guard
                .states
                .iter()
                .map(|s| s.as_db_str().to_string())
                .collect();
            conditions.push(format!("state IN ({})", b.bind_all(&states)));
        }
        if let Some(flow_type) = guard.flow_type {
            conditions.push(format!(
                "flow_type = {}",
                b.bind(flow_type.as_db_str().to_string())
            ));
        }
        if let Some(audit_state) = guard.audit_state {
            conditions.push(format!(
                "audit_state = {}",
                b.bind(audit_state.as_db_str().to_string())
            ));
        }
        if let Some(audit_state) = guard.audit_state_not {
            conditions.push(format!(
                "audit_state != {}",
                b.bind(audit_state.as_db_str().to_string())
            ));
        }
        if let Some(sn) = guard.audit_apply_sn {
            conditions.push(format!("audit_apply_sn = {}", b.bind(sn as i64)));
        }
        if let Some(updated_at) = guard.updated_at {
            conditions.push(format!("updated_at = {}", b.bind(updated_at)));
        }
        if let Some(is_canceled) = guard.is_canceled {
            conditions.push(format!("is_canceled = {}", b.bind(is_canceled as i64)));
        }

        let sql = format!(
            "UPDATE catalogs SET {} WHERE {}",
            sets.join(", "),
            conditions.join(" AND ")
        );
        let rows = conn.execute(&sql, params_from_iter(b.values.iter()))?;
        debug!("Catalog {} guarded update matched {} row(s)", guard.id, rows);
        Ok(rows == 1)
    }

    pub fn archive_catalog(
        conn: &Connection,
        catalog: &Catalog,
        reason: ArchiveReason,
    ) -> Result<i64> {
        let snapshot = serde_json::to_string(catalog)?;
        conn.execute(
            "INSERT INTO catalog_history (catalog_id, code, state, reason, snapshot, archived_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                catalog.id as i64,
                &catalog.code,
                catalog.state.as_db_str(),
                reason.as_db_str(),
                snapshot,
                now_millis()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_download_application(
        conn: &Connection,
        id: u64,
    ) -> Result<Option<DownloadApplication>> {
        Ok(conn
            .query_row(
                &format!("{} WHERE id = ?1", APPLICATION_SELECT),
                params![id as i64],
                row_to_application,
            )
            .optional()?)
    }

    pub fn find_pending_application(
        conn: &Connection,
        user_id: &str,
        code: &str,
    ) -> Result<Option<DownloadApplication>> {
        Ok(conn
            .query_row(
                &format!(
                    "{} WHERE user_id = ?1 AND code = ?2 AND state = 'under_review' \
                     ORDER BY id DESC LIMIT 1",
                    APPLICATION_SELECT
                ),
                params![user_id, code],
                row_to_application,
            )
            .optional()?)
    }

    pub fn find_active_grant(
        conn: &Connection,
        user_id: &str,
        code: &str,
        now: i64,
    ) -> Result<Option<DownloadGrant>> {
        Ok(conn
            .query_row(
                &format!(
                    "{} WHERE user_id = ?1 AND code = ?2 AND active = 1 AND expires_at > ?3 \
                     ORDER BY expires_at DESC LIMIT 1",
                    GRANT_SELECT
                ),
                params![user_id, code, now],
                row_to_grant,
            )
            .optional()?)
    }

    pub fn create_download_application(
        conn: &Connection,
        application: &NewDownloadApplication,
    ) -> Result<DownloadApplication> {
        let now = now_millis();
        conn.execute(
            "INSERT INTO download_applications \
             (apply_sn, code, user_id, requested_days, state, proc_def_key, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'under_review', ?5, ?6, ?6)",
            params![
                application.apply_sn as i64,
                &application.code,
                &application.user_id,
                application.requested_days,
                &application.proc_def_key,
                now
            ],
        )?;
        let id = conn.last_insert_rowid() as u64;
        get_download_application(conn, id)?
            .with_context(|| format!("Download application {} vanished after insert", id))
    }

    pub fn transition_application(
        conn: &Connection,
        id: u64,
        apply_sn: u64,
        to: ApplicationState,
        advice: Option<&str>,
    ) -> Result<bool> {
        let rows = conn.execute(
            "UPDATE download_applications \
             SET state = ?1, audit_advice = COALESCE(?2, audit_advice), updated_at = ?3 \
             WHERE id = ?4 AND apply_sn = ?5 AND state = 'under_review'",
            params![
                to.as_db_str(),
                advice,
                now_millis(),
                id as i64,
                apply_sn as i64
            ],
        )?;
        Ok(rows == 1)
    }

    pub fn insert_download_grant(
        conn: &Connection,
        application: &DownloadApplication,
        expires_at: i64,
    ) -> Result<DownloadGrant> {
        conn.execute(
            "INSERT INTO download_grants (user_id, code, application_id, expires_at, active, created_at) \
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![
                &application.user_id,
                &application.code,
                application.id as i64,
                expires_at,
                now_millis()
            ],
        )
        .with_context(|| format!("Failed to insert grant for application {}", application.id))?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
            &format!("{} WHERE id = ?1", GRANT_SELECT),
            params![id],
            row_to_grant,
        )?)
    }
}

// =============================================================================
// Transactions
// =============================================================================

struct SqliteCatalogTx<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl CatalogTx for SqliteCatalogTx<'_> {
    fn get_catalog(&self, id: u64) -> Result<Option<Catalog>> {
        queries::get_catalog(&self.conn, id)
    }

    fn update_catalog(&self, guard: &CatalogGuard, changes: &CatalogChanges) -> Result<bool> {
        queries::update_catalog(&self.conn, guard, changes)
    }

    fn archive_catalog(&self, catalog: &Catalog, reason: ArchiveReason) -> Result<i64> {
        queries::archive_catalog(&self.conn, catalog, reason)
    }

    fn find_pending_application(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<Option<DownloadApplication>> {
        queries::find_pending_application(&self.conn, user_id, code)
    }

    fn find_active_grant(
        &self,
        user_id: &str,
        code: &str,
        now: i64,
    ) -> Result<Option<DownloadGrant>> {
        queries::find_active_grant(&self.conn, user_id, code, now)
    }

    fn create_download_application(
        &self,
        application: &NewDownloadApplication,
    ) -> Result<DownloadApplication> {
        queries::create_download_application(&self.conn, application)
    }

    fn get_download_application(&self, id: u64) -> Result<Option<DownloadApplication>> {
        queries::get_download_application(&self.conn, id)
    }

    fn transition_application(
        &self,
        id: u64,
        apply_sn: u64,
        to: ApplicationState,
        advice: Option<&str>,
    ) -> Result<bool> {
        queries::transition_application(&self.conn, id, apply_sn, to, advice)
    }

    fn insert_download_grant(
        &self,
        application: &DownloadApplication,
        expires_at: i64,
    ) -> Result<DownloadGrant> {
        queries::insert_download_grant(&self.conn, application, expires_at)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute("COMMIT", [])?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteCatalogTx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute("ROLLBACK", []) {
                warn!("Failed to roll back catalog transaction: {}", e);
            }
        }
    }
}

// =============================================================================
// CatalogStore implementation
// =============================================================================

impl CatalogStore for SqliteCatalogStore {
    fn begin(&self) -> Result<Box<dyn CatalogTx + '_>> {
        let conn = self.conn()?;
        conn.execute("BEGIN IMMEDIATE", [])?;
        Ok(Box::new(SqliteCatalogTx {
            conn,
            finished: false,
        }))
    }

    fn create_catalog(&self, catalog: &NewCatalog) -> Result<Catalog> {
        self.write_tx(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM catalogs WHERE code = ?1 AND current_version = 1)",
                params![&catalog.code],
                |r| r.get(0),
            )?;
            if taken {
                bail!("Catalog with code '{}' already exists", catalog.code);
            }

            let now = now_millis();
            conn.execute(
                "INSERT INTO catalogs (code, title, description, owner_id, department_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    &catalog.code,
                    &catalog.title,
                    &catalog.description,
                    &catalog.owner_id,
                    &catalog.department_id,
                    now
                ],
            )?;
            let id = conn.last_insert_rowid() as u64;
            queries::get_catalog(conn, id)?
                .with_context(|| format!("Catalog {} vanished after insert", id))
        })
    }

    fn get_catalog(&self, id: u64) -> Result<Option<Catalog>> {
        queries::get_catalog(&*self.conn()?, id)
    }

    fn get_catalog_by_code(&self, code: &str) -> Result<Option<Catalog>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("{} WHERE code = ?1 AND current_version = 1", CATALOG_SELECT),
                params![code],
                row_to_catalog,
            )
            .optional()?)
    }

    fn update_catalog(&self, guard: &CatalogGuard, changes: &CatalogChanges) -> Result<bool> {
        queries::update_catalog(&*self.conn()?, guard, changes)
    }

    fn reject_catalogs_by_proc_def(
        &self,
        proc_def_keys: &[String],
        advice: &str,
    ) -> Result<Vec<u64>> {
        if proc_def_keys.is_empty() {
            return Ok(Vec::new());
        }
        self.write_tx(|conn| {
            let mut b = Binder::default();
            let keys = b.bind_all(proc_def_keys);
            let filter = format!(
                "current_version = 1 AND audit_state = 'under_review' AND proc_def_key IN ({})",
                keys
            );

            let mut stmt = conn.prepare(&format!("SELECT id FROM catalogs WHERE {}", filter))?;
            let ids = stmt
                .query_map(params_from_iter(b.values.iter()), |r| {
                    r.get::<_, i64>(0).map(|id| id as u64)
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let advice_param = b.bind(advice.to_string());
            let now_param = b.bind(now_millis());
            conn.execute(
                &format!(
                    "UPDATE catalogs SET audit_state = 'reject', audit_advice = {}, \
                     updated_at = MAX({}, updated_at + 1) WHERE {}",
                    advice_param, now_param, filter
                ),
                params_from_iter(b.values.iter()),
            )?;
            Ok(ids)
        })
    }

    fn list_unindexed_catalogs(&self) -> Result<Vec<Catalog>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE current_version = 1 AND is_indexed = 0 \
             AND EXISTS (SELECT 1 FROM catalog_mounts m WHERE m.catalog_id = catalogs.id) \
             ORDER BY id",
            CATALOG_SELECT
        ))?;
        let catalogs = stmt
            .query_map([], row_to_catalog)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(catalogs)
    }

    fn list_history(&self, catalog_id: u64) -> Result<Vec<CatalogHistory>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, catalog_id, code, state, reason, snapshot, archived_at \
             FROM catalog_history WHERE catalog_id = ?1 ORDER BY id",
        )?;
        let history = stmt
            .query_map(params![catalog_id as i64], row_to_history)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(history)
    }

    fn set_relations(
        &self,
        catalog_id: u64,
        kind: RelationKind,
        refs: &[NamedRef],
    ) -> Result<()> {
        self.write_tx(|conn| {
            conn.execute(
                "DELETE FROM catalog_relations WHERE catalog_id = ?1 AND kind = ?2",
                params![catalog_id as i64, kind.as_db_str()],
            )?;
            for r in refs {
                conn.execute(
                    "INSERT OR IGNORE INTO catalog_relations (catalog_id, kind, ref_id, ref_name) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![catalog_id as i64, kind.as_db_str(), &r.id, &r.name],
                )?;
            }
            Ok(())
        })
    }

    fn set_columns(&self, catalog_id: u64, columns: &[CatalogColumn]) -> Result<()> {
        self.write_tx(|conn| {
            conn.execute(
                "DELETE FROM catalog_columns WHERE catalog_id = ?1",
                params![catalog_id as i64],
            )?;
            for (position, column) in columns.iter().enumerate() {
                conn.execute(
                    "INSERT INTO catalog_columns (catalog_id, position, name, data_type, description) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        catalog_id as i64,
                        position as i64,
                        &column.name,
                        &column.data_type,
                        &column.description
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn add_mount(&self, catalog_id: u64, mount: &MountedResource) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO catalog_mounts (catalog_id, resource_type, resource_id, name) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                catalog_id as i64,
                &mount.resource_type,
                &mount.resource_id,
                &mount.name
            ],
        )?;
        Ok(())
    }

    fn get_relations(&self, catalog_id: u64) -> Result<CatalogRelations> {
        let conn = self.conn()?;
        let mut relations = CatalogRelations::default();

        let mut stmt = conn.prepare(
            "SELECT kind, ref_id, ref_name FROM catalog_relations \
             WHERE catalog_id = ?1 ORDER BY kind, ref_id",
        )?;
        let rows = stmt.query_map(params![catalog_id as i64], |r| {
            Ok((
                r.get::<_, String>(0)?,
                NamedRef {
                    id: r.get(1)?,
                    name: r.get(2)?,
                },
            ))
        })?;
        for row in rows {
            let (kind, named) = row?;
            if kind == RelationKind::BusinessObject.as_db_str() {
                relations.business_objects.push(named);
            } else if kind == RelationKind::InfoSystem.as_db_str() {
                relations.info_systems.push(named);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT name, data_type, description FROM catalog_columns \
             WHERE catalog_id = ?1 ORDER BY position",
        )?;
        relations.columns = stmt
            .query_map(params![catalog_id as i64], |r| {
                Ok(CatalogColumn {
                    name: r.get(0)?,
                    data_type: r.get(1)?,
                    description: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT resource_type, resource_id, name FROM catalog_mounts \
             WHERE catalog_id = ?1 ORDER BY resource_type, resource_id",
        )?;
        relations.mounts = stmt
            .query_map(params![catalog_id as i64], |r| {
                Ok(MountedResource {
                    resource_type: r.get(0)?,
                    resource_id: r.get(1)?,
                    name: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(relations)
    }

    fn get_audit_flow_binding(&self, audit_type: &str) -> Result<Option<AuditFlowBinding>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT audit_type, proc_def_key, updated_at FROM audit_flow_bindings \
                 WHERE audit_type = ?1",
                params![audit_type],
                |r| {
                    Ok(AuditFlowBinding {
                        audit_type: r.get(0)?,
                        proc_def_key: r.get(1)?,
                        updated_at: r.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    fn upsert_audit_flow_binding(&self, audit_type: &str, proc_def_key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_flow_bindings (audit_type, proc_def_key, updated_at) \
             VALUES (?1, ?2, ?3) \
             ON CONFLICT(audit_type) DO UPDATE SET \
             proc_def_key = excluded.proc_def_key, updated_at = excluded.updated_at",
            params![audit_type, proc_def_key, now_millis()],
        )?;
        Ok(())
    }

    fn delete_audit_flow_binding(&self, audit_type: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM audit_flow_bindings WHERE audit_type = ?1",
            params![audit_type],
        )?;
        Ok(rows > 0)
    }

    fn delete_bindings_by_proc_def(&self, proc_def_keys: &[String]) -> Result<usize> {
        if proc_def_keys.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let mut b = Binder::default();
        let keys = b.bind_all(proc_def_keys);
        let rows = conn.execute(
            &format!(
                "DELETE FROM audit_flow_bindings WHERE proc_def_key IN ({})",
                keys
            ),
            params_from_iter(b.values.iter()),
        )?;
        Ok(rows)
    }

    fn get_download_application(&self, id: u64) -> Result<Option<DownloadApplication>> {
        queries::get_download_application(&*self.conn()?, id)
    }

    fn find_pending_application(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<Option<DownloadApplication>> {
        queries::find_pending_application(&*self.conn()?, user_id, code)
    }

    fn list_pending_applications(&self, code: &str) -> Result<Vec<DownloadApplication>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE code = ?1 AND state = 'under_review' ORDER BY id",
            APPLICATION_SELECT
        ))?;
        let applications = stmt
            .query_map(params![code], row_to_application)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(applications)
    }

    fn transition_application(
        &self,
        id: u64,
        apply_sn: u64,
        to: ApplicationState,
        advice: Option<&str>,
    ) -> Result<bool> {
        queries::transition_application(&*self.conn()?, id, apply_sn, to, advice)
    }

    fn reject_applications_by_proc_def(
        &self,
        proc_def_keys: &[String],
        advice: &str,
    ) -> Result<usize> {
        if proc_def_keys.is_empty() {
            return Ok(0);
        }
        let conn = self.conn()?;
        let mut b = Binder::default();
        let advice_param = b.bind(advice.to_string());
        let now_param = b.bind(now_millis());
        let keys = b.bind_all(proc_def_keys);
        let rows = conn.execute(
            &format!(
                "UPDATE download_applications SET state = 'reject', audit_advice = {}, updated_at = {} \
                 WHERE state = 'under_review' AND proc_def_key IN ({})",
                advice_param, now_param, keys
            ),
            params_from_iter(b.values.iter()),
        )?;
        Ok(rows)
    }

    fn find_active_grant(
        &self,
        user_id: &str,
        code: &str,
        now: i64,
    ) -> Result<Option<DownloadGrant>> {
        queries::find_active_grant(&*self.conn()?, user_id, code, now)
    }

    fn get_grant_by_application(&self, application_id: u64) -> Result<Option<DownloadGrant>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                &format!("{} WHERE application_id = ?1", GRANT_SELECT),
                params![application_id as i64],
                row_to_grant,
            )
            .optional()?)
    }

    fn expire_grants(&self, now: i64) -> Result<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE download_grants SET active = 0 WHERE active = 1 AND expires_at <= ?1",
            params![now],
        )?;
        Ok(rows)
    }
}
