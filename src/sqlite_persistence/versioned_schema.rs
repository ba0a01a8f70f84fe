use anyhow::{bail, Context, Result};
use rusqlite::{params, types::Type, Connection};
use std::path::Path;
use tracing::info;

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";

/// Offset added to `PRAGMA user_version`, so a database we never touched
/// (user_version 0) cannot be mistaken for schema version 0.
pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }
}

pub struct Column<'a, S: AsRef<str>> {
    pub name: S,
    pub sql_type: &'a SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<S>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column<'static, &'static str>],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let columns_sql = self
            .columns
            .iter()
            .map(|column| {
                let mut sql = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    sql.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    sql.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    sql.push_str(&format!(" DEFAULT {}", default_value));
                }
                sql
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut create_sql = format!("CREATE TABLE {} ({}", self.name, columns_sql);
        for unique_constraint in self.unique_constraints {
            create_sql.push_str(&format!(", UNIQUE ({})", unique_constraint.join(", ")));
        }
        create_sql.push_str(");");
        conn.execute(&create_sql, params![])?;

        for (index_name, column_names) in self.indices {
            conn.execute(
                &format!(
                    "CREATE INDEX {} ON {}({});",
                    index_name, self.name, column_names
                ),
                params![],
            )?;
        }
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual_columns = stmt
            .query_map(params![], |row| {
                let sql_type = match row.get::<_, String>(2)?.as_str() {
                    "TEXT" => &SqlType::Text,
                    "INTEGER" => &SqlType::Integer,
                    _ => {
                        return Err(rusqlite::Error::InvalidColumnType(
                            2,
                            "".to_string(),
                            Type::Text,
                        ))
                    }
                };
                Ok(Column {
                    name: row.get::<_, String>(1)?,
                    sql_type,
                    non_null: row.get::<_, i32>(3)? == 1,
                    default_value: row.get::<_, Option<String>>(4)?,
                    is_primary_key: row.get::<_, i32>(5)? == 1,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read columns of table {}", self.name))?;

        if actual_columns.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {}",
                self.name,
                actual_columns.len(),
                self.columns.len()
            );
        }

        for (actual, expected) in actual_columns.iter().zip(self.columns.iter()) {
            if actual.name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    actual.name
                );
            }
            if actual.sql_type != expected.sql_type {
                bail!(
                    "Table {} column {} type mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.sql_type,
                    actual.sql_type
                );
            }
            if actual.non_null != expected.non_null {
                bail!(
                    "Table {} column {} non-null mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.non_null,
                    actual.non_null
                );
            }
            if actual.is_primary_key != expected.is_primary_key {
                bail!(
                    "Table {} column {} primary key mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.is_primary_key,
                    actual.is_primary_key
                );
            }
            // SQLite may wrap default expressions in parentheses
            let actual_default = actual
                .default_value
                .as_deref()
                .map(strip_leading_and_trailing_parentheses);
            let expected_default = expected
                .default_value
                .map(strip_leading_and_trailing_parentheses);
            if actual_default != expected_default {
                bail!(
                    "Table {} column {} default value mismatch: expected {:?}, got {:?}",
                    self.name,
                    expected.name,
                    expected.default_value,
                    actual.default_value
                );
            }
        }

        for (index_name, _) in self.indices {
            let index_exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(true),
                )
                .unwrap_or(false);
            if !index_exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

fn strip_leading_and_trailing_parentheses<S: AsRef<str>>(s: S) -> String {
    let s = s.as_ref();
    if s.starts_with('(') && s.ends_with(')') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

/// Opens (or creates) a SQLite database and brings it to the latest version
/// in `schemas`, validating the structure of the version found on disk.
pub fn open_versioned_db<P: AsRef<Path>>(
    db_path: P,
    schemas: &'static [VersionedSchema],
) -> Result<Connection> {
    let latest = schemas.last().context("No schemas defined")?;
    let db_path = db_path.as_ref();

    if !db_path.exists() {
        let conn = Connection::open(db_path)?;
        latest.create(&conn)?;
        info!(
            "Created new database at {:?} (schema version {})",
            db_path, latest.version
        );
        return Ok(conn);
    }

    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_URI
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open database {:?}", db_path))?;
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    let db_version = conn
        .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
        .context("Failed to read database version")?
        - BASE_DB_VERSION as i64;
    if db_version < 0 {
        bail!(
            "Database {:?} version {} is too old, does not contain base db version {}",
            db_path,
            db_version,
            BASE_DB_VERSION
        );
    }
    let version = db_version as usize;
    let schema = schemas.get(version).with_context(|| {
        format!(
            "Database version {} is too new (max supported: {})",
            version, latest.version
        )
    })?;
    schema.validate(&conn)?;

    if version < latest.version {
        for schema in schemas.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Migrating {:?} to version {}", db_path, schema.version);
                migration_fn(&conn)?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest.version),
            [],
        )?;
    }
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_column;
    use tempfile::TempDir;

    const BINDINGS_TABLE: Table = Table {
        name: "bindings",
        columns: &[
            sqlite_column!("audit_type", &SqlType::Text, is_primary_key = true),
            sqlite_column!("proc_def_key", &SqlType::Text, non_null = true),
            sqlite_column!(
                "updated_at",
                &SqlType::Integer,
                non_null = true,
                default_value = Some(DEFAULT_TIMESTAMP)
            ),
        ],
        indices: &[("idx_bindings_key", "proc_def_key")],
        unique_constraints: &[],
    };

    const SCHEMAS_V0: &[VersionedSchema] = &[VersionedSchema {
        version: 0,
        tables: &[BINDINGS_TABLE],
        migration: None,
    }];

    #[test]
    fn creates_and_validates_table() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS_V0[0].create(&conn).unwrap();
        SCHEMAS_V0[0].validate(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, BASE_DB_VERSION as i64);
    }

    #[test]
    fn validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE bindings (audit_type TEXT PRIMARY KEY, proc_def_key TEXT NOT NULL, \
             updated_at INTEGER NOT NULL DEFAULT (cast(strftime('%s','now') as int)))",
            [],
        )
        .unwrap();

        let err = SCHEMAS_V0[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
        assert!(err.contains("idx_bindings_key"));
    }

    #[test]
    fn validate_detects_nullability_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE bindings (audit_type TEXT PRIMARY KEY, proc_def_key TEXT, \
             updated_at INTEGER NOT NULL DEFAULT (cast(strftime('%s','now') as int)))",
            [],
        )
        .unwrap();
        conn.execute("CREATE INDEX idx_bindings_key ON bindings(proc_def_key)", [])
            .unwrap();

        let err = SCHEMAS_V0[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("non-null mismatch"));
    }

    fn add_comment_column(conn: &Connection) -> Result<()> {
        conn.execute("ALTER TABLE bindings ADD COLUMN comment TEXT", [])?;
        Ok(())
    }

    const BINDINGS_TABLE_V1: Table = Table {
        name: "bindings",
        columns: &[
            sqlite_column!("audit_type", &SqlType::Text, is_primary_key = true),
            sqlite_column!("proc_def_key", &SqlType::Text, non_null = true),
            sqlite_column!(
                "updated_at",
                &SqlType::Integer,
                non_null = true,
                default_value = Some(DEFAULT_TIMESTAMP)
            ),
            sqlite_column!("comment", &SqlType::Text),
        ],
        indices: &[("idx_bindings_key", "proc_def_key")],
        unique_constraints: &[],
    };

    const SCHEMAS_V1: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[BINDINGS_TABLE],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[BINDINGS_TABLE_V1],
            migration: Some(add_comment_column),
        },
    ];

    #[test]
    fn open_versioned_db_migrates_old_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");

        drop(open_versioned_db(&path, SCHEMAS_V0).unwrap());
        let conn = open_versioned_db(&path, SCHEMAS_V1).unwrap();

        SCHEMAS_V1[1].validate(&conn).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, (BASE_DB_VERSION + 1) as i64);
    }

    #[test]
    fn open_versioned_db_rejects_unknown_newer_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");

        drop(open_versioned_db(&path, SCHEMAS_V1).unwrap());
        assert!(open_versioned_db(&path, SCHEMAS_V0).is_err());
    }
}
