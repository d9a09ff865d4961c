//! Read the live schema back out of SQLite.

use rusqlite::{Connection, params};
use serde::Serialize;
use strata_common::{Error, Result};

use crate::validation::IdentifierValidator;

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

/// One row of `PRAGMA foreign_key_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyInfo {
    pub from: String,
    pub table: String,
    /// `None` when the reference names only the table, which targets its
    /// primary key.
    pub to: Option<String>,
    pub on_update: String,
    pub on_delete: String,
}

/// Everything `describe` reports about one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub indexes: Vec<String>,
}

pub fn describe(conn: &Connection, table: &str) -> Result<Option<TableDescription>> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }
    Ok(Some(TableDescription {
        name: table.to_string(),
        columns: columns(conn, table)?,
        foreign_keys: foreign_keys(conn, table)?,
        indexes: indexes(conn, table)?,
    }))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to check table {table}: {e}")))
}

/// Columns of `table` in declaration order; empty when the table is absent.
pub fn columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    IdentifierValidator::validate(table)?;
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{table}\")"))
        .map_err(|e| Error::Database(format!("failed to prepare table_info: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                declared_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default: row.get(4)?,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })
        .map_err(|e| Error::Database(format!("failed to read columns of {table}: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect columns of {table}: {e}")))
}

pub fn foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyInfo>> {
    IdentifierValidator::validate(table)?;
    let mut stmt = conn
        .prepare(&format!("PRAGMA foreign_key_list(\"{table}\")"))
        .map_err(|e| Error::Database(format!("failed to prepare foreign_key_list: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ForeignKeyInfo {
                table: row.get(2)?,
                from: row.get(3)?,
                to: row.get(4)?,
                on_update: row.get(5)?,
                on_delete: row.get(6)?,
            })
        })
        .map_err(|e| Error::Database(format!("failed to read foreign keys of {table}: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect foreign keys of {table}: {e}")))
}

/// Index names on `table`, sorted, excluding SQLite's automatic indexes.
pub fn indexes(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type='index' AND tbl_name=?1 AND sql IS NOT NULL
             ORDER BY name",
        )
        .map_err(|e| Error::Database(format!("failed to prepare index query: {e}")))?;

    let rows = stmt
        .query_map(params![table], |row| row.get(0))
        .map_err(|e| Error::Database(format!("failed to read indexes of {table}: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect indexes of {table}: {e}")))
}

/// The `CREATE ...` text of every user object, ordered by type and name.
/// Two databases with equal dumps have the same schema.
pub fn schema_dump(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT sql FROM sqlite_master
             WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%'
             ORDER BY type, name",
        )
        .map_err(|e| Error::Database(format!("failed to prepare schema dump: {e}")))?;

    let rows = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| Error::Database(format!("failed to dump schema: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect schema dump: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_columns_and_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE owners (id INTEGER PRIMARY KEY);
             CREATE TABLE pets (
                id INTEGER PRIMARY KEY,
                owner_id INTEGER NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
                nickname TEXT DEFAULT 'rex'
             );",
        )
        .unwrap();

        let cols = columns(&conn, "pets").unwrap();
        assert_eq!(cols.len(), 3);
        assert!(cols[0].primary_key);
        assert!(cols[1].not_null);
        assert_eq!(cols[2].default.as_deref(), Some("'rex'"));

        let fks = foreign_keys(&conn, "pets").unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].from, "owner_id");
        assert_eq!(fks[0].table, "owners");
        assert_eq!(fks[0].to.as_deref(), Some("id"));
        assert_eq!(fks[0].on_delete, "CASCADE");
    }

    #[test]
    fn reference_to_implicit_primary_key_has_no_target_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE owners (id INTEGER PRIMARY KEY);
             CREATE TABLE pets (id INTEGER PRIMARY KEY, owner_id INTEGER REFERENCES owners);",
        )
        .unwrap();

        let pets = describe(&conn, "pets").unwrap().unwrap();
        assert_eq!(pets.foreign_keys.len(), 1);
        assert_eq!(pets.foreign_keys[0].table, "owners");
        assert_eq!(pets.foreign_keys[0].to, None);
    }

    #[test]
    fn missing_table_has_no_columns() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(columns(&conn, "nothing").unwrap().is_empty());
        assert!(!table_exists(&conn, "nothing").unwrap());
    }
}
