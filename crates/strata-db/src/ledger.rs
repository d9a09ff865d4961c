use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use strata_common::{Error, Result};

use crate::validation::IdentifierValidator;

pub const DEFAULT_TABLE: &str = "schema_migrations";

/// A persisted record of a successfully applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub applied_at: DateTime<Utc>,
}

/// The bookkeeping table: one row per applied migration, keyed by version.
///
/// All methods take a plain connection so they can run inside the caller's
/// transaction (`rusqlite::Transaction` derefs to `Connection`).
#[derive(Debug, Clone)]
pub struct Ledger {
    name: String,
    quoted: String,
}

impl Ledger {
    pub fn new(table: &str) -> Result<Self> {
        Ok(Self {
            name: table.to_string(),
            quoted: IdentifierValidator::quote(table)?,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.name
    }

    pub fn ensure(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP NOT NULL
            )",
            self.quoted
        ))
        .map_err(|e| Error::Database(format!("failed to create {}: {e}", self.name)))
    }

    fn exists(&self, conn: &Connection) -> Result<bool> {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            params![self.name],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to check {}: {e}", self.name)))
    }

    /// All applied records in ascending version order. A missing table reads
    /// as empty so that this stays free of side effects.
    pub fn applied(&self, conn: &Connection) -> Result<Vec<AppliedMigration>> {
        if !self.exists(conn)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, applied_at FROM {} ORDER BY version ASC",
                self.quoted
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    applied_at: parse_datetime(1, &row.get::<_, String>(1)?)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to query {}: {e}", self.name)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?,
            );
        }
        Ok(records)
    }

    pub fn is_applied(&self, conn: &Connection, version: i64) -> Result<bool> {
        if !self.exists(conn)? {
            return Ok(false);
        }
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE version = ?1", self.quoted),
                params![version],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to look up {version}: {e}")))?;
        Ok(found.is_some())
    }

    /// The highest applied version, if any.
    pub fn latest(&self, conn: &Connection) -> Result<Option<AppliedMigration>> {
        if !self.exists(conn)? {
            return Ok(None);
        }
        conn.query_row(
            &format!(
                "SELECT version, applied_at FROM {} ORDER BY version DESC LIMIT 1",
                self.quoted
            ),
            [],
            |row| {
                Ok(AppliedMigration {
                    version: row.get(0)?,
                    applied_at: parse_datetime(1, &row.get::<_, String>(1)?)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to read latest migration: {e}")))
    }

    /// Insert the record for `version`. A primary-key collision means another
    /// runner got there first and maps to `DuplicateApplication`.
    pub fn record(&self, conn: &Connection, version: i64, applied_at: DateTime<Utc>) -> Result<()> {
        let result = conn.execute(
            &format!(
                "INSERT INTO {} (version, applied_at) VALUES (?1, ?2)",
                self.quoted
            ),
            params![version, applied_at.to_rfc3339()],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(Error::DuplicateApplication { version })
            }
            Err(e) => Err(Error::Database(format!("failed to record {version}: {e}"))),
        }
    }

    /// Delete the record for `version`, returning whether one existed.
    pub fn remove(&self, conn: &Connection, version: i64) -> Result<bool> {
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE version = ?1", self.quoted),
                params![version],
            )
            .map_err(|e| Error::Database(format!("failed to remove {version}: {e}")))?;
        Ok(deleted > 0)
    }
}

/// Parse a stored `applied_at`. Unreadable values are a conversion error on
/// column `idx` so a corrupted ledger surfaces instead of reading as epoch.
fn parse_datetime(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // rows written by hand may use SQLite's "YYYY-MM-DD HH:MM:SS"
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
