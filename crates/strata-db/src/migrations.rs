//! Migration units for tracking and applying database schema changes.
//!
//! Each migration has a version number, a forward action, and optionally a
//! reverse action. Migrations are applied in version order and tracked in the
//! bookkeeping table (see [`crate::ledger`]).

use std::collections::BTreeMap;

use strata_common::{Error, Result};

use crate::dialect::SchemaDialect;
use crate::schema::{
    ColumnDefinition, ColumnType, ForeignKeyPolicy, IndexDefinition, TableDefinition,
};
use crate::validation::IdentifierValidator;

/// One step of a forward or reverse action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    CreateTable(TableDefinition),
    DropTable(String),
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    RemoveColumn {
        table: String,
        column: String,
    },
    AddIndex(IndexDefinition),
    RemoveIndex(String),
    /// Raw SQL, possibly several statements.
    Sql(String),
}

impl SchemaChange {
    /// The statements this change executes under `dialect`.
    pub fn statements(&self, dialect: &SchemaDialect) -> Result<Vec<String>> {
        match self {
            SchemaChange::CreateTable(table) => table.create_statements(dialect),
            SchemaChange::DropTable(table) => Ok(vec![format!(
                "DROP TABLE {}",
                IdentifierValidator::quote(table)?
            )]),
            SchemaChange::AddColumn { table, column } => Ok(vec![format!(
                "ALTER TABLE {} ADD COLUMN {}",
                IdentifierValidator::quote(table)?,
                column.to_sql()?
            )]),
            SchemaChange::RemoveColumn { table, column } => Ok(vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                IdentifierValidator::quote(table)?,
                IdentifierValidator::quote(column)?
            )]),
            SchemaChange::AddIndex(index) => Ok(vec![index.to_sql()?]),
            SchemaChange::RemoveIndex(name) => Ok(vec![format!(
                "DROP INDEX {}",
                IdentifierValidator::quote(name)?
            )]),
            SchemaChange::Sql(sql) => {
                if sql.trim().is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![sql.clone()])
                }
            }
        }
    }

    /// The change that undoes this one, when it can be derived.
    pub fn invert(&self) -> Option<SchemaChange> {
        match self {
            SchemaChange::CreateTable(table) => {
                Some(SchemaChange::DropTable(table.name().to_string()))
            }
            SchemaChange::AddColumn { table, column } => Some(SchemaChange::RemoveColumn {
                table: table.clone(),
                column: column.name().to_string(),
            }),
            SchemaChange::AddIndex(index) => {
                Some(SchemaChange::RemoveIndex(index.name().to_string()))
            }
            SchemaChange::DropTable(_)
            | SchemaChange::RemoveColumn { .. }
            | SchemaChange::RemoveIndex(_)
            | SchemaChange::Sql(_) => None,
        }
    }
}

/// A versioned schema-change unit. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    version: i64,
    name: String,
    up: Vec<SchemaChange>,
    down: Option<Vec<SchemaChange>>,
}

impl Migration {
    /// A forward-only migration.
    pub fn new(version: i64, name: impl Into<String>, up: Vec<SchemaChange>) -> Self {
        Self {
            version,
            name: name.into(),
            up,
            down: None,
        }
    }

    pub fn with_down(mut self, down: Vec<SchemaChange>) -> Self {
        self.down = Some(down);
        self
    }

    /// A migration whose reverse action is derived by inverting `changes` in
    /// reverse order. If any change cannot be inverted there is no reverse
    /// action.
    pub fn reversible(version: i64, name: impl Into<String>, changes: Vec<SchemaChange>) -> Self {
        let down = changes
            .iter()
            .rev()
            .map(SchemaChange::invert)
            .collect::<Option<Vec<_>>>();
        Self {
            version,
            name: name.into(),
            up: changes,
            down,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn up(&self) -> &[SchemaChange] {
        &self.up
    }

    pub fn down(&self) -> Option<&[SchemaChange]> {
        self.down.as_deref()
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    /// Render both actions so that malformed definitions surface before any
    /// statement runs.
    fn check(&self, dialect: &SchemaDialect) -> Result<()> {
        let actions = std::iter::once(self.up.as_slice()).chain(self.down.as_deref());
        for action in actions {
            for change in action {
                change
                    .statements(dialect)
                    .map_err(|e| Error::InvalidMigration {
                        version: self.version,
                        reason: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }
}

/// The known migrations, unique by version and sorted ascending.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(migrations: Vec<Migration>, dialect: &SchemaDialect) -> Result<Self> {
        let mut by_version = BTreeMap::new();
        for migration in migrations {
            if migration.version() <= 0 {
                return Err(Error::InvalidMigration {
                    version: migration.version(),
                    reason: "version must be positive".to_string(),
                });
            }
            migration.check(dialect)?;
            let version = migration.version();
            if by_version.insert(version, migration).is_some() {
                return Err(Error::DuplicateVersion(version));
            }
        }
        Ok(Self {
            migrations: by_version.into_values().collect(),
        })
    }

    pub fn get(&self, version: i64) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, Migration::version)
            .ok()
            .map(|index| &self.migrations[index])
    }

    pub fn contains(&self, version: i64) -> bool {
        self.get(version).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

pub const CREATE_ACCOUNTS_VERSION: i64 = 20220220104700;
pub const CREATE_ARTICLES_VERSION: i64 = 20220220104732;

pub fn create_accounts() -> Migration {
    Migration::reversible(
        CREATE_ACCOUNTS_VERSION,
        "create_accounts",
        vec![SchemaChange::CreateTable(
            TableDefinition::new("accounts")
                .add_column(ColumnDefinition::new("name", ColumnType::string()).not_null())
                .timestamps(),
        )],
    )
}

/// `articles` belongs to `accounts`; deleting an account with articles is
/// refused.
pub fn create_articles() -> Migration {
    Migration::reversible(
        CREATE_ARTICLES_VERSION,
        "create_articles",
        vec![SchemaChange::CreateTable(
            TableDefinition::new("articles")
                .references("account", ForeignKeyPolicy::restrict())
                .add_column(ColumnDefinition::new("title", ColumnType::string()))
                .add_column(ColumnDefinition::new("body", ColumnType::Text))
                .timestamps(),
        )],
    )
}

/// The migrations shipped with the crate, in version order.
pub fn builtin() -> Vec<Migration> {
    vec![create_accounts(), create_articles()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversible_migration_inverts_in_reverse_order() {
        let migration = Migration::reversible(
            1,
            "add_summary",
            vec![
                SchemaChange::AddColumn {
                    table: "articles".into(),
                    column: ColumnDefinition::new("summary", ColumnType::Text),
                },
                SchemaChange::AddIndex(IndexDefinition::new("articles", &["summary"])),
            ],
        );
        assert_eq!(
            migration.down().unwrap(),
            &[
                SchemaChange::RemoveIndex("index_articles_on_summary".into()),
                SchemaChange::RemoveColumn {
                    table: "articles".into(),
                    column: "summary".into(),
                },
            ]
        );
    }

    #[test]
    fn raw_sql_is_not_reversible() {
        let migration = Migration::reversible(
            1,
            "backfill",
            vec![SchemaChange::Sql("UPDATE articles SET title = 'x'".into())],
        );
        assert!(!migration.is_reversible());

        let migration = migration.with_down(vec![SchemaChange::Sql(String::new())]);
        assert!(migration.is_reversible());
    }

    #[test]
    fn create_articles_reverses_to_drop_table() {
        let migration = create_articles();
        assert_eq!(migration.version(), 20220220104732);
        assert_eq!(
            migration.down().unwrap(),
            &[SchemaChange::DropTable("articles".into())]
        );
    }

    #[test]
    fn set_sorts_by_version() {
        let set = MigrationSet::new(
            vec![create_articles(), create_accounts()],
            &SchemaDialect::CURRENT,
        )
        .unwrap();
        let versions: Vec<_> = set.iter().map(Migration::version).collect();
        assert_eq!(versions, [CREATE_ACCOUNTS_VERSION, CREATE_ARTICLES_VERSION]);
        assert!(set.contains(CREATE_ARTICLES_VERSION));
        assert!(set.get(1).is_none());
    }

    #[test]
    fn set_rejects_duplicate_versions() {
        let err = MigrationSet::new(
            vec![create_articles(), create_articles()],
            &SchemaDialect::CURRENT,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateVersion(CREATE_ARTICLES_VERSION)));
    }

    #[test]
    fn set_rejects_malformed_definitions_up_front() {
        let broken = Migration::new(
            7,
            "broken",
            vec![SchemaChange::DropTable("no such; table".into())],
        );
        let err = MigrationSet::new(vec![broken], &SchemaDialect::CURRENT).unwrap_err();
        match err {
            Error::InvalidMigration { version, reason } => {
                assert_eq!(version, 7);
                assert!(reason.contains("no such; table"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn set_rejects_non_positive_versions() {
        let zero = Migration::new(0, "zero", Vec::new());
        assert!(MigrationSet::new(vec![zero], &SchemaDialect::CURRENT).is_err());
    }
}
