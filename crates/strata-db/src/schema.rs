//! Declarative table definitions and their SQLite DDL rendering.
//!
//! A [`TableDefinition`] is built up with ordered calls and only turned into
//! statements when a migration runs, so that the configured [`SchemaDialect`]
//! can decide convention defaults (timestamp nullability, reference indexes).

use std::collections::HashSet;
use std::fmt;

use strata_common::{Error, Result};

use crate::dialect::SchemaDialect;
use crate::validation::IdentifierValidator;

/// Semantic column type, mapped onto a SQLite declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key.
    PrimaryKey,
    Integer,
    BigInteger,
    String { limit: Option<u32> },
    Text,
    Boolean,
    Float,
    Decimal { precision: u8, scale: u8 },
    Date,
    DateTime,
    Binary,
}

impl ColumnType {
    pub fn string() -> Self {
        ColumnType::String { limit: None }
    }

    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::PrimaryKey => "integer".to_string(),
            ColumnType::Integer => "integer".to_string(),
            ColumnType::BigInteger => "bigint".to_string(),
            ColumnType::String { limit: Some(limit) } => format!("varchar({limit})"),
            ColumnType::String { limit: None } => "varchar".to_string(),
            ColumnType::Text => "text".to_string(),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Float => "float".to_string(),
            ColumnType::Decimal { precision, scale } => format!("decimal({precision},{scale})"),
            ColumnType::Date => "date".to_string(),
            ColumnType::DateTime => "datetime(6)".to_string(),
            ColumnType::Binary => "blob".to_string(),
        }
    }
}

/// Default value clause for a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDefault {
    Literal(String),
    Integer(i64),
    Boolean(bool),
    CurrentTimestamp,
}

impl ColumnDefault {
    pub fn to_sql(&self) -> String {
        match self {
            ColumnDefault::Literal(value) => format!("'{}'", value.replace('\'', "''")),
            ColumnDefault::Integer(value) => value.to_string(),
            ColumnDefault::Boolean(true) => "1".to_string(),
            ColumnDefault::Boolean(false) => "0".to_string(),
            ColumnDefault::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    default: Option<ColumnDefault>,
}

impl ColumnDefinition {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn default_value(&self) -> Option<&ColumnDefault> {
        self.default.as_ref()
    }

    /// Column clause as used inside CREATE TABLE and ALTER TABLE ADD COLUMN.
    pub fn to_sql(&self) -> Result<String> {
        let mut sql = format!(
            "{} {}",
            IdentifierValidator::quote(&self.name)?,
            self.column_type.to_sql()
        );
        if self.column_type == ColumnType::PrimaryKey {
            sql.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql());
        }
        Ok(sql)
    }
}

/// Action taken by the database when a referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    Restrict,
    NoAction,
    SetDefault,
}

impl ReferentialAction {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// Delete and update behavior of a foreign key. There is deliberately no
/// `Default`: every reference states its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyPolicy {
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl ForeignKeyPolicy {
    pub fn new(on_delete: ReferentialAction, on_update: ReferentialAction) -> Self {
        Self {
            on_delete,
            on_update,
        }
    }

    /// Refuse to delete a referenced row; updates are left to the database.
    pub fn restrict() -> Self {
        Self::new(ReferentialAction::Restrict, ReferentialAction::NoAction)
    }

    pub fn cascade() -> Self {
        Self::new(ReferentialAction::Cascade, ReferentialAction::Cascade)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub policy: ForeignKeyPolicy,
}

impl ForeignKey {
    pub fn new(
        column: impl Into<String>,
        references_table: impl Into<String>,
        policy: ForeignKeyPolicy,
    ) -> Self {
        Self {
            column: column.into(),
            references_table: references_table.into(),
            references_column: "id".to_string(),
            policy,
        }
    }

    fn to_sql(&self) -> Result<String> {
        Ok(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            IdentifierValidator::quote(&self.column)?,
            IdentifierValidator::quote(&self.references_table)?,
            IdentifierValidator::quote(&self.references_column)?,
            self.policy.on_delete,
            self.policy.on_update,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    name: String,
    table: String,
    columns: Vec<String>,
    unique: bool,
}

impl IndexDefinition {
    /// Index named `index_<table>_on_<col>_and_<col>`.
    pub fn new(table: impl Into<String>, columns: &[&str]) -> Self {
        let table = table.into();
        let name = format!("index_{}_on_{}", table, columns.join("_and_"));
        Self {
            name,
            table,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn to_sql(&self) -> Result<String> {
        if self.columns.is_empty() {
            return Err(Error::InvalidDefinition(format!(
                "index {} has no columns",
                self.name
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| IdentifierValidator::quote(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            IdentifierValidator::quote(&self.name)?,
            IdentifierValidator::quote(&self.table)?,
            columns.join(", ")
        ))
    }
}

/// A table to be created, described column by column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    name: String,
    columns: Vec<ColumnDefinition>,
    foreign_keys: Vec<ForeignKey>,
    indexes: Vec<IndexDefinition>,
    references: Vec<String>,
    timestamps: bool,
}

impl TableDefinition {
    /// A table with an auto-incrementing `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self::without_primary_key(name).primary_key("id")
    }

    pub fn without_primary_key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            references: Vec::new(),
            timestamps: false,
        }
    }

    pub fn primary_key(self, name: &str) -> Self {
        self.add_column(ColumnDefinition::new(name, ColumnType::PrimaryKey).not_null())
    }

    pub fn add_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a not-null `<singular>_id` column referencing the pluralised
    /// table's `id`.
    pub fn references(self, singular: &str, policy: ForeignKeyPolicy) -> Self {
        let table = pluralize(singular);
        self.references_table(singular, &table, policy)
    }

    /// Like [`references`](Self::references) with an explicit target table.
    pub fn references_table(mut self, singular: &str, table: &str, policy: ForeignKeyPolicy) -> Self {
        let column = format!("{singular}_id");
        self.columns
            .push(ColumnDefinition::new(column.clone(), ColumnType::Integer).not_null());
        self.foreign_keys
            .push(ForeignKey::new(column.clone(), table, policy));
        self.references.push(column);
        self
    }

    pub fn foreign_key(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn index(mut self, columns: &[&str]) -> Self {
        let index = IndexDefinition::new(self.name.clone(), columns);
        self.indexes.push(index);
        self
    }

    pub fn unique_index(mut self, columns: &[&str]) -> Self {
        let index = IndexDefinition::new(self.name.clone(), columns).unique();
        self.indexes.push(index);
        self
    }

    /// Add `created_at` and `updated_at`; `updated_at` is refreshed on update.
    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// The ordered columns this table will have under `dialect`.
    pub fn columns(&self, dialect: &SchemaDialect) -> Vec<ColumnDefinition> {
        let mut columns = self.columns.clone();
        if self.timestamps {
            for name in ["created_at", "updated_at"] {
                columns.push(
                    ColumnDefinition::new(name, ColumnType::DateTime)
                        .nullable(!dialect.timestamps_not_null())
                        .default(ColumnDefault::CurrentTimestamp),
                );
            }
        }
        columns
    }

    /// The indexes this table will have under `dialect`.
    pub fn indexes(&self, dialect: &SchemaDialect) -> Vec<IndexDefinition> {
        let mut indexes = Vec::new();
        if dialect.indexes_references() {
            for column in &self.references {
                indexes.push(IndexDefinition::new(self.name.clone(), &[column.as_str()]));
            }
        }
        indexes.extend(self.indexes.iter().cloned());
        indexes
    }

    /// CREATE TABLE followed by its indexes and the `updated_at` trigger.
    pub fn create_statements(&self, dialect: &SchemaDialect) -> Result<Vec<String>> {
        let table = IdentifierValidator::quote(&self.name)?;
        let columns = self.columns(dialect);
        if columns.is_empty() {
            return Err(Error::InvalidDefinition(format!(
                "table {} has no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name()) {
                return Err(Error::InvalidDefinition(format!(
                    "column {}.{} is declared twice",
                    self.name,
                    column.name()
                )));
            }
        }
        for foreign_key in &self.foreign_keys {
            if !seen.contains(foreign_key.column.as_str()) {
                return Err(Error::InvalidDefinition(format!(
                    "foreign key on unknown column {}.{}",
                    self.name, foreign_key.column
                )));
            }
        }

        let mut clauses = columns
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect::<Result<Vec<_>>>()?;
        for foreign_key in &self.foreign_keys {
            clauses.push(foreign_key.to_sql()?);
        }

        let mut statements = vec![format!(
            "CREATE TABLE {table} ({})",
            clauses.join(", ")
        )];
        for index in self.indexes(dialect) {
            statements.push(index.to_sql()?);
        }
        if self.timestamps {
            statements.push(self.touch_trigger_sql()?);
        }
        Ok(statements)
    }

    fn touch_trigger_sql(&self) -> Result<String> {
        let table = IdentifierValidator::quote(&self.name)?;
        let trigger = IdentifierValidator::quote(&format!("{}_touch_updated_at", self.name))?;
        // Skip when the statement itself assigned updated_at.
        Ok(format!(
            "CREATE TRIGGER {trigger} AFTER UPDATE ON {table} FOR EACH ROW \
             WHEN NEW.\"updated_at\" IS OLD.\"updated_at\" \
             BEGIN UPDATE {table} SET \"updated_at\" = CURRENT_TIMESTAMP \
             WHERE rowid = NEW.rowid; END"
        ))
    }
}

/// Pluralise a snake_case word with simple English heuristics.
pub fn pluralize(word: &str) -> String {
    if word.ends_with('s')
        || word.ends_with('x')
        || word.ends_with("ch")
        || word.ends_with("sh")
    {
        format!("{word}es")
    } else if word.ends_with('y')
        && !word.ends_with("ey")
        && !word.ends_with("ay")
        && !word.ends_with("oy")
        && !word.ends_with("uy")
    {
        format!("{}ies", &word[..word.len() - 1])
    } else {
        format!("{word}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn articles() -> TableDefinition {
        TableDefinition::new("articles")
            .references("account", ForeignKeyPolicy::restrict())
            .add_column(ColumnDefinition::new("title", ColumnType::string()))
            .add_column(ColumnDefinition::new("body", ColumnType::Text))
            .timestamps()
    }

    #[test]
    fn columns_keep_declaration_order() {
        let names: Vec<_> = articles()
            .columns(&SchemaDialect::CURRENT)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(
            names,
            ["id", "account_id", "title", "body", "created_at", "updated_at"]
        );
    }

    #[test]
    fn renders_create_table_with_foreign_key() {
        let statements = articles().create_statements(&SchemaDialect::CURRENT).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE \"articles\" ("));
        assert!(statements[0].contains("\"id\" integer PRIMARY KEY AUTOINCREMENT NOT NULL"));
        assert!(statements[0].contains("\"account_id\" integer NOT NULL"));
        assert!(statements[0].contains(
            "FOREIGN KEY (\"account_id\") REFERENCES \"accounts\" (\"id\") ON DELETE RESTRICT ON UPDATE NO ACTION"
        ));
        assert!(statements[0].contains("\"updated_at\" datetime(6) NOT NULL DEFAULT CURRENT_TIMESTAMP"));
        assert_eq!(
            statements[1],
            "CREATE INDEX \"index_articles_on_account_id\" ON \"articles\" (\"account_id\")"
        );
        assert!(statements[2].starts_with("CREATE TRIGGER \"articles_touch_updated_at\""));
    }

    #[test]
    fn legacy_dialect_skips_reference_index_and_relaxes_timestamps() {
        let legacy = SchemaDialect::new(4, 2);
        let statements = articles().create_statements(&legacy).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("\"created_at\" datetime(6) DEFAULT CURRENT_TIMESTAMP"));
        assert!(!statements.iter().any(|s| s.starts_with("CREATE INDEX")));
    }

    #[test]
    fn rejects_duplicate_columns() {
        let table = TableDefinition::new("things")
            .add_column(ColumnDefinition::new("id", ColumnType::Integer));
        let err = table.create_statements(&SchemaDialect::CURRENT).unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition(_)));
    }

    #[test]
    fn rejects_foreign_key_on_missing_column() {
        let table = TableDefinition::new("things").foreign_key(ForeignKey::new(
            "owner_id",
            "owners",
            ForeignKeyPolicy::cascade(),
        ));
        assert!(table.create_statements(&SchemaDialect::CURRENT).is_err());
    }

    #[test]
    fn rejects_invalid_identifiers() {
        let table = TableDefinition::new("bad name");
        let err = table.create_statements(&SchemaDialect::CURRENT).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
    }

    #[test]
    fn literal_defaults_are_escaped() {
        let column = ColumnDefinition::new("state", ColumnType::string())
            .default(ColumnDefault::Literal("it's".into()));
        assert_eq!(column.to_sql().unwrap(), "\"state\" varchar DEFAULT 'it''s'");
    }

    #[test]
    fn index_names_follow_columns() {
        let index = IndexDefinition::new("articles", &["account_id", "title"]).unique();
        assert_eq!(index.name(), "index_articles_on_account_id_and_title");
        assert_eq!(
            index.to_sql().unwrap(),
            "CREATE UNIQUE INDEX \"index_articles_on_account_id_and_title\" ON \"articles\" (\"account_id\", \"title\")"
        );
    }

    #[test]
    fn pluralizes_common_words() {
        assert_eq!(pluralize("account"), "accounts");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("day"), "days");
    }
}
