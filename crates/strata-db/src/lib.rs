pub mod dialect;
pub mod introspect;
pub mod ledger;
pub mod migrations;
pub mod runner;
pub mod schema;
pub mod source;
pub mod validation;

pub use dialect::SchemaDialect;
pub use introspect::{ColumnInfo, ForeignKeyInfo, TableDescription};
pub use ledger::{AppliedMigration, Ledger};
pub use migrations::{Migration, MigrationSet, SchemaChange};
pub use runner::{MigrationRunner, MigrationStatus, RunnerConfig};
pub use schema::{
    ColumnDefault, ColumnDefinition, ColumnType, ForeignKey, ForeignKeyPolicy, IndexDefinition,
    ReferentialAction, TableDefinition,
};
pub use source::MigrationSource;
