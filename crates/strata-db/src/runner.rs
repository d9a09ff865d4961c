use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use serde::Serialize;
use strata_common::{Error, Phase, Result};
use tracing::{debug, info, warn};

use crate::dialect::SchemaDialect;
use crate::introspect::{self, TableDescription};
use crate::ledger::{AppliedMigration, DEFAULT_TABLE, Ledger};
use crate::migrations::{Migration, MigrationSet, SchemaChange};

/// Settings the runner is constructed with.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub dialect: SchemaDialect,
    /// Name of the bookkeeping table.
    pub table: String,
    /// How long to wait for another runner's write lock.
    pub busy_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            dialect: SchemaDialect::CURRENT,
            table: DEFAULT_TABLE.to_string(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// A known migration together with its ledger state.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    /// `None` for a ledger row whose migration is not known to this runner.
    pub name: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub reversible: bool,
}

impl MigrationStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

/// Applies and reverts a fixed set of migrations against one SQLite database.
///
/// Every migration runs in its own `BEGIN IMMEDIATE` transaction. The write
/// lock taken by `BEGIN IMMEDIATE` serializes concurrent runners, and the
/// ledger is re-checked once the lock is held, so a migration is never applied
/// twice.
pub struct MigrationRunner {
    conn: Mutex<Connection>,
    migrations: MigrationSet,
    ledger: Ledger,
    dialect: SchemaDialect,
}

impl MigrationRunner {
    pub fn open(db_path: &Path, migrations: Vec<Migration>, config: RunnerConfig) -> Result<Self> {
        info!("opening migration runner at {}", db_path.display());
        let conn = Connection::open(db_path).map_err(|e| {
            Error::Connection(format!("failed to open {}: {e}", db_path.display()))
        })?;

        // Switching to WAL needs the lock another runner may be holding.
        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| Error::Connection(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Connection(format!("failed to set journal mode: {e}")))?;

        Self::from_connection(conn, migrations, config)
    }

    pub fn in_memory(migrations: Vec<Migration>, config: RunnerConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Connection(format!("failed to open in-memory database: {e}")))?;
        Self::from_connection(conn, migrations, config)
    }

    fn from_connection(
        conn: Connection,
        migrations: Vec<Migration>,
        config: RunnerConfig,
    ) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Connection(format!("failed to set pragmas: {e}")))?;
        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| Error::Connection(format!("failed to set busy timeout: {e}")))?;

        let migrations = MigrationSet::new(migrations, &config.dialect)?;
        debug!(
            "runner has {} known migrations (dialect {})",
            migrations.len(),
            config.dialect
        );

        Ok(Self {
            conn: Mutex::new(conn),
            migrations,
            ledger: Ledger::new(&config.table)?,
            dialect: config.dialect,
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("migration runner lock poisoned".into()))
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.migrations
    }

    pub fn dialect(&self) -> SchemaDialect {
        self.dialect
    }

    /// Run `f` against the underlying connection, outside any migration.
    pub fn query<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.connection()?;
        f(&*conn).map_err(|e| Error::Database(e.to_string()))
    }

    /// Ledger rows in ascending version order.
    pub fn applied(&self) -> Result<Vec<AppliedMigration>> {
        let conn = self.connection()?;
        self.ledger.applied(&conn)
    }

    /// Known migrations that have no ledger row, ascending by version.
    pub fn pending(&self) -> Result<Vec<&Migration>> {
        let conn = self.connection()?;
        self.pending_on(&conn)
    }

    fn pending_on(&self, conn: &Connection) -> Result<Vec<&Migration>> {
        let applied = self.ledger.applied(conn)?;
        if let Some(unknown) = applied.iter().find(|r| !self.migrations.contains(r.version)) {
            return Err(Error::UnknownVersion(unknown.version));
        }

        let applied: HashSet<i64> = applied.into_iter().map(|r| r.version).collect();
        Ok(self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version()))
            .collect())
    }

    /// Every known migration with its applied-at time, plus any ledger rows
    /// this runner does not know about, in version order.
    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let applied = self.applied()?;

        let mut statuses: Vec<MigrationStatus> = self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                version: m.version(),
                name: Some(m.name().to_string()),
                applied_at: applied
                    .iter()
                    .find(|r| r.version == m.version())
                    .map(|r| r.applied_at),
                reversible: m.is_reversible(),
            })
            .collect();

        for record in applied.iter().filter(|r| !self.migrations.contains(r.version)) {
            warn!("ledger has unknown migration {}", record.version);
            statuses.push(MigrationStatus {
                version: record.version,
                name: None,
                applied_at: Some(record.applied_at),
                reversible: false,
            });
        }

        statuses.sort_by_key(|s| s.version);
        Ok(statuses)
    }

    /// Apply every pending migration in order. Stops at the first failure;
    /// migrations applied before it stay applied. Returns how many this call
    /// applied.
    pub fn apply_all(&self) -> Result<usize> {
        self.apply_through(None)
    }

    /// Apply pending migrations up to and including `target`.
    pub fn apply_to(&self, target: i64) -> Result<usize> {
        if !self.migrations.contains(target) {
            return Err(Error::UnknownVersion(target));
        }
        self.apply_through(Some(target))
    }

    fn apply_through(&self, target: Option<i64>) -> Result<usize> {
        let mut conn = self.connection()?;
        self.ledger.ensure(&conn)?;

        let pending = self.pending_on(&conn)?;
        let pending: Vec<&Migration> = pending
            .into_iter()
            .filter(|m| target.is_none_or(|t| m.version() <= t))
            .collect();

        if pending.is_empty() {
            info!("schema is up to date");
            return Ok(0);
        }

        let mut applied = 0;
        for migration in pending {
            match self.apply_one(&mut conn, migration) {
                Ok(()) => applied += 1,
                Err(Error::DuplicateApplication { version }) => {
                    info!("migration {version} already applied by another runner, skipping");
                }
                Err(e) => {
                    warn!("migration {} failed: {e}", migration.version());
                    return Err(e);
                }
            }
        }

        info!("applied {applied} migrations");
        Ok(applied)
    }

    fn apply_one(&self, conn: &mut Connection, migration: &Migration) -> Result<()> {
        let version = migration.version();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        if self.ledger.is_applied(&tx, version)? {
            return Err(Error::DuplicateApplication { version });
        }

        info!("applying {version} {}", migration.name());
        self.execute(&tx, migration.up(), version, Phase::Apply)?;
        self.ledger.record(&tx, version, Utc::now())?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit {version}: {e}")))
    }

    /// Revert the highest applied migration and return it.
    pub fn revert_last(&self) -> Result<&Migration> {
        let mut conn = self.connection()?;
        self.revert_one(&mut conn)
    }

    /// Revert up to `steps` migrations, newest first. Stops early, without
    /// error, once nothing is applied.
    pub fn revert(&self, steps: usize) -> Result<Vec<&Migration>> {
        let mut conn = self.connection()?;
        let mut reverted = Vec::new();
        for _ in 0..steps {
            match self.revert_one(&mut conn) {
                Ok(migration) => reverted.push(migration),
                Err(Error::NotApplied) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(reverted)
    }

    /// Revert the highest applied migration, then apply it again.
    pub fn redo(&self) -> Result<&Migration> {
        let mut conn = self.connection()?;
        let migration = self.revert_one(&mut conn)?;
        self.apply_one(&mut conn, migration)?;
        Ok(migration)
    }

    fn revert_one(&self, conn: &mut Connection) -> Result<&Migration> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        let Some(latest) = self.ledger.latest(&tx)? else {
            return Err(Error::NotApplied);
        };
        let version = latest.version;
        let migration = self
            .migrations
            .get(version)
            .ok_or(Error::UnknownVersion(version))?;
        let down = migration
            .down()
            .ok_or(Error::NoReverseActionDefined { version })?;

        info!("reverting {version} {}", migration.name());
        self.execute(&tx, down, version, Phase::Revert)?;
        self.ledger.remove(&tx, version)?;

        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit revert of {version}: {e}")))?;
        Ok(migration)
    }

    /// Run `changes` on `conn`, which must be inside the unit's transaction.
    /// Statements that would end or restart that transaction are refused.
    fn execute(
        &self,
        conn: &Connection,
        changes: &[SchemaChange],
        version: i64,
        phase: Phase,
    ) -> Result<()> {
        conn.authorizer(Some(deny_transaction_control));
        let result = self.execute_changes(conn, changes, version, phase);
        conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
        result
    }

    fn execute_changes(
        &self,
        conn: &Connection,
        changes: &[SchemaChange],
        version: i64,
        phase: Phase,
    ) -> Result<()> {
        for change in changes {
            let statements = change
                .statements(&self.dialect)
                .map_err(|e| Error::InvalidMigration {
                    version,
                    reason: e.to_string(),
                })?;
            for sql in statements {
                debug!("{phase} {version}: {sql}");
                conn.execute_batch(&sql).map_err(|source| match source {
                    rusqlite::Error::SqliteFailure(err, _)
                        if err.code == ErrorCode::AuthorizationForStatementDenied =>
                    {
                        Error::InvalidMigration {
                            version,
                            reason: "transaction control statements are not allowed".into(),
                        }
                    }
                    source => Error::StatementExecution {
                        version,
                        phase,
                        source,
                    },
                })?;
            }
        }
        Ok(())
    }

    /// Columns, foreign keys, and indexes of `table` as they exist now.
    pub fn describe(&self, table: &str) -> Result<Option<TableDescription>> {
        let conn = self.connection()?;
        introspect::describe(&conn, table)
    }

    /// The `CREATE` statements of every object in the database.
    pub fn schema_dump(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        introspect::schema_dump(&conn)
    }
}

fn deny_transaction_control(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Transaction { .. } => Authorization::Deny,
        _ => Authorization::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::{CREATE_ACCOUNTS_VERSION, CREATE_ARTICLES_VERSION, builtin};
    use crate::schema::{ColumnDefinition, ColumnType, TableDefinition};

    fn runner(migrations: Vec<Migration>) -> MigrationRunner {
        MigrationRunner::in_memory(migrations, RunnerConfig::default()).unwrap()
    }

    fn create_table(version: i64, table: &str) -> Migration {
        Migration::reversible(
            version,
            format!("create_{table}"),
            vec![SchemaChange::CreateTable(
                TableDefinition::new(table)
                    .add_column(ColumnDefinition::new("label", ColumnType::string())),
            )],
        )
    }

    fn table_names(runner: &MigrationRunner) -> Vec<String> {
        runner
            .query(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type='table'
                     AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .unwrap()
    }

    #[test]
    fn pending_is_sorted_and_side_effect_free() {
        let runner = runner(vec![create_table(3, "c"), create_table(1, "a"), create_table(2, "b")]);
        let versions: Vec<_> = runner.pending().unwrap().iter().map(|m| m.version()).collect();
        assert_eq!(versions, [1, 2, 3]);
        assert!(table_names(&runner).is_empty());
    }

    #[test]
    fn apply_all_leaves_nothing_pending() {
        let runner = runner(builtin());
        assert_eq!(runner.apply_all().unwrap(), 2);
        assert!(runner.pending().unwrap().is_empty());

        let versions: Vec<_> = runner.applied().unwrap().iter().map(|r| r.version).collect();
        assert_eq!(versions, [CREATE_ACCOUNTS_VERSION, CREATE_ARTICLES_VERSION]);
    }

    #[test]
    fn second_apply_all_is_a_no_op() {
        let runner = runner(builtin());
        runner.apply_all().unwrap();
        assert_eq!(runner.apply_all().unwrap(), 0);
    }

    #[test]
    fn failing_migration_rolls_back_and_stops_the_run() {
        let failing = Migration::new(
            2,
            "half_done",
            vec![
                SchemaChange::CreateTable(TableDefinition::new("half")),
                SchemaChange::Sql("INSERT INTO missing_table VALUES (1)".into()),
            ],
        );
        let runner = runner(vec![create_table(1, "first"), failing, create_table(3, "third")]);

        let err = runner.apply_all().unwrap_err();
        assert!(matches!(
            err,
            Error::StatementExecution {
                version: 2,
                phase: Phase::Apply,
                ..
            }
        ));

        assert_eq!(table_names(&runner), ["first", "schema_migrations"]);
        let versions: Vec<_> = runner.applied().unwrap().iter().map(|r| r.version).collect();
        assert_eq!(versions, [1]);
    }

    #[test]
    fn commit_inside_a_unit_is_refused_and_rolled_back() {
        let sneaky = Migration::new(
            1,
            "early_commit",
            vec![SchemaChange::Sql(
                "CREATE TABLE a (id INTEGER); COMMIT; CREATE TABLE b (id INTEGER);".into(),
            )],
        );
        let runner = runner(vec![sneaky]);

        let err = runner.apply_all().unwrap_err();
        assert!(matches!(err, Error::InvalidMigration { version: 1, .. }), "{err}");
        assert_eq!(table_names(&runner), ["schema_migrations"]);
        assert!(runner.applied().unwrap().is_empty());

        // the guard is lifted once the unit is done
        runner
            .query(|conn| conn.execute_batch("BEGIN; CREATE TABLE later (id INTEGER); COMMIT;"))
            .unwrap();
    }

    #[test]
    fn trigger_bodies_are_not_transaction_control() {
        let runner = runner(vec![Migration::new(
            1,
            "audit",
            vec![SchemaChange::Sql(
                "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
                 CREATE TABLE audit (note_id INTEGER);
                 CREATE TRIGGER notes_audit AFTER INSERT ON notes
                 BEGIN INSERT INTO audit VALUES (NEW.id); END;"
                    .into(),
            )],
        )]);
        assert_eq!(runner.apply_all().unwrap(), 1);
    }

    #[test]
    fn unit_recorded_by_someone_else_mid_run_is_skipped() {
        // the first unit records the second in the ledger after pending was
        // computed, so only the in-transaction re-check can catch it
        let claims_next = Migration::new(
            1,
            "claims_next",
            vec![SchemaChange::Sql(
                "INSERT INTO schema_migrations (version, applied_at)
                 VALUES (2, '2022-02-20T10:47:32+00:00')"
                    .into(),
            )],
        );
        let runner = runner(vec![claims_next, create_table(2, "never")]);

        assert_eq!(runner.apply_all().unwrap(), 1);
        assert!(!table_names(&runner).contains(&"never".to_string()));
        let versions: Vec<_> = runner.applied().unwrap().iter().map(|r| r.version).collect();
        assert_eq!(versions, [1, 2]);
    }

    #[test]
    fn apply_one_reports_duplicate_application() {
        let runner = runner(vec![create_table(1, "a")]);
        let migration = runner.migrations().get(1).unwrap();
        let mut conn = runner.connection().unwrap();
        runner.ledger.ensure(&conn).unwrap();
        runner.ledger.record(&conn, 1, Utc::now()).unwrap();

        let err = runner.apply_one(&mut conn, migration).unwrap_err();
        assert!(matches!(err, Error::DuplicateApplication { version: 1 }));
    }

    #[test]
    fn apply_to_stops_at_target() {
        let runner = runner(vec![create_table(1, "a"), create_table(2, "b"), create_table(3, "c")]);
        assert_eq!(runner.apply_to(2).unwrap(), 2);
        let pending: Vec<_> = runner.pending().unwrap().iter().map(|m| m.version()).collect();
        assert_eq!(pending, [3]);

        assert!(matches!(runner.apply_to(99), Err(Error::UnknownVersion(99))));
    }

    #[test]
    fn revert_last_drops_newest_and_removes_record() {
        let runner = runner(builtin());
        runner.apply_all().unwrap();

        let reverted = runner.revert_last().unwrap();
        assert_eq!(reverted.version(), CREATE_ARTICLES_VERSION);
        assert!(!table_names(&runner).contains(&"articles".to_string()));

        let pending: Vec<_> = runner.pending().unwrap().iter().map(|m| m.version()).collect();
        assert_eq!(pending, [CREATE_ARTICLES_VERSION]);
    }

    #[test]
    fn revert_last_without_records_is_not_applied() {
        let runner = runner(builtin());
        assert!(matches!(runner.revert_last(), Err(Error::NotApplied)));
    }

    #[test]
    fn revert_last_without_reverse_action_fails_and_keeps_record() {
        let forward_only = Migration::new(1, "seed", vec![SchemaChange::Sql("CREATE TABLE seeds (id INTEGER)".into())]);
        let runner = runner(vec![forward_only]);
        runner.apply_all().unwrap();

        assert!(matches!(
            runner.revert_last(),
            Err(Error::NoReverseActionDefined { version: 1 })
        ));
        assert_eq!(runner.applied().unwrap().len(), 1);
    }

    #[test]
    fn revert_steps_stops_when_nothing_is_left() {
        let runner = runner(vec![create_table(1, "a"), create_table(2, "b")]);
        runner.apply_all().unwrap();

        let reverted: Vec<_> = runner.revert(5).unwrap().iter().map(|m| m.version()).collect();
        assert_eq!(reverted, [2, 1]);
        assert!(runner.applied().unwrap().is_empty());
    }

    #[test]
    fn redo_reapplies_the_newest_migration() {
        let runner = runner(builtin());
        runner.apply_all().unwrap();
        let before = runner.schema_dump().unwrap();

        assert_eq!(runner.redo().unwrap().version(), CREATE_ARTICLES_VERSION);
        assert_eq!(runner.schema_dump().unwrap(), before);
        assert!(runner.pending().unwrap().is_empty());
    }

    #[test]
    fn unknown_ledger_rows_are_reported() {
        let runner = runner(vec![create_table(1, "a")]);
        runner.apply_all().unwrap();
        runner
            .query(|conn| {
                conn.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (77, '2022-01-01 00:00:00')",
                    [],
                )
            })
            .unwrap();

        assert!(matches!(runner.pending(), Err(Error::UnknownVersion(77))));
        let status = runner.status().unwrap();
        assert_eq!(status.len(), 2);
        assert!(status[1].name.is_none());
        assert!(matches!(runner.revert_last(), Err(Error::UnknownVersion(77))));
    }

    #[test]
    fn status_reports_applied_and_pending() {
        let runner = runner(vec![create_table(1, "a"), create_table(2, "b")]);
        runner.apply_to(1).unwrap();

        let status = runner.status().unwrap();
        assert!(status[0].is_applied());
        assert!(!status[1].is_applied());
        assert_eq!(status[1].name.as_deref(), Some("create_b"));
    }

    #[test]
    fn custom_ledger_table_name() {
        let config = RunnerConfig {
            table: "strata_versions".to_string(),
            ..RunnerConfig::default()
        };
        let runner = MigrationRunner::in_memory(vec![create_table(1, "a")], config).unwrap();
        runner.apply_all().unwrap();
        assert!(table_names(&runner).contains(&"strata_versions".to_string()));
    }
}
