//! Per-provider schema descriptors and the startup migration.
//!
//! Every provider database has the same two base tables. The columns that
//! differ between providers (entity attributes and metric counters) are
//! declared in a [`ProviderSchema`]; [`migrate`] adds whichever of them are
//! missing, so older database files pick up new metrics with NULL history.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::error::StoreResult;

/// Base DDL. Safe to replay on an initialised database.
const BASE_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS entities (
        identity INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );",
    "CREATE TABLE IF NOT EXISTS daily_records (
        record_id INTEGER PRIMARY KEY AUTOINCREMENT,
        identity INTEGER NOT NULL REFERENCES entities(identity),
        day INTEGER NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_daily_records_identity_day
     ON daily_records(identity, day);",
];

/// A provider-specific column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub sql_type: &'static str,
}

impl ColumnSpec {
    pub const fn integer(name: &'static str) -> Self {
        Self {
            name,
            sql_type: "INTEGER",
        }
    }
}

/// Versioned description of one provider's database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSchema {
    /// Short name, also the database file prefix (`github_stats.db`).
    pub provider: &'static str,
    /// Bumped whenever a column is added below.
    pub version: i64,
    /// Extra columns on `entities`.
    pub entity_columns: &'static [ColumnSpec],
    /// Counter columns on `daily_records`.
    pub metric_columns: &'static [ColumnSpec],
}

impl ProviderSchema {
    pub fn database_file(&self) -> String {
        format!("{}_stats.db", self.provider)
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.metric_columns.iter().any(|c| c.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.entity_columns.iter().any(|c| c.name == name)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.metric_columns.iter().map(|c| c.name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entity_columns.iter().map(|c| c.name)
    }
}

pub const GITHUB_SCHEMA: ProviderSchema = ProviderSchema {
    provider: "github",
    version: 1,
    entity_columns: &[],
    metric_columns: &[
        ColumnSpec::integer("views"),
        ColumnSpec::integer("unique_views"),
        ColumnSpec::integer("clones"),
        ColumnSpec::integer("unique_clones"),
        ColumnSpec::integer("stargazers_count"),
        ColumnSpec::integer("watchers_count"),
        ColumnSpec::integer("forks_count"),
    ],
};

pub const TRAVIS_SCHEMA: ProviderSchema = ProviderSchema {
    provider: "travis",
    version: 1,
    entity_columns: &[ColumnSpec::integer("travis_id")],
    metric_columns: &[ColumnSpec::integer("build_count")],
};

/// Bring the database up to `schema`. Idempotent; runs in one transaction.
///
/// Returns the number of columns added.
pub fn migrate(conn: &mut Connection, schema: &ProviderSchema) -> StoreResult<usize> {
    let tx = conn.transaction()?;

    for stmt in BASE_STATEMENTS {
        tx.execute_batch(stmt)?;
    }

    let stored = stored_version(&tx)?;
    if stored > schema.version {
        log::warn!(
            "⚠️  {} database is at schema v{} but this build knows v{}; unknown columns are ignored",
            schema.provider,
            stored,
            schema.version
        );
    }

    let mut added = add_missing_columns(&tx, "entities", schema.entity_columns)?;
    added += add_missing_columns(&tx, "daily_records", schema.metric_columns)?;

    if schema.version > stored {
        tx.execute(
            "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![schema.version.to_string()],
        )?;
        log::info!(
            "🔧 {} schema migrated v{} → v{} ({} column(s) added)",
            schema.provider,
            stored,
            schema.version,
            added
        );
    }

    tx.commit()?;
    Ok(added)
}

/// Schema version recorded in `schema_meta`, 0 when absent or unparseable.
pub fn stored_version(conn: &Connection) -> StoreResult<i64> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}

pub fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn add_missing_columns(
    tx: &Transaction<'_>,
    table: &str,
    columns: &[ColumnSpec],
) -> StoreResult<usize> {
    let existing = table_columns(tx, table)?;
    let mut added = 0;
    for column in columns {
        if existing.iter().any(|c| c == column.name) {
            continue;
        }
        tx.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {} {}",
            column.name, column.sql_type
        ))?;
        log::debug!("   ├─ {table}: added column {}", column.name);
        added += 1;
    }
    Ok(added)
}
