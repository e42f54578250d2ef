//! SQLite record store with idempotent daily upserts.
//!
//! Each provider gets its own database file. Writes go through
//! [`RecordStore::upsert_daily`], which keeps at most one row per
//! (identity, day) by merging new counters into the existing row. Every
//! mutating call commits on its own, so an aborted run keeps everything that
//! was upserted before the failure.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::day::Day;

use super::error::{StoreError, StoreResult};
use super::schema::{self, ProviderSchema};

/// Stable entity identity, never reused after removal.
pub type Identity = i64;

/// Metric name → value, as handed to an upsert.
pub type Counters = BTreeMap<String, i64>;

/// Rows fetched per round trip by [`DailyCursor`].
pub const STREAM_BATCH_SIZE: usize = 1000;

/// A tracked repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub identity: Identity,
    pub name: String,
    /// Provider-specific columns, e.g. `travis_id`.
    pub attributes: BTreeMap<String, Option<i64>>,
}

impl Entity {
    pub fn attribute(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).copied().flatten()
    }
}

/// Counters recorded for one entity on one day. Unset counters are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRecord {
    pub identity: Identity,
    pub day: Day,
    pub values: BTreeMap<String, Option<i64>>,
}

impl DailyRecord {
    pub fn get(&self, metric: &str) -> Option<i64> {
        self.values.get(metric).copied().flatten()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Merged,
}

pub struct RecordStore {
    conn: Connection,
    schema: ProviderSchema,
}

impl RecordStore {
    /// Open (or create) a store at `db_path` and migrate it to `schema`.
    ///
    /// Parent directories are created when missing.
    pub fn open(db_path: impl AsRef<Path>, schema: ProviderSchema) -> StoreResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        log::debug!("📊 Opened {} store at {}", schema.provider, db_path.display());

        Self::with_connection(conn, schema)
    }

    /// Open `<data_dir>/<provider>_stats.db`.
    pub fn open_in_dir(data_dir: impl AsRef<Path>, schema: ProviderSchema) -> StoreResult<Self> {
        Self::open(data_dir.as_ref().join(schema.database_file()), schema)
    }

    pub fn open_in_memory(schema: ProviderSchema) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, schema)
    }

    fn with_connection(mut conn: Connection, schema: ProviderSchema) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&mut conn, &schema)?;
        Ok(Self { conn, schema })
    }

    pub fn schema(&self) -> &ProviderSchema {
        &self.schema
    }

    pub fn provider(&self) -> &'static str {
        self.schema.provider
    }

    // -- entities ------------------------------------------------------------

    /// Register `name`, returning its identity. Existing names are left as is.
    pub fn register(&mut self, name: &str) -> StoreResult<Identity> {
        if let Some(identity) = self.identity_of(name)? {
            return Ok(identity);
        }

        self.conn
            .execute("INSERT INTO entities (name) VALUES (?1)", params![name])?;
        let identity = self.conn.last_insert_rowid();
        log::info!(
            "➕ {}: registered {} (identity {})",
            self.schema.provider,
            name,
            identity
        );
        Ok(identity)
    }

    pub fn identity_of(&self, name: &str) -> StoreResult<Option<Identity>> {
        let identity = self
            .conn
            .query_row(
                "SELECT identity FROM entities WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(identity)
    }

    /// Delete an entity and all of its daily records in one transaction.
    ///
    /// Returns the number of daily records removed.
    pub fn remove_entity(&mut self, name: &str) -> StoreResult<usize> {
        let identity = self
            .identity_of(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let tx = self.conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM daily_records WHERE identity = ?1",
            params![identity],
        )?;
        tx.execute("DELETE FROM entities WHERE identity = ?1", params![identity])?;
        tx.commit()?;

        log::info!(
            "➖ {}: removed {} and {} daily record(s)",
            self.schema.provider,
            name,
            removed
        );
        Ok(removed)
    }

    pub fn entity(&self, name: &str) -> StoreResult<Option<Entity>> {
        let sql = format!("{} WHERE name = ?1", self.entity_select());
        let entity = self
            .conn
            .query_row(&sql, params![name], |row| self.entity_from_row(row))
            .optional()?;
        Ok(entity)
    }

    /// All entities in identity (registration) order.
    pub fn entities(&self) -> StoreResult<Vec<Entity>> {
        let sql = format!("{} ORDER BY identity", self.entity_select());
        let mut stmt = self.conn.prepare(&sql)?;
        let entities = stmt
            .query_map([], |row| self.entity_from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    pub fn entity_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.entities()?.into_iter().map(|e| e.name).collect())
    }

    /// Set a provider-specific entity column.
    pub fn set_attribute(
        &mut self,
        identity: Identity,
        attribute: &str,
        value: Option<i64>,
    ) -> StoreResult<()> {
        if !self.schema.has_attribute(attribute) {
            return Err(StoreError::UnknownAttribute {
                provider: self.schema.provider,
                attribute: attribute.to_string(),
            });
        }

        let updated = self.conn.execute(
            &format!("UPDATE entities SET {attribute} = ?1 WHERE identity = ?2"),
            params![value, identity],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("identity {identity}")));
        }
        Ok(())
    }

    fn entity_select(&self) -> String {
        let columns: Vec<&str> = ["identity", "name"]
            .into_iter()
            .chain(self.schema.attribute_names())
            .collect();
        format!("SELECT {} FROM entities", columns.join(", "))
    }

    fn entity_from_row(&self, row: &Row<'_>) -> rusqlite::Result<Entity> {
        let mut attributes = BTreeMap::new();
        for (i, name) in self.schema.attribute_names().enumerate() {
            attributes.insert(name.to_string(), row.get::<_, Option<i64>>(i + 2)?);
        }
        Ok(Entity {
            identity: row.get(0)?,
            name: row.get(1)?,
            attributes,
        })
    }

    // -- daily records -------------------------------------------------------

    /// Insert the record for (identity, day) or merge `counters` into it.
    ///
    /// Only the metrics present in `counters` are written; the rest of an
    /// existing row is left untouched. Commits before returning.
    pub fn upsert_daily(
        &mut self,
        identity: Identity,
        day: Day,
        counters: &Counters,
    ) -> StoreResult<UpsertOutcome> {
        for metric in counters.keys() {
            self.check_metric(metric)?;
        }

        let tx = self.conn.transaction()?;
        let record_ids = record_ids_for(&tx, identity, day)?;

        let outcome = match record_ids.as_slice() {
            [] => {
                let mut columns = vec!["identity", "day"];
                let mut values = vec![Value::Integer(identity), Value::Integer(day)];
                for (metric, value) in counters {
                    columns.push(metric.as_str());
                    values.push(Value::Integer(*value));
                }
                let placeholders: Vec<String> =
                    (1..=values.len()).map(|i| format!("?{i}")).collect();
                tx.execute(
                    &format!(
                        "INSERT INTO daily_records ({}) VALUES ({})",
                        columns.join(", "),
                        placeholders.join(", ")
                    ),
                    params_from_iter(values),
                )?;
                UpsertOutcome::Inserted
            }
            [record_id] => {
                if !counters.is_empty() {
                    let assignments: Vec<String> = counters
                        .keys()
                        .enumerate()
                        .map(|(i, metric)| format!("{metric} = ?{}", i + 1))
                        .collect();
                    let mut values: Vec<Value> =
                        counters.values().map(|v| Value::Integer(*v)).collect();
                    values.push(Value::Integer(*record_id));
                    tx.execute(
                        &format!(
                            "UPDATE daily_records SET {} WHERE record_id = ?{}",
                            assignments.join(", "),
                            values.len()
                        ),
                        params_from_iter(values),
                    )?;
                }
                UpsertOutcome::Merged
            }
            _ => {
                log::error!(
                    "❌ {}: duplicate daily records for identity {} day {}: {:?}",
                    self.schema.provider,
                    identity,
                    day,
                    record_ids
                );
                return Err(StoreError::DataIntegrity {
                    provider: self.schema.provider,
                    identity,
                    day,
                    record_ids,
                });
            }
        };

        tx.commit()?;
        log::debug!(
            "{}: {:?} identity={} day={} {:?}",
            self.schema.provider,
            outcome,
            identity,
            day,
            counters
        );
        Ok(outcome)
    }

    /// Point lookup of one daily record with every metric column.
    pub fn daily(&self, identity: Identity, day: Day) -> StoreResult<Option<DailyRecord>> {
        let record_ids = record_ids_for(&self.conn, identity, day)?;
        match record_ids.as_slice() {
            [] => Ok(None),
            [_] => {
                let metrics: Vec<&'static str> = self.schema.metric_names().collect();
                let sql = format!(
                    "SELECT day, {} FROM daily_records WHERE identity = ?1 AND day = ?2",
                    metrics.join(", ")
                );
                let record = self.conn.query_row(&sql, params![identity, day], |row| {
                    record_from_row(row, identity, &metrics)
                })?;
                Ok(Some(record))
            }
            _ => Err(StoreError::DataIntegrity {
                provider: self.schema.provider,
                identity,
                day,
                record_ids,
            }),
        }
    }

    /// Day-ordered cursor over one entity's records.
    ///
    /// `metrics` selects the columns to read; empty means every metric.
    pub fn stream_daily(&self, identity: Identity, metrics: &[&str]) -> StoreResult<DailyCursor<'_>> {
        let metrics: Vec<&'static str> = if metrics.is_empty() {
            self.schema.metric_names().collect()
        } else {
            metrics
                .iter()
                .map(|m| self.check_metric(m))
                .collect::<StoreResult<_>>()?
        };
        Ok(DailyCursor::new(&self.conn, identity, metrics))
    }

    /// First and last day with any record, across all entities.
    pub fn day_range(&self) -> StoreResult<Option<(Day, Day)>> {
        let (first, last): (Option<Day>, Option<Day>) = self.conn.query_row(
            "SELECT MIN(day), MAX(day) FROM daily_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(first.zip(last))
    }

    pub fn record_count(&self, identity: Identity) -> StoreResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM daily_records WHERE identity = ?1",
            params![identity],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Resolve `metric` against the schema, returning the schema's own name.
    fn check_metric(&self, metric: &str) -> StoreResult<&'static str> {
        self.schema
            .metric_names()
            .find(|name| *name == metric)
            .ok_or_else(|| StoreError::UnknownMetric {
                provider: self.schema.provider,
                metric: metric.to_string(),
            })
    }
}

fn record_ids_for(conn: &Connection, identity: Identity, day: Day) -> StoreResult<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT record_id FROM daily_records WHERE identity = ?1 AND day = ?2 ORDER BY record_id",
    )?;
    let ids = stmt
        .query_map(params![identity, day], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Rows are `day` followed by the metric columns, in order.
fn record_from_row(
    row: &Row<'_>,
    identity: Identity,
    metrics: &[&'static str],
) -> rusqlite::Result<DailyRecord> {
    let mut values = BTreeMap::new();
    for (i, metric) in metrics.iter().enumerate() {
        values.insert(metric.to_string(), row.get::<_, Option<i64>>(i + 1)?);
    }
    Ok(DailyRecord {
        identity,
        day: row.get(0)?,
        values,
    })
}

/// Lazy, restartable, ascending-by-day read of one entity's history.
///
/// Rows are fetched [`STREAM_BATCH_SIZE`] at a time with a keyset on `day`,
/// so memory stays bounded regardless of history length.
pub struct DailyCursor<'a> {
    conn: &'a Connection,
    identity: Identity,
    metrics: Vec<&'static str>,
    sql: String,
    batch_size: usize,
    last_day: Option<Day>,
    buffer: VecDeque<DailyRecord>,
    exhausted: bool,
}

impl<'a> DailyCursor<'a> {
    fn new(conn: &'a Connection, identity: Identity, metrics: Vec<&'static str>) -> Self {
        let columns: Vec<&str> = std::iter::once("day").chain(metrics.iter().copied()).collect();
        let sql = format!(
            "SELECT {} FROM daily_records
             WHERE identity = ?1 AND day > ?2
             ORDER BY day, record_id
             LIMIT ?3",
            columns.join(", ")
        );
        Self {
            conn,
            identity,
            metrics,
            sql,
            batch_size: STREAM_BATCH_SIZE,
            last_day: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Start again from the first day.
    pub fn rewind(&mut self) {
        self.last_day = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    /// Narrow the cursor to `(day, value)` points of a single metric.
    pub fn points(self, metric: &str) -> impl Iterator<Item = StoreResult<(Day, Option<i64>)>> + 'a {
        let metric = metric.to_string();
        self.map(move |record| record.map(|r| (r.day, r.get(&metric))))
    }

    fn fetch_batch(&mut self) -> StoreResult<()> {
        let after = self.last_day.unwrap_or(Day::MIN);
        let mut stmt = self.conn.prepare_cached(&self.sql)?;
        let identity = self.identity;
        let metrics = &self.metrics;
        let batch = stmt
            .query_map(params![identity, after, self.batch_size as i64], |row| {
                record_from_row(row, identity, metrics)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if batch.len() < self.batch_size {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            self.last_day = Some(last.day);
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for DailyCursor<'_> {
    type Item = StoreResult<DailyRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_batch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::{GITHUB_SCHEMA, TRAVIS_SCHEMA};
    use tempfile::tempdir;

    fn counters(pairs: &[(&str, i64)]) -> Counters {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn github_store() -> RecordStore {
        RecordStore::open_in_memory(GITHUB_SCHEMA).unwrap()
    }

    #[test]
    fn test_register_twice_keeps_one_identity() {
        let mut store = github_store();

        let first = store.register("org/repo").unwrap();
        let second = store.register("org/repo").unwrap();

        assert_eq!(first, second);
        assert_eq!(store.entities().unwrap().len(), 1);
        assert_eq!(store.identity_of("org/repo").unwrap(), Some(first));
        assert_eq!(store.identity_of("org/other").unwrap(), None);
    }

    #[test]
    fn test_remove_then_register_gives_fresh_identity() {
        let mut store = github_store();
        let old = store.register("org/repo").unwrap();
        store
            .upsert_daily(old, 100, &counters(&[("views", 5)]))
            .unwrap();
        store
            .upsert_daily(old, 101, &counters(&[("views", 6)]))
            .unwrap();

        let removed = store.remove_entity("org/repo").unwrap();
        assert_eq!(removed, 2);

        let new = store.register("org/repo").unwrap();
        assert_ne!(old, new);
        assert_eq!(store.record_count(new).unwrap(), 0);
        assert_eq!(store.record_count(old).unwrap(), 0);
    }

    #[test]
    fn test_remove_missing_entity_is_not_found() {
        let mut store = github_store();
        let id = store.register("org/repo").unwrap();
        store
            .upsert_daily(id, 100, &counters(&[("views", 5)]))
            .unwrap();

        let result = store.remove_entity("org/missing");

        assert!(matches!(result, Err(StoreError::NotFound(ref name)) if name == "org/missing"));
        assert_eq!(store.entity_names().unwrap(), vec!["org/repo"]);
        assert_eq!(store.record_count(id).unwrap(), 1);
    }

    #[test]
    fn test_upsert_partial_merge() {
        let mut store = github_store();
        let id = store.register("org/repo").unwrap();

        let first = store
            .upsert_daily(id, 100, &counters(&[("views", 5)]))
            .unwrap();
        let second = store
            .upsert_daily(id, 100, &counters(&[("unique_views", 2)]))
            .unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Merged);
        assert_eq!(store.record_count(id).unwrap(), 1);

        let record = store.daily(id, 100).unwrap().unwrap();
        assert_eq!(record.day, 100);
        assert_eq!(record.get("views"), Some(5));
        assert_eq!(record.get("unique_views"), Some(2));
        assert_eq!(record.get("clones"), None);
    }

    #[test]
    fn test_upsert_replay_keeps_last_value() {
        let mut store = github_store();
        let id = store.register("org/repo").unwrap();

        let observations = [
            counters(&[("views", 1), ("unique_views", 1)]),
            counters(&[("views", 4)]),
            counters(&[("clones", 3)]),
            counters(&[("views", 9), ("clones", 2)]),
        ];
        // Replay the whole run twice, as a re-run of the sync would.
        for _ in 0..2 {
            for obs in &observations {
                store.upsert_daily(id, 200, obs).unwrap();
            }
        }

        assert_eq!(store.record_count(id).unwrap(), 1);
        let record = store.daily(id, 200).unwrap().unwrap();
        assert_eq!(record.get("views"), Some(9));
        assert_eq!(record.get("unique_views"), Some(1));
        assert_eq!(record.get("clones"), Some(2));
    }

    #[test]
    fn test_duplicate_rows_are_data_integrity_error() {
        let mut store = github_store();
        let id = store.register("org/repo").unwrap();
        for _ in 0..2 {
            store
                .conn
                .execute(
                    "INSERT INTO daily_records (identity, day, views) VALUES (?1, 300, 1)",
                    params![id],
                )
                .unwrap();
        }

        let result = store.upsert_daily(id, 300, &counters(&[("views", 8)]));

        match result {
            Err(StoreError::DataIntegrity {
                identity,
                day,
                record_ids,
                ..
            }) => {
                assert_eq!(identity, id);
                assert_eq!(day, 300);
                assert_eq!(record_ids, vec![1, 2]);
            }
            other => panic!("expected DataIntegrity, got {:?}", other),
        }
        // Nothing was updated.
        let views: Vec<i64> = store
            .conn
            .prepare("SELECT views FROM daily_records")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(views, vec![1, 1]);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let mut store = github_store();
        let id = store.register("org/repo").unwrap();

        let result = store.upsert_daily(id, 1, &counters(&[("build_count", 1)]));

        assert!(matches!(result, Err(StoreError::UnknownMetric { .. })));
        assert_eq!(store.record_count(id).unwrap(), 0);
    }

    #[test]
    fn test_stream_daily_ordered_in_batches() {
        let mut store = github_store();
        let id = store.register("org/repo").unwrap();
        let other = store.register("org/other").unwrap();
        for day in [5, 1, 4, 2, 3] {
            store
                .upsert_daily(id, day, &counters(&[("views", day * 10)]))
                .unwrap();
        }
        store
            .upsert_daily(other, 3, &counters(&[("views", 999)]))
            .unwrap();

        let mut cursor = store
            .stream_daily(id, &["views"])
            .unwrap()
            .with_batch_size(2);
        let days: Vec<Day> = cursor.by_ref().map(|r| r.unwrap().day).collect();
        assert_eq!(days, vec![1, 2, 3, 4, 5]);

        cursor.rewind();
        let values: Vec<Option<i64>> = cursor.map(|r| r.unwrap().get("views")).collect();
        assert_eq!(
            values,
            vec![Some(10), Some(20), Some(30), Some(40), Some(50)]
        );
    }

    #[test]
    fn test_stream_points_and_nulls() {
        let mut store = github_store();
        let id = store.register("org/repo").unwrap();
        store
            .upsert_daily(id, 1, &counters(&[("views", 3)]))
            .unwrap();
        store
            .upsert_daily(id, 2, &counters(&[("clones", 1)]))
            .unwrap();

        let points: Vec<(Day, Option<i64>)> = store
            .stream_daily(id, &["views"])
            .unwrap()
            .points("views")
            .collect::<StoreResult<_>>()
            .unwrap();

        assert_eq!(points, vec![(1, Some(3)), (2, None)]);
        assert!(store.stream_daily(id, &["build_count"]).is_err());
    }

    #[test]
    fn test_day_range() {
        let mut store = github_store();
        assert_eq!(store.day_range().unwrap(), None);

        let a = store.register("org/a").unwrap();
        let b = store.register("org/b").unwrap();
        store.upsert_daily(a, 40, &counters(&[("views", 1)])).unwrap();
        store.upsert_daily(b, 12, &counters(&[("views", 1)])).unwrap();
        store.upsert_daily(b, 77, &counters(&[("views", 1)])).unwrap();

        assert_eq!(store.day_range().unwrap(), Some((12, 77)));
    }

    #[test]
    fn test_entity_attributes() {
        let mut store = RecordStore::open_in_memory(TRAVIS_SCHEMA).unwrap();
        let id = store.register("org/repo").unwrap();

        let entity = store.entity("org/repo").unwrap().unwrap();
        assert_eq!(entity.attribute("travis_id"), None);

        store.set_attribute(id, "travis_id", Some(4242)).unwrap();
        let entity = store.entity("org/repo").unwrap().unwrap();
        assert_eq!(entity.attribute("travis_id"), Some(4242));

        assert!(matches!(
            store.set_attribute(id, "name", Some(1)),
            Err(StoreError::UnknownAttribute { .. })
        ));
        assert!(matches!(
            store.set_attribute(id + 1, "travis_id", Some(1)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_on_disk_creates_dirs_and_persists() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("data");

        {
            let mut store = RecordStore::open_in_dir(&data_dir, GITHUB_SCHEMA).unwrap();
            let id = store.register("org/repo").unwrap();
            store
                .upsert_daily(id, 10, &counters(&[("views", 1)]))
                .unwrap();
        }

        let db_path = data_dir.join("github_stats.db");
        assert!(db_path.exists());

        let store = RecordStore::open(&db_path, GITHUB_SCHEMA).unwrap();
        let id = store.identity_of("org/repo").unwrap().unwrap();
        assert_eq!(store.daily(id, 10).unwrap().unwrap().get("views"), Some(1));

        let journal_mode: String = store
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
    }
}
