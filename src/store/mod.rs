//! Record store: one SQLite database per provider.
//!
//! Tables (see `schema`):
//! - `entities` - tracked repositories, one row per name
//! - `daily_records` - counters per (identity, day), merged on upsert
//! - `schema_meta` - applied schema descriptor version

pub mod error;
pub mod record_store;
pub mod schema;

pub use error::{StoreError, StoreResult};
pub use record_store::{
    Counters, DailyCursor, DailyRecord, Entity, Identity, RecordStore, UpsertOutcome,
};
pub use schema::{ColumnSpec, ProviderSchema, GITHUB_SCHEMA, TRAVIS_SCHEMA};
