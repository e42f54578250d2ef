use crate::day::Day;

use super::record_store::Identity;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Requested entity is not registered.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// More than one daily record for the same key. Never expected; means
    /// something wrote around the upsert path.
    #[error(
        "duplicate {provider} daily records for identity {identity} on day {day}: record ids {record_ids:?}"
    )]
    DataIntegrity {
        provider: &'static str,
        identity: Identity,
        day: Day,
        record_ids: Vec<i64>,
    },

    #[error("unknown {provider} metric: {metric}")]
    UnknownMetric {
        provider: &'static str,
        metric: String,
    },

    #[error("unknown {provider} entity attribute: {attribute}")]
    UnknownAttribute {
        provider: &'static str,
        attribute: String,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
