//! Provider sync adapters.
//!
//! Each provider turns one entity into a list of `(day, metric, value)`
//! observations. [`sync_all`] feeds those into the record store one upsert
//! per day, so re-running a sync only merges over what is already there.
//!
//! ## Flow
//!
//! ```text
//! resolve_attributes ─▶ set_attribute
//! for each entity:
//!     sync_entity ─▶ group by day ─▶ upsert_daily (one commit each)
//! ```
//!
//! A permission failure skips the entity; any other error ends the run with
//! everything committed so far left in place.

pub mod github;
pub mod travis;

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::day::Day;
use crate::store::{Counters, Entity, Identity, ProviderSchema, RecordStore, StoreError, UpsertOutcome};

pub use github::GithubProvider;
pub use travis::TravisProvider;

/// One counter value for one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub day: Day,
    pub metric: &'static str,
    pub value: i64,
}

impl Observation {
    pub fn new(day: Day, metric: &'static str, value: i64) -> Self {
        Self { day, metric, value }
    }
}

/// A provider-specific entity column to write before syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeUpdate {
    pub identity: Identity,
    pub attribute: &'static str,
    pub value: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credentials lack access to this entity. The sync moves on.
    #[error("no access to {entity}: {message}")]
    Permission { entity: String, message: String },

    /// The provider answered in a shape we do not understand.
    #[error("provider protocol error: {0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[async_trait]
pub trait StatsProvider: Send + Sync {
    /// Schema of the store this provider writes into.
    fn schema(&self) -> ProviderSchema;

    /// Look up provider-side attributes for entities that lack them.
    async fn resolve_attributes(&self, _entities: &[Entity]) -> ProviderResult<Vec<AttributeUpdate>> {
        Ok(Vec::new())
    }

    async fn sync_entity(&self, entity: &Entity) -> ProviderResult<Vec<Observation>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub entities_synced: usize,
    pub entities_skipped: Vec<String>,
    pub attributes_set: usize,
    pub days_inserted: usize,
    pub days_merged: usize,
}

/// Sync every registered entity of `store` from `provider`.
pub async fn sync_all(
    store: &mut RecordStore,
    provider: &dyn StatsProvider,
) -> ProviderResult<SyncSummary> {
    let name = provider.schema().provider;
    let mut summary = SyncSummary::default();

    let entities = store.entities()?;
    log::info!("🔄 {}: syncing {} entit(ies)", name, entities.len());

    for update in provider.resolve_attributes(&entities).await? {
        store.set_attribute(update.identity, update.attribute, Some(update.value))?;
        summary.attributes_set += 1;
    }
    let entities = if summary.attributes_set > 0 {
        store.entities()?
    } else {
        entities
    };

    for entity in &entities {
        let observations = match provider.sync_entity(entity).await {
            Ok(observations) => observations,
            Err(ProviderError::Permission { entity, message }) => {
                log::warn!("⚠️  {}: skipping {}: {}", name, entity, message);
                summary.entities_skipped.push(entity);
                continue;
            }
            Err(e) => {
                log::error!("❌ {}: sync failed at {}: {}", name, entity.name, e);
                return Err(e);
            }
        };

        let mut by_day: BTreeMap<Day, Counters> = BTreeMap::new();
        for obs in observations {
            by_day
                .entry(obs.day)
                .or_default()
                .insert(obs.metric.to_string(), obs.value);
        }

        for (day, counters) in &by_day {
            match store.upsert_daily(entity.identity, *day, counters)? {
                UpsertOutcome::Inserted => summary.days_inserted += 1,
                UpsertOutcome::Merged => summary.days_merged += 1,
            }
        }
        summary.entities_synced += 1;
        log::info!("   ├─ {}: {} day(s)", entity.name, by_day.len());
    }

    log::info!(
        "✅ {}: {} synced, {} skipped, {} new day(s), {} merged",
        name,
        summary.entities_synced,
        summary.entities_skipped.len(),
        summary.days_inserted,
        summary.days_merged
    );
    Ok(summary)
}

/// Decode a successful JSON response, or turn the failure into
/// [`ProviderError::Status`].
async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status { status, body })
}
