//! Travis CI build counts.
//!
//! Requests carry `Travis-API-Version: 3` and `Authorization: token <t>`.
//! Repositories are matched to entities by slug once, and the id is kept in
//! the `travis_id` entity column. Builds are counted per start date.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{decode_json, AttributeUpdate, Observation, ProviderError, ProviderResult, StatsProvider};
use crate::day::day_from_date;
use crate::store::{Entity, ProviderSchema, TRAVIS_SCHEMA};

pub const DEFAULT_API_URL: &str = "https://api.travis-ci.com";

const TRAVIS_ID: &str = "travis_id";

#[derive(Debug, Deserialize)]
struct ReposPage {
    #[serde(default)]
    repositories: Vec<TravisRepo>,
}

#[derive(Debug, Deserialize)]
struct TravisRepo {
    id: i64,
    slug: String,
}

#[derive(Debug, Deserialize)]
struct BuildsPage {
    #[serde(default)]
    builds: Vec<Build>,
    #[serde(rename = "@pagination")]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Build {
    started_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    is_last: bool,
    next: Option<PageLink>,
}

#[derive(Debug, Deserialize)]
struct PageLink {
    #[serde(rename = "@href")]
    href: String,
}

pub struct TravisProvider {
    client: reqwest::Client,
    base_url: String,
}

impl TravisProvider {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("Travis-API-Version", HeaderValue::from_static("3"));
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("token {token}")).map_err(|_| {
                ProviderError::Protocol("travis token is not a valid header value".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("code_stats/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, entity: &str, href: &str) -> ProviderResult<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, href))
            .send()
            .await?;
        if response.status() == StatusCode::FORBIDDEN {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Permission {
                entity: entity.to_string(),
                message,
            });
        }
        decode_json(response).await
    }

    /// Builds per start date, following `@pagination` to the last page.
    async fn build_counts(&self, entity: &str, travis_id: i64) -> ProviderResult<BTreeMap<NaiveDate, i64>> {
        let mut href = format!("/repo/{travis_id}/builds");
        let mut counts = BTreeMap::new();

        loop {
            let page: BuildsPage = self.get(entity, &href).await?;
            for started_at in page.builds.iter().filter_map(|b| b.started_at) {
                *counts.entry(started_at.date_naive()).or_insert(0) += 1;
            }

            let pagination = page.pagination.ok_or_else(|| {
                ProviderError::Protocol(format!("{href}: builds page without @pagination"))
            })?;
            if pagination.is_last {
                break;
            }
            let next = pagination.next.map(|n| n.href).ok_or_else(|| {
                ProviderError::Protocol(format!("{href}: not the last page but no next link"))
            })?;
            if next == href {
                return Err(ProviderError::Protocol(format!("{href}: next link points to itself")));
            }
            href = next;
        }
        Ok(counts)
    }
}

#[async_trait]
impl StatsProvider for TravisProvider {
    fn schema(&self) -> ProviderSchema {
        TRAVIS_SCHEMA
    }

    async fn resolve_attributes(&self, entities: &[Entity]) -> ProviderResult<Vec<AttributeUpdate>> {
        let missing: Vec<&Entity> = entities
            .iter()
            .filter(|e| e.attribute(TRAVIS_ID).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let page: ReposPage = self.get("repos", "/repos").await?;
        let ids: BTreeMap<&str, i64> = page
            .repositories
            .iter()
            .map(|r| (r.slug.as_str(), r.id))
            .collect();

        let mut updates = Vec::new();
        for entity in missing {
            match ids.get(entity.name.as_str()) {
                Some(&id) => {
                    log::info!("🔗 travis: {} → travis_id {}", entity.name, id);
                    updates.push(AttributeUpdate {
                        identity: entity.identity,
                        attribute: TRAVIS_ID,
                        value: id,
                    });
                }
                None => log::debug!("travis: {} is not tracked by Travis", entity.name),
            }
        }
        Ok(updates)
    }

    async fn sync_entity(&self, entity: &Entity) -> ProviderResult<Vec<Observation>> {
        let Some(travis_id) = entity.attribute(TRAVIS_ID) else {
            log::debug!("travis: {} has no travis_id, skipped", entity.name);
            return Ok(Vec::new());
        };

        let counts = self.build_counts(&entity.name, travis_id).await?;
        Ok(counts
            .into_iter()
            .map(|(date, n)| Observation::new(day_from_date(date), "build_count", n))
            .collect())
    }
}
