//! GitHub traffic adapter.
//!
//! Endpoints (relative to the API base URL):
//! - `GET /repos/{name}/traffic/views` → `views`, `unique_views` per day
//! - `GET /repos/{name}/traffic/clones` → `clones`, `unique_clones` per day
//! - `GET /repos/{name}` → star/fork/watch counts, recorded on today's date
//!
//! Traffic needs a token with push access; a 403 saying so is reported as
//! [`ProviderError::Permission`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{decode_json, Observation, ProviderError, ProviderResult, StatsProvider};
use crate::day::{day_from_date, today};
use crate::store::{Entity, ProviderSchema, GITHUB_SCHEMA};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const PUSH_ACCESS_MESSAGE: &str = "Must have push access to repository";

#[derive(Debug, Deserialize)]
struct TrafficCount {
    timestamp: DateTime<Utc>,
    count: i64,
    uniques: i64,
}

#[derive(Debug, Deserialize)]
struct ViewsTraffic {
    #[serde(default)]
    views: Vec<TrafficCount>,
}

#[derive(Debug, Deserialize)]
struct ClonesTraffic {
    #[serde(default)]
    clones: Vec<TrafficCount>,
}

#[derive(Debug, Deserialize)]
struct RepoCounts {
    stargazers_count: i64,
    forks_count: i64,
    watchers_count: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct GithubProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubProvider {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("code_stats/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get<T: DeserializeOwned>(&self, entity: &str, path: &str) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or_default();
            if message == PUSH_ACCESS_MESSAGE {
                return Err(ProviderError::Permission {
                    entity: entity.to_string(),
                    message,
                });
            }
            return Err(ProviderError::Status {
                status: StatusCode::FORBIDDEN,
                body,
            });
        }
        decode_json(response).await
    }
}

#[async_trait]
impl StatsProvider for GithubProvider {
    fn schema(&self) -> ProviderSchema {
        GITHUB_SCHEMA
    }

    async fn sync_entity(&self, entity: &Entity) -> ProviderResult<Vec<Observation>> {
        let name = entity.name.as_str();
        let mut observations = Vec::new();

        let views: ViewsTraffic = self.get(name, &format!("/repos/{name}/traffic/views")).await?;
        for v in &views.views {
            let day = day_from_date(v.timestamp.date_naive());
            observations.push(Observation::new(day, "views", v.count));
            observations.push(Observation::new(day, "unique_views", v.uniques));
        }

        let clones: ClonesTraffic = self.get(name, &format!("/repos/{name}/traffic/clones")).await?;
        for c in &clones.clones {
            let day = day_from_date(c.timestamp.date_naive());
            observations.push(Observation::new(day, "clones", c.count));
            observations.push(Observation::new(day, "unique_clones", c.uniques));
        }

        let counts: RepoCounts = self.get(name, &format!("/repos/{name}")).await?;
        let day = today();
        observations.push(Observation::new(day, "stargazers_count", counts.stargazers_count));
        observations.push(Observation::new(day, "forks_count", counts.forks_count));
        observations.push(Observation::new(day, "watchers_count", counts.watchers_count));

        log::debug!(
            "github: {} → {} view day(s), {} clone day(s)",
            name,
            views.views.len(),
            clones.clones.len()
        );
        Ok(observations)
    }
}
