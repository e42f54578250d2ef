//! # code_stats
//!
//! Polls usage and build statistics for a set of repositories, keeps one
//! SQLite database of daily counters per provider, and rolls those counters
//! into weekly series for reporting.
//!
//! ## Architecture
//!
//! ```text
//! StatsProvider (GitHub, Travis) → sync_all → RecordStore (upsert_daily)
//!     ↓
//! DailyCursor (day-ordered, batched)
//!     ↓
//! bucket_weekly (prefix sums over week boundaries)
//!     ↓
//! apply_overrides (outage gap-fill rules)
//!     ↓
//! WeeklyTable (cumulative series, summary, JSON)
//! ```
//!
//! ## Module Organization
//!
//! - `store` - record store, schema descriptors and migrations
//! - `aggregate` - week boundaries, bucketing, estimation overrides
//! - `report` - weekly tables across entities
//! - `providers` - provider adapters and the sync loop
//! - `legacy` - importer for historical plain-text traffic dumps
//! - `config` - runtime configuration and the credentials document

pub mod aggregate;
pub mod config;
pub mod day;
pub mod legacy;
pub mod providers;
pub mod report;
pub mod store;

pub use aggregate::{bucket_weekly, weekly_boundaries, OverrideRule, TrailingWeek};
pub use config::{AppConfig, CredentialsDocument};
pub use day::Day;
pub use providers::{sync_all, Observation, ProviderError, StatsProvider};
pub use report::WeeklyTable;
pub use store::{DailyRecord, Entity, Identity, RecordStore, StoreError};
