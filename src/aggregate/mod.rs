//! Weekly aggregation of daily records.
//!
//! `weeks` builds the boundary dates, `bucketing` folds a day-ordered cursor
//! into those weeks and `estimation` overlays the hand-curated corrections
//! for known collection outages.

pub mod bucketing;
pub mod estimation;
pub mod weeks;

pub use bucketing::{bucket_weekly, TrailingWeek};
pub use estimation::{
    apply_overrides, default_rules, load_rules, EntitySelector, EstimationError, OverrideRule,
    Strategy,
};
pub use weeks::{boundary_days, parse_weekday, weekly_boundaries};

use crate::day::Day;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("day ordinal {0} is outside the supported calendar range")]
    DayOutOfRange(Day),

    #[error("unknown weekday: {0}")]
    UnknownWeekday(String),
}
