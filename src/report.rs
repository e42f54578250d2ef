//! Weekly tables built from a record store.
//!
//! A [`WeeklyTable`] holds one metric for every entity, aligned to a shared
//! set of week boundaries. Tables can fold one entity into another, subtract
//! a second table (e.g. CI build clones from total clones) and turn into
//! cumulative series and a final summary.

use std::fmt;

use chrono::{NaiveDate, Weekday};
use serde::Serialize;

use crate::aggregate::{
    apply_overrides, boundary_days, bucket_weekly, weekly_boundaries, AggregateError,
    OverrideRule, TrailingWeek,
};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("entity not in table: {0}")]
    UnknownEntity(String),

    #[error("tables use different week boundaries")]
    BoundaryMismatch,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportOptions<'a> {
    pub trailing: TrailingWeek,
    /// Override rules to apply after bucketing; `None` reports raw counts.
    pub overrides: Option<&'a [OverrideRule]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySeries {
    pub entity: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyTable {
    pub metric: String,
    pub dates: Vec<NaiveDate>,
    pub series: Vec<EntitySeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityTotal {
    pub entity: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CumulativeSummary {
    pub metric: String,
    pub as_of: NaiveDate,
    pub per_entity: Vec<EntityTotal>,
    pub total: f64,
}

/// Boundaries spanning every record in `store`. `None` for an empty store.
pub fn weekly_boundaries_for(
    store: &RecordStore,
    anchor: Weekday,
) -> Result<Option<Vec<NaiveDate>>, ReportError> {
    match store.day_range()? {
        Some((first, last)) => Ok(Some(weekly_boundaries(first, last, anchor)?)),
        None => Ok(None),
    }
}

/// Travis metric subtracted by [`weekly_report`].
pub const BUILD_METRIC: &str = "build_count";

/// The full weekly report for `metric`.
///
/// `merges` are folded first, as `(from, into)` pairs. Build counts from
/// `builds` are then subtracted per remaining entity, so a merged entity's
/// own builds are not subtracted. `order` moves entities to the front last.
pub fn weekly_report(
    github: &RecordStore,
    builds: Option<&RecordStore>,
    dates: &[NaiveDate],
    metric: &str,
    options: &ReportOptions<'_>,
    merges: &[(String, String)],
    order: &[String],
) -> Result<WeeklyTable, ReportError> {
    let mut table = WeeklyTable::build(github, dates, metric, options)?;
    for (from, into) in merges {
        table.merge_into(from, into)?;
    }
    if let Some(store) = builds {
        let build_table = WeeklyTable::build(store, dates, BUILD_METRIC, options)?;
        table.subtract_clamped(&build_table)?;
    }
    table.reorder(order);
    Ok(table)
}

impl WeeklyTable {
    /// Bucket `metric` for every entity in `store`, in identity order.
    pub fn build(
        store: &RecordStore,
        dates: &[NaiveDate],
        metric: &str,
        options: &ReportOptions<'_>,
    ) -> Result<Self, ReportError> {
        let days = boundary_days(dates);
        let mut series = Vec::new();

        for entity in store.entities()? {
            let cursor = store.stream_daily(entity.identity, &[metric])?;
            let buckets = bucket_weekly(cursor.points(metric), &days, options.trailing)?;
            let mut values: Vec<f64> = buckets.into_iter().map(|v| v as f64).collect();

            if let Some(rules) = options.overrides {
                apply_overrides(&mut values, dates, &entity.name, metric, rules);
            }
            series.push(EntitySeries {
                entity: entity.name,
                values,
            });
        }

        log::debug!(
            "{}: {} weekly series over {} week(s)",
            metric,
            series.len(),
            dates.len()
        );
        Ok(Self {
            metric: metric.to_string(),
            dates: dates.to_vec(),
            series,
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.series.iter().map(|s| s.entity.as_str())
    }

    pub fn values(&self, entity: &str) -> Option<&[f64]> {
        self.position(entity).map(|i| self.series[i].values.as_slice())
    }

    fn position(&self, entity: &str) -> Option<usize> {
        self.series.iter().position(|s| s.entity == entity)
    }

    /// Add `from`'s series into `into` and drop the `from` column.
    pub fn merge_into(&mut self, from: &str, into: &str) -> Result<(), ReportError> {
        let from_idx = self
            .position(from)
            .ok_or_else(|| ReportError::UnknownEntity(from.to_string()))?;
        let into_idx = self
            .position(into)
            .ok_or_else(|| ReportError::UnknownEntity(into.to_string()))?;
        if from_idx == into_idx {
            return Ok(());
        }

        let source = self.series.remove(from_idx);
        let into_idx = if from_idx < into_idx { into_idx - 1 } else { into_idx };
        for (dst, src) in self.series[into_idx].values.iter_mut().zip(source.values) {
            *dst += src;
        }
        Ok(())
    }

    /// `max(self - other, 0)` for every entity present in both tables.
    pub fn subtract_clamped(&mut self, other: &WeeklyTable) -> Result<(), ReportError> {
        if self.dates != other.dates {
            return Err(ReportError::BoundaryMismatch);
        }
        for series in &mut self.series {
            let Some(subtrahend) = other.values(&series.entity) else {
                continue;
            };
            for (value, sub) in series.values.iter_mut().zip(subtrahend) {
                *value = (*value - sub).max(0.0);
            }
        }
        Ok(())
    }

    /// Move the named entities to the front, in the given order.
    pub fn reorder(&mut self, order: &[String]) {
        let mut ordered = Vec::with_capacity(self.series.len());
        for name in order {
            if let Some(i) = self.position(name) {
                ordered.push(self.series.remove(i));
            }
        }
        ordered.append(&mut self.series);
        self.series = ordered;
    }

    /// Running sums per entity.
    pub fn cumulative(&self) -> WeeklyTable {
        let series = self
            .series
            .iter()
            .map(|s| EntitySeries {
                entity: s.entity.clone(),
                values: s
                    .values
                    .iter()
                    .scan(0.0, |acc, v| {
                        *acc += v;
                        Some(*acc)
                    })
                    .collect(),
            })
            .collect();
        WeeklyTable {
            metric: self.metric.clone(),
            dates: self.dates.clone(),
            series,
        }
    }

    /// Totals as of the last boundary. `None` for a table without weeks.
    pub fn summary(&self) -> Option<CumulativeSummary> {
        let as_of = *self.dates.last()?;
        let per_entity: Vec<EntityTotal> = self
            .series
            .iter()
            .map(|s| EntityTotal {
                entity: s.entity.clone(),
                total: s.values.iter().sum(),
            })
            .collect();
        let total = per_entity.iter().map(|e| e.total).sum();
        Some(CumulativeSummary {
            metric: self.metric.clone(),
            as_of,
            per_entity,
            total,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for CumulativeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = format!("Cumulative {} {}", self.metric, self.as_of);
        writeln!(f, "{header}")?;
        writeln!(f, "{}", "~".repeat(header.len()))?;
        for entry in &self.per_entity {
            writeln!(f, "{}: {}", entry.entity, entry.total)?;
        }
        write!(f, "--> Sum: {}", self.total)
    }
}
