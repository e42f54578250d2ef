//! Corrections for weeks where the collector is known to have failed.
//!
//! Rules are plain data and run in list order over a bucketed weekly series.
//! A later rule overwrites whatever an earlier rule wrote for overlapping
//! weeks. Nothing here touches the record store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const DEFAULT_RULES_JSON: &str = include_str!("default_overrides.json");

#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    #[error("failed to read override rules from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid override rules JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("override rule '{label}': {reason}")]
    InvalidRule { label: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySelector {
    All,
    Only(Vec<String>),
}

impl EntitySelector {
    pub fn matches(&self, entity: &str) -> bool {
        match self {
            EntitySelector::All => true,
            EntitySelector::Only(names) => names.iter().any(|n| n == entity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Mean of the series at these boundary dates.
    ReferenceMean(Vec<NaiveDate>),
    /// Literal value per metric.
    Fixed(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub label: String,
    pub entities: EntitySelector,
    /// Inclusive.
    pub first: NaiveDate,
    /// Inclusive.
    pub last: NaiveDate,
    pub strategy: Strategy,
}

impl OverrideRule {
    pub fn validate(&self) -> Result<(), EstimationError> {
        let invalid = |reason: &str| EstimationError::InvalidRule {
            label: self.label.clone(),
            reason: reason.to_string(),
        };

        if self.first > self.last {
            return Err(invalid("window starts after it ends"));
        }
        match &self.strategy {
            Strategy::ReferenceMean(dates) if dates.is_empty() => {
                Err(invalid("no reference weeks"))
            }
            Strategy::Fixed(values) if values.is_empty() => Err(invalid("no fixed values")),
            _ => Ok(()),
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.first <= date && date <= self.last
    }

    /// Value this rule writes for `metric`, given the series as it stands.
    fn replacement(&self, series: &[f64], dates: &[NaiveDate], metric: &str) -> Option<f64> {
        match &self.strategy {
            Strategy::ReferenceMean(reference) => {
                let values: Vec<f64> = dates
                    .iter()
                    .zip(series)
                    .filter(|(date, _)| reference.contains(date))
                    .map(|(_, value)| *value)
                    .collect();
                if values.is_empty() {
                    log::warn!(
                        "⚠️  override '{}': none of its reference weeks are in the series, skipped",
                        self.label
                    );
                    return None;
                }
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
            Strategy::Fixed(values) => values.get(metric).copied(),
        }
    }
}

/// Apply `rules` in order to one entity's weekly series for `metric`.
///
/// `series` and `dates` are aligned bucket-for-boundary. Returns how many
/// buckets were written.
pub fn apply_overrides(
    series: &mut [f64],
    dates: &[NaiveDate],
    entity: &str,
    metric: &str,
    rules: &[OverrideRule],
) -> usize {
    let mut written = 0;
    for rule in rules {
        if !rule.entities.matches(entity) {
            continue;
        }
        let Some(value) = rule.replacement(series, dates, metric) else {
            continue;
        };
        for (slot, date) in series.iter_mut().zip(dates) {
            if rule.covers(*date) {
                *slot = value;
                written += 1;
            }
        }
    }
    if written > 0 {
        log::debug!("{entity}/{metric}: {written} week(s) estimated");
    }
    written
}

/// The historical outage corrections, in the order they must run.
pub fn default_rules() -> Result<Vec<OverrideRule>, EstimationError> {
    parse_rules(DEFAULT_RULES_JSON)
}

/// Read a JSON array of rules from `path`.
pub fn load_rules(path: impl AsRef<Path>) -> Result<Vec<OverrideRule>, EstimationError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| EstimationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rules = parse_rules(&json)?;
    log::info!("📋 Loaded {} override rule(s) from {}", rules.len(), path.display());
    Ok(rules)
}

fn parse_rules(json: &str) -> Result<Vec<OverrideRule>, EstimationError> {
    let rules: Vec<OverrideRule> = serde_json::from_str(json)?;
    for rule in &rules {
        rule.validate()?;
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Six Friday boundaries starting 2021-01-01.
    fn fridays() -> Vec<NaiveDate> {
        (0..6).map(|w| date(2021, 1, 1) + chrono::Days::new(7 * w)).collect()
    }

    fn mean_rule(entities: EntitySelector, refs: &[NaiveDate], first: NaiveDate, last: NaiveDate) -> OverrideRule {
        OverrideRule {
            label: "mean".into(),
            entities,
            first,
            last,
            strategy: Strategy::ReferenceMean(refs.to_vec()),
        }
    }

    #[test]
    fn test_reference_mean_fills_window() {
        let dates = fridays();
        let mut series = vec![10.0, 20.0, 0.0, 0.0, 30.0, 40.0];
        let rule = mean_rule(
            EntitySelector::All,
            &[dates[0], dates[1], dates[4], dates[5]],
            dates[2],
            dates[3],
        );

        let written = apply_overrides(&mut series, &dates, "org/a", "views", &[rule]);

        assert_eq!(written, 2);
        assert_eq!(series, vec![10.0, 20.0, 25.0, 25.0, 30.0, 40.0]);
    }

    #[test]
    fn test_missing_reference_dates_are_skipped() {
        let dates = fridays();
        let mut series = vec![8.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let outside = date(2030, 1, 4);
        let rule = mean_rule(EntitySelector::All, &[dates[0], outside], dates[1], dates[2]);

        apply_overrides(&mut series, &dates, "org/a", "views", &[rule]);
        assert_eq!(series[1..3], [8.0, 8.0]);

        let mut untouched = vec![1.0; 6];
        let rule = mean_rule(EntitySelector::All, &[outside], dates[0], dates[5]);
        assert_eq!(apply_overrides(&mut untouched, &dates, "org/a", "views", &[rule]), 0);
        assert_eq!(untouched, vec![1.0; 6]);
    }

    #[test]
    fn test_fixed_values_per_metric() {
        let dates = fridays();
        let rule = OverrideRule {
            label: "fixed".into(),
            entities: EntitySelector::Only(vec!["org/b".into()]),
            first: dates[1],
            last: dates[2],
            strategy: Strategy::Fixed(BTreeMap::from([("clones".to_string(), 5.5)])),
        };

        let mut clones = vec![1.0; 6];
        apply_overrides(&mut clones, &dates, "org/b", "clones", std::slice::from_ref(&rule));
        assert_eq!(clones, vec![1.0, 5.5, 5.5, 1.0, 1.0, 1.0]);

        // No value for this metric.
        let mut views = vec![1.0; 6];
        assert_eq!(apply_overrides(&mut views, &dates, "org/b", "views", std::slice::from_ref(&rule)), 0);
        assert_eq!(views, vec![1.0; 6]);

        // Entity not selected.
        let mut other = vec![1.0; 6];
        apply_overrides(&mut other, &dates, "org/a", "clones", &[rule]);
        assert_eq!(other, vec![1.0; 6]);
    }

    #[test]
    fn test_rule_order_last_applied_wins() {
        let dates = fridays();
        let base = vec![2.0, 4.0, 0.0, 0.0, 100.0, 200.0];
        // Pass 1: all entities, mean of weeks 0..2 → 3.0 over weeks 2..=3.
        let pass1 = mean_rule(EntitySelector::All, &[dates[0], dates[1]], dates[2], dates[3]);
        // Pass 2: only org/a, mean of weeks 4..6 → 150.0 over weeks 3..=4.
        let pass2 = mean_rule(
            EntitySelector::Only(vec!["org/a".into()]),
            &[dates[4], dates[5]],
            dates[3],
            dates[4],
        );

        let mut forward = base.clone();
        apply_overrides(&mut forward, &dates, "org/a", "views", &[pass1.clone(), pass2.clone()]);
        assert_eq!(forward, vec![2.0, 4.0, 3.0, 150.0, 150.0, 200.0]);

        let mut reversed = base.clone();
        apply_overrides(&mut reversed, &dates, "org/a", "views", &[pass2, pass1]);
        // Pass 2 first: weeks 3,4 = 150. Pass 1 then averages weeks 0,1 and
        // overwrites weeks 2,3 with 3.0, so the overlap takes pass 1's value.
        assert_eq!(reversed, vec![2.0, 4.0, 3.0, 3.0, 150.0, 200.0]);
    }

    #[test]
    fn test_reference_mean_sees_earlier_rules() {
        let dates = fridays();
        let mut series = vec![0.0; 6];
        let fixed = OverrideRule {
            label: "fixed".into(),
            entities: EntitySelector::All,
            first: dates[0],
            last: dates[1],
            strategy: Strategy::Fixed(BTreeMap::from([("views".to_string(), 6.0)])),
        };
        let mean = mean_rule(EntitySelector::All, &[dates[0], dates[1]], dates[5], dates[5]);

        apply_overrides(&mut series, &dates, "org/a", "views", &[fixed, mean]);

        assert_eq!(series, vec![6.0, 6.0, 0.0, 0.0, 0.0, 6.0]);
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules().unwrap();

        assert_eq!(rules.len(), 5);
        assert_eq!(rules[0].entities, EntitySelector::All);
        assert_eq!(rules[0].first, date(2020, 10, 23));
        assert_eq!(rules[0].last, date(2021, 5, 21));
        match &rules[0].strategy {
            Strategy::ReferenceMean(refs) => assert_eq!(refs.len(), 16),
            other => panic!("unexpected strategy {:?}", other),
        }
        assert!(rules[1].entities.matches("prisms-center/pbs"));
        assert!(!rules[1].entities.matches("prisms-center/CASMcode"));
        match &rules[1].strategy {
            Strategy::ReferenceMean(refs) => assert_eq!(refs.len(), 8),
            other => panic!("unexpected strategy {:?}", other),
        }
        match &rules[4].strategy {
            Strategy::Fixed(values) => {
                assert_eq!(values.get("clones"), Some(&5.5));
                assert_eq!(values.get("unique_clones"), Some(&3.5));
            }
            other => panic!("unexpected strategy {:?}", other),
        }
        assert!(rules[4].entities.matches("prisms-center/Fatigue"));
    }

    #[test]
    fn test_load_rules_from_file() {
        let rules = default_rules().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&rules[2..]).unwrap().as_bytes())
            .unwrap();

        let loaded = load_rules(file.path()).unwrap();

        assert_eq!(loaded, rules[2..].to_vec());
    }

    #[test]
    fn test_load_rules_rejects_inverted_window() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"label":"bad","entities":"all","first":"2022-01-07","last":"2021-01-01",
                 "strategy":{{"fixed":{{"views":1}}}}}}]"#
        )
        .unwrap();

        assert!(matches!(
            load_rules(file.path()),
            Err(EstimationError::InvalidRule { ref label, .. }) if label == "bad"
        ));
        assert!(matches!(
            load_rules("/nonexistent/overrides.json"),
            Err(EstimationError::Io { .. })
        ));
    }
}
