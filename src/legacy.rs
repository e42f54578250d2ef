//! Import of historical plain-text traffic dumps into the GitHub store.
//!
//! A dump holds one section per repository:
//!
//! ```text
//! phaseField Daily Statistics:
//! 2016-02-02 19:00:00 -0500	2	2	0	0
//! 2018-10-27T00	0		0		0		0
//! ```
//!
//! Each data row is `views unique_views clones unique_clones` for the date in
//! its first column. Rows where all four are zero carry nothing and are
//! skipped.

use std::io::BufRead;

use chrono::NaiveDate;

use crate::day::day_from_date;
use crate::store::{Counters, Identity, RecordStore, StoreError};

const HEADER_SUFFIX: &str = " Daily Statistics:";
const METRICS: [&str; 4] = ["views", "unique_views", "clones", "unique_clones"];

#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("failed to read legacy dump: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyLine {
    /// Start of a repository section, name without the organisation.
    Header(String),
    Row { date: NaiveDate, counts: [i64; 4] },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub rows_imported: usize,
    pub zero_rows_skipped: usize,
    /// Rows under a header for a repository not in the import list.
    pub rows_unlisted: usize,
}

/// Classify one line. Blank and unrecognised lines give `None`.
pub fn parse_line(line: &str) -> Result<Option<LegacyLine>, String> {
    if let Some(idx) = line.find(HEADER_SUFFIX) {
        return Ok(Some(LegacyLine::Header(line[..idx].trim().to_string())));
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = words.first() else {
        return Ok(None);
    };
    if !starts_with_date(first) {
        return Ok(None);
    }

    let date = NaiveDate::parse_from_str(&first[..10], "%Y-%m-%d")
        .map_err(|e| format!("bad date {first:?}: {e}"))?;

    // "date time offset v uv c uc" or "date v uv c uc"
    let values = match words.len() {
        7 => &words[3..7],
        n if n >= 5 => &words[1..5],
        n => return Err(format!("expected 4 counts, found {}", n - 1)),
    };

    let mut counts = [0; 4];
    for (slot, word) in counts.iter_mut().zip(values) {
        *slot = word
            .parse()
            .map_err(|_| format!("bad count {word:?}"))?;
    }
    Ok(Some(LegacyLine::Row { date, counts }))
}

fn starts_with_date(word: &str) -> bool {
    let b = word.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

/// Register `repos` and upsert every row of the dump into `store`.
///
/// Section headers name repositories relative to `org`. Each row is its own
/// committed upsert, so a parse error part way keeps earlier rows.
pub fn import<R: BufRead>(
    reader: R,
    org: &str,
    repos: &[String],
    store: &mut RecordStore,
) -> Result<ImportSummary, LegacyError> {
    for repo in repos {
        store.register(repo)?;
    }

    let mut summary = ImportSummary::default();
    let mut current: Option<Identity> = None;
    let mut in_section = false;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let parsed = parse_line(&line).map_err(|reason| LegacyError::Parse { line: i + 1, reason })?;

        match parsed {
            None => {}
            Some(LegacyLine::Header(repo)) => {
                let name = format!("{org}/{repo}");
                in_section = true;
                current = if repos.contains(&name) {
                    store.identity_of(&name)?
                } else {
                    log::warn!("⚠️  legacy: {} is not in the import list, its rows are skipped", name);
                    None
                };
                log::debug!("legacy: section {}", name);
            }
            Some(LegacyLine::Row { date, counts }) => {
                if !in_section {
                    return Err(LegacyError::Parse {
                        line: i + 1,
                        reason: "data row before any repository header".into(),
                    });
                }
                let Some(identity) = current else {
                    summary.rows_unlisted += 1;
                    continue;
                };
                if counts == [0; 4] {
                    summary.zero_rows_skipped += 1;
                    continue;
                }
                let counters: Counters = METRICS
                    .iter()
                    .zip(counts)
                    .map(|(metric, n)| (metric.to_string(), n))
                    .collect();
                store.upsert_daily(identity, day_from_date(date), &counters)?;
                summary.rows_imported += 1;
            }
        }
    }

    log::info!(
        "📥 legacy {}: {} row(s) imported, {} zero row(s) skipped",
        org,
        summary.rows_imported,
        summary.zero_rows_skipped
    );
    Ok(summary)
}
