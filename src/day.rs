//! Day ordinals.
//!
//! Days are stored as proleptic Gregorian ordinals where 0001-01-01 is day 1,
//! which is what `NaiveDate::num_days_from_ce` produces.

use chrono::{Datelike, NaiveDate, Utc};

/// Calendar day as an integer ordinal.
pub type Day = i64;

pub fn day_from_date(date: NaiveDate) -> Day {
    date.num_days_from_ce() as Day
}

/// Convert an ordinal back to a date. `None` when outside chrono's range.
pub fn date_from_day(day: Day) -> Option<NaiveDate> {
    let day = i32::try_from(day).ok()?;
    NaiveDate::from_num_days_from_ce_opt(day)
}

pub fn today() -> Day {
    day_from_date(Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_day_of_era_is_one() {
        let date = NaiveDate::from_ymd_opt(1, 1, 1).unwrap();
        assert_eq!(day_from_date(date), 1);
    }

    #[test]
    fn test_known_ordinal() {
        // 2020-10-23 has ordinal 737721
        let date = NaiveDate::from_ymd_opt(2020, 10, 23).unwrap();
        assert_eq!(day_from_date(date), 737_721);
        assert_eq!(date_from_day(737_721), Some(date));
    }

    #[test]
    fn test_out_of_range_day() {
        assert_eq!(date_from_day(i64::MAX), None);
    }
}
