//! Week boundary generation.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use super::AggregateError;
use crate::day::{date_from_day, day_from_date, Day};

/// Weekly boundary dates covering `first_day..=last_day`.
///
/// The first boundary is the earliest `anchor` weekday on or after
/// `first_day`. Boundaries then advance a week at a time and generation stops
/// right after the first boundary later than `last_day`, so the final week
/// always closes on or after the last day with data.
pub fn weekly_boundaries(
    first_day: Day,
    last_day: Day,
    anchor: Weekday,
) -> Result<Vec<NaiveDate>, AggregateError> {
    let mut date = date_from_day(first_day).ok_or(AggregateError::DayOutOfRange(first_day))?;
    let last = date_from_day(last_day).ok_or(AggregateError::DayOutOfRange(last_day))?;

    while date.weekday() != anchor {
        date = date
            .succ_opt()
            .ok_or(AggregateError::DayOutOfRange(first_day))?;
    }

    let mut dates = vec![date];
    loop {
        date = date
            .checked_add_days(Days::new(7))
            .ok_or(AggregateError::DayOutOfRange(last_day))?;
        dates.push(date);
        if date > last {
            break;
        }
    }
    Ok(dates)
}

pub fn boundary_days(dates: &[NaiveDate]) -> Vec<Day> {
    dates.iter().copied().map(day_from_date).collect()
}

/// Accepts `fri`, `Friday`, `FRI` and so on.
pub fn parse_weekday(s: &str) -> Result<Weekday, AggregateError> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| AggregateError::UnknownWeekday(s.to_string()))
}
