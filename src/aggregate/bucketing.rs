//! Prefix-sum bucketing of a day-ordered stream into weeks.

use crate::day::Day;

/// What happens to the running total still open when the stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingWeek {
    /// Write it into its bucket. Bucket totals then equal the stream total
    /// for every record that falls inside the boundaries.
    #[default]
    Flush,
    /// Discard it, leaving the last touched bucket at zero.
    Drop,
}

impl TrailingWeek {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrailingWeek::Flush => "flush",
            TrailingWeek::Drop => "drop",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "flush" => Some(TrailingWeek::Flush),
            "drop" => Some(TrailingWeek::Drop),
            _ => None,
        }
    }
}

/// Sum `(day, value)` points into weekly buckets.
///
/// `boundaries` are ascending day ordinals; bucket `i` covers
/// `(boundaries[i - 1], boundaries[i]]` and bucket 0 also takes everything
/// before the first boundary. Missing values count as zero. Points after the
/// last boundary end the walk and are discarded.
///
/// Errors from the source stream are returned as is.
pub fn bucket_weekly<I, E>(
    points: I,
    boundaries: &[Day],
    trailing: TrailingWeek,
) -> Result<Vec<i64>, E>
where
    I: IntoIterator<Item = Result<(Day, Option<i64>), E>>,
{
    let mut buckets = vec![0; boundaries.len()];
    if boundaries.is_empty() {
        return Ok(buckets);
    }

    let mut i = 0;
    let mut accumulator = 0;
    for point in points {
        let (day, value) = point?;
        let n = value.unwrap_or(0);

        if day <= boundaries[i] {
            accumulator += n;
            continue;
        }

        buckets[i] = accumulator;
        accumulator = n;
        while day > boundaries[i] {
            i += 1;
            if i == boundaries.len() {
                return Ok(buckets);
            }
        }
    }

    if trailing == TrailingWeek::Flush {
        buckets[i] = accumulator;
    }
    Ok(buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn points(pairs: &[(Day, Option<i64>)]) -> Vec<Result<(Day, Option<i64>), Infallible>> {
        pairs.iter().copied().map(Ok).collect()
    }

    fn bucket(pairs: &[(Day, Option<i64>)], boundaries: &[Day], trailing: TrailingWeek) -> Vec<i64> {
        bucket_weekly(points(pairs), boundaries, trailing).unwrap()
    }

    #[test]
    fn test_two_week_example() {
        let data = [(1, Some(10)), (2, Some(20)), (8, Some(5))];

        assert_eq!(bucket(&data, &[7, 14], TrailingWeek::Flush), vec![30, 5]);
    }

    #[test]
    fn test_drop_policy_loses_trailing_week() {
        let data = [(1, Some(10)), (2, Some(20)), (8, Some(5))];

        assert_eq!(bucket(&data, &[7, 14], TrailingWeek::Drop), vec![30, 0]);
    }

    #[test]
    fn test_flush_conserves_total() {
        let data: Vec<(Day, Option<i64>)> = (1..=40).map(|d| (d, Some(d * 3 % 7))).collect();
        let boundaries = [7, 14, 21, 28, 35, 42];

        let buckets = bucket(&data, &boundaries, TrailingWeek::Flush);

        let expected: i64 = data.iter().filter_map(|(_, v)| *v).sum();
        assert_eq!(buckets.iter().sum::<i64>(), expected);
    }

    #[test]
    fn test_nulls_count_as_zero() {
        let data = [(1, None), (2, Some(4)), (9, None), (10, Some(1))];

        assert_eq!(bucket(&data, &[7, 14], TrailingWeek::Flush), vec![4, 1]);
    }

    #[test]
    fn test_empty_weeks_stay_zero() {
        let data = [(3, Some(2)), (20, Some(9))];

        assert_eq!(
            bucket(&data, &[7, 14, 21], TrailingWeek::Flush),
            vec![2, 0, 9]
        );
    }

    #[test]
    fn test_points_after_last_boundary_discarded() {
        let data = [(3, Some(2)), (10, Some(4)), (30, Some(100)), (31, Some(100))];

        assert_eq!(bucket(&data, &[7, 14], TrailingWeek::Flush), vec![2, 4]);
    }

    #[test]
    fn test_points_before_first_boundary_go_to_first_bucket() {
        let data = [(-5, Some(1)), (0, Some(1)), (7, Some(1))];

        assert_eq!(bucket(&data, &[7, 14], TrailingWeek::Flush), vec![3, 0]);
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(bucket(&[], &[7, 14], TrailingWeek::Flush), vec![0, 0]);
        assert!(bucket(&[(1, Some(1))], &[], TrailingWeek::Flush).is_empty());
    }

    #[test]
    fn test_stream_error_propagates() {
        let stream = vec![Ok((1, Some(1))), Err("cursor failed"), Ok((2, Some(1)))];

        assert_eq!(
            bucket_weekly(stream, &[7], TrailingWeek::Flush),
            Err("cursor failed")
        );
    }

    #[test]
    fn test_trailing_week_names() {
        assert_eq!(TrailingWeek::default(), TrailingWeek::Flush);
        assert_eq!(TrailingWeek::from_str("drop"), Some(TrailingWeek::Drop));
        assert_eq!(TrailingWeek::from_str(TrailingWeek::Flush.as_str()), Some(TrailingWeek::Flush));
        assert_eq!(TrailingWeek::from_str("keep"), None);
    }
}
