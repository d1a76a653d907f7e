//! UTC calendar helpers used to align fetch windows on day and week boundaries.

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::prelude::{Interval, LoaderError, LoaderResult, MS_PER_DAY};

fn to_datetime(epoch_ms: i64) -> LoaderResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(epoch_ms).single().ok_or_else(|| {
        LoaderError::InvalidRange(format!("timestamp {} is outside the calendar", epoch_ms))
    })
}

/// Midnight UTC of the day holding `epoch_ms`.
pub fn start_of_day(epoch_ms: i64) -> LoaderResult<i64> {
    let midnight = to_datetime(epoch_ms)?
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| LoaderError::InvalidRange(format!("no midnight for {}", epoch_ms)))?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp_millis())
}

/// Midnight UTC of the Sunday starting the week holding `epoch_ms`.
pub fn start_of_week(epoch_ms: i64) -> LoaderResult<i64> {
    let day = start_of_day(epoch_ms)?;
    let weekday = to_datetime(day)?.weekday().num_days_from_sunday() as i64;
    Ok(day - weekday * MS_PER_DAY)
}

/// Widens `range` to whole days: midnight of its first day up to the midnight
/// following the day holding its end.
pub fn align_to_days(range: Interval) -> LoaderResult<Interval> {
    let start = start_of_day(range.start())?;
    let end = start_of_day(range.end())? + MS_PER_DAY;
    Interval::new(start, end)
}

/// First window fetched for a new session: the `lookback_weeks` whole weeks
/// before the week holding the newest datum, that week itself, and one extra
/// day of slack for local time zones. Clamped to `outer`.
pub fn initial_window(outer: Interval, lookback_weeks: u32) -> LoaderResult<Interval> {
    let newest = outer.end() - 1;
    let start =
        start_of_week(newest)? - i64::from(lookback_weeks) * 7 * MS_PER_DAY - MS_PER_DAY;
    let window = Interval::new(start, outer.end())?;
    window.intersect(&outer).ok_or_else(|| {
        LoaderError::InvalidRange(format!("initial window {} misses outer bound {}", window, outer))
    })
}
