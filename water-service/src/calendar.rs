//! Calendar intervals for consumption reports.
//!
//! Every boundary, label and "today" lookup goes through one [`ReferenceZone`]
//! so that the query path, label generation and the hourly roll-up agree on
//! where an hour, day, month or year starts.

use std::{fmt, str::FromStr};

use serde::Deserialize;
use time::{
    macros::format_description, Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time,
    UtcOffset,
};

pub const SECONDS_PER_HOUR: i64 = 3600;
const HOURS_PER_DAY: i64 = 24;

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("invalid granularity '{0}', expected one of day, month, year")]
    InvalidGranularity(String),
    #[error("invalid utc offset '{0}', expected +HH:MM or -HH:MM")]
    InvalidOffset(String),
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("date out of supported range: {0}")]
    OutOfRange(String),
}

impl From<time::error::ComponentRange> for CalendarError {
    fn from(e: time::error::ComponentRange) -> Self {
        CalendarError::OutOfRange(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// 24 hourly buckets.
    Day,
    /// One bucket per day of the month.
    Month,
    /// 12 monthly buckets.
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

impl FromStr for Granularity {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(CalendarError::InvalidGranularity(other.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-offset zone in which calendar boundaries are computed.
///
/// Defaults to `+05:30`, which has no daylight-saving transitions, so every
/// local hour is exactly 3600 seconds long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ReferenceZone {
    offset: UtcOffset,
}

impl Default for ReferenceZone {
    fn default() -> Self {
        Self {
            offset: time::macros::offset!(+5:30),
        }
    }
}

impl TryFrom<String> for ReferenceZone {
    type Error = CalendarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for ReferenceZone {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
        UtcOffset::parse(s.trim(), &format)
            .map(Self::new)
            .map_err(|_| CalendarError::InvalidOffset(s.to_string()))
    }
}

impl fmt::Display for ReferenceZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, _) = self.offset.as_hms();
        let sign = if self.offset.is_negative() { '-' } else { '+' };
        write!(f, "{sign}{:02}:{:02}", h.unsigned_abs(), m.unsigned_abs())
    }
}

impl ReferenceZone {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(UtcOffset::UTC)
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    pub fn offset_seconds(&self) -> i64 {
        i64::from(self.offset.whole_seconds())
    }

    /// Calendar date of "now" in this zone.
    pub fn today(&self) -> Date {
        OffsetDateTime::now_utc().to_offset(self.offset).date()
    }

    /// Epoch seconds of local midnight at the start of `date`.
    pub fn midnight(&self, date: Date) -> i64 {
        PrimitiveDateTime::new(date, Time::MIDNIGHT)
            .assume_offset(self.offset)
            .unix_timestamp()
    }

    /// Start of the local hour containing `epoch`.
    pub fn hour_start(&self, epoch: i64) -> i64 {
        epoch - (epoch + self.offset_seconds()).rem_euclid(SECONDS_PER_HOUR)
    }

    /// Seconds from `epoch` until the next local top of the hour (never zero).
    pub fn seconds_until_next_hour(&self, epoch: i64) -> i64 {
        self.hour_start(epoch) + SECONDS_PER_HOUR - epoch
    }
}

/// Half-open report range `[start, end)` split into `labels.len()` buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportWindow {
    pub granularity: Granularity,
    pub start: i64,
    pub end: i64,
    /// `labels.len() + 1` strictly increasing instants; first is `start`, last is `end`.
    pub boundaries: Vec<i64>,
    pub labels: Vec<String>,
}

impl ReportWindow {
    pub fn bucket_count(&self) -> usize {
        self.labels.len()
    }
}

pub fn parse_target_date(s: &str) -> Result<Date, CalendarError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(s.trim(), &format).map_err(|_| CalendarError::InvalidDate(s.to_string()))
}

fn first_of_month(year: i32, month: Month) -> Result<Date, CalendarError> {
    Ok(Date::from_calendar_date(year, month, 1)?)
}

/// First day of the month `months` after (year, month); `months` may be negative.
fn shift_months(year: i32, month: Month, months: i64) -> Result<Date, CalendarError> {
    let index = i64::from(year) * 12 + i64::from(u8::from(month)) - 1 + months;
    let year = i32::try_from(index.div_euclid(12))
        .map_err(|_| CalendarError::OutOfRange(format!("month index {index}")))?;
    let month = Month::try_from((index.rem_euclid(12) + 1) as u8)?;
    first_of_month(year, month)
}

fn add_days(date: Date, days: i64) -> Result<Date, CalendarError> {
    date.checked_add(Duration::days(days))
        .ok_or_else(|| CalendarError::OutOfRange(format!("{date} + {days} days")))
}

/// First calendar day of the period containing `date`.
fn period_first_day(date: Date, granularity: Granularity) -> Result<Date, CalendarError> {
    match granularity {
        Granularity::Day => Ok(date),
        Granularity::Month => first_of_month(date.year(), date.month()),
        Granularity::Year => first_of_month(date.year(), Month::January),
    }
}

/// Compute the report range, bucket boundaries and labels for `target`.
pub fn compute_range(
    zone: &ReferenceZone,
    target: Date,
    granularity: Granularity,
) -> Result<ReportWindow, CalendarError> {
    let (boundaries, labels): (Vec<i64>, Vec<String>) = match granularity {
        Granularity::Day => {
            let start = zone.midnight(target);
            let boundaries = (0..=HOURS_PER_DAY)
                .map(|h| start + h * SECONDS_PER_HOUR)
                .collect();
            let labels = (0..HOURS_PER_DAY).map(|h| format!("{h:02}:00")).collect();
            (boundaries, labels)
        }
        Granularity::Month => {
            let first = first_of_month(target.year(), target.month())?;
            let days = i64::from(time::util::days_in_year_month(target.year(), target.month()));
            let boundaries = (0..=days)
                .map(|d| add_days(first, d).map(|day| zone.midnight(day)))
                .collect::<Result<Vec<_>, _>>()?;
            let labels = (1..=days).map(|d| d.to_string()).collect();
            (boundaries, labels)
        }
        Granularity::Year => {
            let boundaries = (0..=12)
                .map(|m| {
                    shift_months(target.year(), Month::January, m).map(|day| zone.midnight(day))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let labels = MONTH_LABELS.iter().map(|l| l.to_string()).collect();
            (boundaries, labels)
        }
    };

    let start = boundaries[0];
    let end = boundaries[boundaries.len() - 1];

    Ok(ReportWindow {
        granularity,
        start,
        end,
        boundaries,
        labels,
    })
}

/// Epoch seconds at which the period `periods` steps before `target`'s period starts.
pub fn lookback_start(
    zone: &ReferenceZone,
    target: Date,
    granularity: Granularity,
    periods: u32,
) -> Result<i64, CalendarError> {
    let back = -i64::from(periods);
    let first = match granularity {
        Granularity::Day => add_days(target, back)?,
        Granularity::Month => shift_months(target.year(), target.month(), back)?,
        Granularity::Year => shift_months(target.year(), Month::January, back * 12)?,
    };
    Ok(zone.midnight(period_first_day(first, granularity)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    const IST_OFFSET: i64 = 5 * 3600 + 30 * 60;

    #[test]
    fn parses_known_granularities_only() {
        assert_eq!("day".parse::<Granularity>(), Ok(Granularity::Day));
        assert_eq!(" month ".parse::<Granularity>(), Ok(Granularity::Month));
        assert_eq!("year".parse::<Granularity>(), Ok(Granularity::Year));
        assert_eq!(
            "week".parse::<Granularity>(),
            Err(CalendarError::InvalidGranularity("week".to_string()))
        );
    }

    #[test]
    fn day_window_starts_at_local_midnight() {
        let zone = ReferenceZone::default();
        let w = compute_range(&zone, date!(2024 - 06 - 15), Granularity::Day).unwrap();

        let expected = datetime!(2024-06-15 00:00:00 +05:30).unix_timestamp();
        assert_eq!(w.start, expected);
        assert_eq!(w.end, expected + 86_400);
        assert_eq!(w.boundaries.len(), 25);
        assert_eq!(w.labels.len(), 24);
        assert_eq!(w.labels[0], "00:00");
        assert_eq!(w.labels[23], "23:00");
        assert_eq!(w.boundaries[1] - w.boundaries[0], 3600);
    }

    #[test]
    fn utc_zone_day_starts_at_epoch_midnight() {
        let w =
            compute_range(&ReferenceZone::utc(), date!(1970 - 01 - 01), Granularity::Day).unwrap();
        assert_eq!(w.start, 0);
        assert_eq!(w.end, 86_400);
    }

    #[test]
    fn thirty_day_month_has_thirty_buckets() {
        let zone = ReferenceZone::default();
        let w = compute_range(&zone, date!(2024 - 06 - 15), Granularity::Month).unwrap();
        assert_eq!(w.labels.len(), 30);
        assert_eq!(w.labels.first().map(String::as_str), Some("1"));
        assert_eq!(w.labels.last().map(String::as_str), Some("30"));
        assert_eq!(w.boundaries.len(), 31);
        assert_eq!(w.start, datetime!(2024-06-01 00:00:00 +05:30).unix_timestamp());
        assert_eq!(w.end, datetime!(2024-07-01 00:00:00 +05:30).unix_timestamp());
    }

    #[test]
    fn leap_february_has_twenty_nine_buckets() {
        let zone = ReferenceZone::default();
        let w = compute_range(&zone, date!(2024 - 02 - 10), Granularity::Month).unwrap();
        assert_eq!(w.bucket_count(), 29);
        let w = compute_range(&zone, date!(2023 - 02 - 10), Granularity::Month).unwrap();
        assert_eq!(w.bucket_count(), 28);
    }

    #[test]
    fn year_window_has_month_labels() {
        let zone = ReferenceZone::default();
        let w = compute_range(&zone, date!(2024 - 12 - 31), Granularity::Year).unwrap();
        assert_eq!(w.labels.len(), 12);
        assert_eq!(w.labels[0], "Jan");
        assert_eq!(w.labels[11], "Dec");
        assert_eq!(w.start, datetime!(2024-01-01 00:00:00 +05:30).unix_timestamp());
        assert_eq!(w.end, datetime!(2025-01-01 00:00:00 +05:30).unix_timestamp());
        assert_eq!(w.boundaries[2], datetime!(2024-03-01 00:00:00 +05:30).unix_timestamp());
    }

    #[test]
    fn boundaries_are_strictly_increasing() {
        let zone = ReferenceZone::default();
        for g in [Granularity::Day, Granularity::Month, Granularity::Year] {
            let w = compute_range(&zone, date!(2024 - 03 - 31), g).unwrap();
            assert!(w.boundaries.windows(2).all(|p| p[0] < p[1]), "{g}");
            assert_eq!(w.boundaries.len(), w.labels.len() + 1, "{g}");
        }
    }

    #[test]
    fn lookback_steps_back_whole_periods() {
        let zone = ReferenceZone::default();
        let d = date!(2024 - 03 - 31);
        assert_eq!(
            lookback_start(&zone, d, Granularity::Day, 1).unwrap(),
            datetime!(2024-03-30 00:00:00 +05:30).unix_timestamp()
        );
        assert_eq!(
            lookback_start(&zone, d, Granularity::Month, 1).unwrap(),
            datetime!(2024-02-01 00:00:00 +05:30).unix_timestamp()
        );
        assert_eq!(
            lookback_start(&zone, date!(2024 - 01 - 15), Granularity::Month, 1).unwrap(),
            datetime!(2023-12-01 00:00:00 +05:30).unix_timestamp()
        );
        assert_eq!(
            lookback_start(&zone, d, Granularity::Year, 1).unwrap(),
            datetime!(2023-01-01 00:00:00 +05:30).unix_timestamp()
        );
        assert_eq!(
            lookback_start(&zone, d, Granularity::Day, 0).unwrap(),
            compute_range(&zone, d, Granularity::Day).unwrap().start
        );
    }

    #[test]
    fn hour_alignment_follows_zone_offset() {
        let zone = ReferenceZone::default();
        // 00:00 UTC is 05:30 local, so the local hour began at 23:30 UTC.
        assert_eq!(zone.hour_start(0), -1800);
        assert_eq!(zone.seconds_until_next_hour(0), 1800);
        assert_eq!(zone.hour_start(1800), 1800);
        assert_eq!(zone.seconds_until_next_hour(1800), 3600);
        assert_eq!(ReferenceZone::utc().hour_start(7199), 3600);
    }

    #[test]
    fn parses_offsets() {
        assert_eq!("+05:30".parse::<ReferenceZone>().unwrap().offset_seconds(), IST_OFFSET);
        assert_eq!("-08:00".parse::<ReferenceZone>().unwrap().offset_seconds(), -8 * 3600);
        assert!("05:30".parse::<ReferenceZone>().is_err());
        assert!("Asia/Kolkata".parse::<ReferenceZone>().is_err());
    }

    #[test]
    fn zone_displays_as_signed_offset() {
        assert_eq!(ReferenceZone::default().to_string(), "+05:30");
        assert_eq!("-03:30".parse::<ReferenceZone>().unwrap().to_string(), "-03:30");
        assert_eq!(ReferenceZone::utc().to_string(), "+00:00");
    }

    #[test]
    fn parses_iso_dates() {
        assert_eq!(parse_target_date("2024-06-15"), Ok(date!(2024 - 06 - 15)));
        assert!(parse_target_date("15/06/2024").is_err());
        assert!(parse_target_date("2024-02-30").is_err());
    }
}
