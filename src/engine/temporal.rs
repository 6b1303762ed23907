//! Canonical text for engine date and time encodings.
//!
//! Dates print as `YYYY-MM-DD`, times as `HH:MM:SS[.fff]`, zoned timestamps
//! as RFC 3339 and zone-less timestamps as `YYYY-MM-DDTHH:MM:SS[.fff]`.

use chrono::{
    DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime,
    SecondsFormat, TimeZone, Utc,
};

const NANOS_PER_SECOND: u32 = 1_000_000_000;

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S%.f").to_string()
}

pub(crate) fn format_naive_datetime(datetime: NaiveDateTime) -> String {
    datetime.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

pub(crate) fn format_zoned<Tz: TimeZone>(datetime: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Split `"<seconds>[.<fraction>]"` into whole seconds and nanoseconds,
/// flooring toward negative infinity.
pub(crate) fn split_epoch(text: &str) -> Option<(i64, u32)> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let negative = whole.starts_with('-');
    let mut seconds: i64 = whole.parse().ok()?;

    let digits: String = fraction.chars().chain(std::iter::repeat('0')).take(9).collect();
    let mut nanos: u32 = digits.parse().ok()?;

    if negative && nanos > 0 {
        seconds -= 1;
        nanos = NANOS_PER_SECOND - nanos;
    }
    Some((seconds, nanos))
}

/// Epoch seconds (decimal or exponent notation) as an RFC 3339 UTC timestamp.
pub(crate) fn epoch_seconds_to_rfc3339(text: &str) -> Option<String> {
    let datetime = if text.contains(['e', 'E']) {
        let seconds: f64 = text.trim().parse().ok()?;
        DateTime::<Utc>::from_timestamp_micros((seconds * 1e6).round() as i64)?
    } else {
        let (seconds, nanos) = split_epoch(text)?;
        DateTime::<Utc>::from_timestamp(seconds, nanos)?
    };
    Some(format_zoned(&datetime))
}

/// Epoch seconds as a zone-less timestamp.
pub(crate) fn epoch_seconds_to_naive(text: &str) -> Option<String> {
    let (seconds, nanos) = split_epoch(text)?;
    DateTime::<Utc>::from_timestamp(seconds, nanos).map(|dt| format_naive_datetime(dt.naive_utc()))
}

/// `"<epoch seconds> <offset minutes + 1440>"` as RFC 3339 in that offset.
pub(crate) fn epoch_seconds_with_offset(text: &str) -> Option<String> {
    let (epoch, offset) = text.trim().split_once(' ')?;
    let (seconds, nanos) = split_epoch(epoch)?;
    let offset_minutes: i32 = offset.trim().parse::<i32>().ok()? - 1440;
    let zone = FixedOffset::east_opt(offset_minutes * 60)?;
    let utc = DateTime::<Utc>::from_timestamp(seconds, nanos)?;
    Some(format_zoned(&utc.with_timezone(&zone)))
}

/// Days since 1970-01-01 as a date.
pub(crate) fn epoch_days_to_date(text: &str) -> Option<String> {
    let days: i64 = text.trim().parse().ok()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    epoch
        .checked_add_signed(ChronoDuration::try_days(days)?)
        .map(format_date)
}

/// Seconds since midnight as a time of day.
pub(crate) fn seconds_to_time(text: &str) -> Option<String> {
    let (seconds, nanos) = split_epoch(text)?;
    let seconds = u32::try_from(seconds).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos).map(format_time)
}

/// The date part of an RFC 3339 timestamp, as reported for DATE columns.
pub(crate) fn rfc3339_to_date(text: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|dt| format_date(dt.date_naive()))
}
