//! Fixed-width timestamp encoding used in segment names.
//!
//! Timestamps are rendered as `YYYYMMDDHHmmSSNNNNNNNNN` (23 decimal digits,
//! UTC), so lexical order of the strings equals chronological order.

use time::{Date, Month, OffsetDateTime, Time};

use crate::{Error, Result};

pub const TIMESTAMP_WIDTH: usize = 23;

/// Calendar fields needed by the daily/hourly cycle predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFields {
    pub ordinal: u16,
    pub hour: u8,
    pub minute: u8,
}

fn datetime(timestamp_ns: u64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(timestamp_ns as i128)
        .map_err(|err| Error::InvalidTimestamp(format!("{timestamp_ns}: {err}")))
}

pub fn format_timestamp(timestamp_ns: u64) -> Result<String> {
    let dt = datetime(timestamp_ns)?;
    let date = dt.date();
    Ok(format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}{:09}",
        date.year(),
        date.month() as u8,
        date.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.nanosecond()
    ))
}

/// `YYYYMMDD` of the timestamp, used as the date directory in bucket keys.
pub fn format_date(timestamp_ns: u64) -> Result<String> {
    let mut stamp = format_timestamp(timestamp_ns)?;
    stamp.truncate(8);
    Ok(stamp)
}

pub fn parse_timestamp(value: &str) -> Result<u64> {
    let invalid = || Error::InvalidTimestamp(value.to_string());
    if value.len() != TIMESTAMP_WIDTH || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let field = |range: std::ops::Range<usize>| -> Result<u32> {
        value[range].parse::<u32>().map_err(|_| invalid())
    };

    let year = field(0..4)? as i32;
    let month = Month::try_from(field(4..6)? as u8).map_err(|_| invalid())?;
    let day = field(6..8)? as u8;
    let date = Date::from_calendar_date(year, month, day).map_err(|_| invalid())?;
    let time = Time::from_hms_nano(
        field(8..10)? as u8,
        field(10..12)? as u8,
        field(12..14)? as u8,
        field(14..23)?,
    )
    .map_err(|_| invalid())?;

    let nanos = date.with_time(time).assume_utc().unix_timestamp_nanos();
    u64::try_from(nanos).map_err(|_| invalid())
}

pub fn calendar_fields(timestamp_ns: u64) -> Result<CalendarFields> {
    let dt = datetime(timestamp_ns)?;
    Ok(CalendarFields {
        ordinal: dt.ordinal(),
        hour: dt.hour(),
        minute: dt.minute(),
    })
}
