use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, SecondsFormat, Utc};

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn current_year() -> i32 {
    Local::now().year()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// Normalizes an ISO date or date-time to the local calendar day it falls on.
///
/// `2024-03-01` is taken as-is; `2024-03-01T22:30:00Z` is converted to local time first.
pub fn parse_day(field: &str, raw: &str) -> CoreResult<NaiveDate> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&Local).date_naive());
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt.date());
    }
    Err(CoreError::invalid(
        field,
        format!("{} must be an ISO date (YYYY-MM-DD), got {:?}", field, raw),
    ))
}

pub fn parse_clock(field: &str, raw: &str) -> CoreResult<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| {
        CoreError::invalid(field, format!("{} must be HH:MM, got {:?}", field, raw))
    })
}

/// Whole years between `birth` and `on`.
pub fn age_on(birth: NaiveDate, on: NaiveDate) -> i32 {
    let mut age = on.year() - birth.year();
    if (on.month(), on.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}
