use std::ops::RangeInclusive;

use chrono::{Datelike, NaiveDate};

use crate::error::{Error, Result};

/// Storage and wire format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Years accepted from callers. Period and fiscal arithmetic reaches one
/// year either side, which stays inside chrono's range.
pub const SUPPORTED_YEARS: RangeInclusive<i32> = 1..=9999;

/// Get the last day of a given month.
pub fn last_day_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    let first_of_next = if month == 12 {
        year.checked_add(1).and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1))
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .ok_or_else(|| Error::InvalidDate(format!("no last day for {year}-{month:02}")))
}

/// Get the calendar quarter (1-4) for a given date.
pub fn quarter_of(d: NaiveDate) -> u8 {
    ((d.month() - 1) / 3 + 1) as u8
}

/// Parse a `YYYY-MM-DD` date within [`SUPPORTED_YEARS`].
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let date = NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| Error::InvalidDate(format!("expected YYYY-MM-DD, got {s:?}")))?;
    if !SUPPORTED_YEARS.contains(&date.year()) {
        return Err(Error::InvalidDate(format!(
            "{s:?} is outside years {}..={}",
            SUPPORTED_YEARS.start(),
            SUPPORTED_YEARS.end()
        )));
    }
    Ok(date)
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}
