//! User-anchored fiscal calendar.
//!
//! Fiscal quarters are labels for reporting only. They share vocabulary with
//! [`PeriodType::Quarterly`](crate::period::PeriodType::Quarterly) but are a
//! separate notion: rollups are always keyed by calendar quarter.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

static RE_MONTH_DAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])$").unwrap());

/// Days per month in a non-leap year. Anchors must exist every year.
const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// A yearless `MM-DD` anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    /// Parse `MM-DD`. `02-29` is rejected since it has no date in most years.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let caps = RE_MONTH_DAY
            .captures(s)
            .ok_or_else(|| Error::InvalidDate(format!("expected MM-DD, got {s:?}")))?;
        let month: u32 = caps[1]
            .parse()
            .map_err(|_| Error::InvalidDate(format!("bad month in {s:?}")))?;
        let day: u32 = caps[2]
            .parse()
            .map_err(|_| Error::InvalidDate(format!("bad day in {s:?}")))?;
        if day > DAYS_IN_MONTH[month as usize - 1] {
            return Err(Error::InvalidDate(format!(
                "{s:?} does not occur in every year"
            )));
        }
        Ok(Self { month, day })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    /// The anchor as a concrete date in `year`.
    pub fn in_year(&self, year: i32) -> Result<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
            .ok_or_else(|| Error::InvalidDate(format!("{self} has no date in year {year}")))
    }
}

impl PartialOrd for MonthDay {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MonthDay {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.month, self.day).cmp(&(other.month, other.day))
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl Serialize for MonthDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Quarter label in the fiscal calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FiscalQuarterLabel {
    Q1,
    Q2,
    Q3,
    Q4,
}

impl fmt::Display for FiscalQuarterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FiscalQuarterLabel::Q1 => "Q1",
            FiscalQuarterLabel::Q2 => "Q2",
            FiscalQuarterLabel::Q3 => "Q3",
            FiscalQuarterLabel::Q4 => "Q4",
        };
        f.write_str(s)
    }
}

/// Per-tenant quarter start anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiscalSettings {
    pub q1_start: MonthDay,
    pub q2_start: MonthDay,
    pub q3_start: MonthDay,
    pub q4_start: MonthDay,
}

impl Default for FiscalSettings {
    fn default() -> Self {
        Self {
            q1_start: MonthDay { month: 9, day: 22 },
            q2_start: MonthDay { month: 12, day: 22 },
            q3_start: MonthDay { month: 3, day: 22 },
            q4_start: MonthDay { month: 6, day: 22 },
        }
    }
}

impl FiscalSettings {
    /// Parse four `MM-DD` anchors. Ordering is checked by [`Self::validate`].
    pub fn parse(q1: &str, q2: &str, q3: &str, q4: &str) -> Result<Self> {
        Ok(Self {
            q1_start: MonthDay::parse(q1)?,
            q2_start: MonthDay::parse(q2)?,
            q3_start: MonthDay::parse(q3)?,
            q4_start: MonthDay::parse(q4)?,
        })
    }

    pub fn anchors(&self) -> [MonthDay; 4] {
        [self.q1_start, self.q2_start, self.q3_start, self.q4_start]
    }

    /// Anchors must be distinct and, read cyclically from Q1, advance through
    /// the year wrapping past Dec 31 exactly once.
    pub fn validate(&self) -> Result<()> {
        let anchors = self.anchors();
        let mut wraps = 0;
        for i in 0..4 {
            let (open, close) = (anchors[i], anchors[(i + 1) % 4]);
            match open.cmp(&close) {
                Ordering::Less => {}
                Ordering::Greater => wraps += 1,
                Ordering::Equal => {
                    return Err(Error::FiscalConfigurationAmbiguous(format!(
                        "Q{} and Q{} both start on {open}",
                        i + 1,
                        (i + 1) % 4 + 1
                    )))
                }
            }
        }
        if wraps != 1 {
            return Err(Error::FiscalConfigurationAmbiguous(format!(
                "anchors {} do not partition the year in quarter order",
                anchors
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(())
    }
}

/// The fiscal quarter containing a date. `end` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiscalQuarter {
    pub quarter: FiscalQuarterLabel,
    pub fiscal_year: i32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Half-open `[open, close)` interval for the quarter between two anchors
/// that contains `date`, if any. A quarter whose closing anchor comes
/// earlier in the calendar crosses New Year and is tried on both sides of it.
fn interval_containing(
    open: MonthDay,
    close: MonthDay,
    date: NaiveDate,
) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let year = date.year();
    let candidates = match open.cmp(&close) {
        Ordering::Less => vec![(open.in_year(year)?, close.in_year(year)?)],
        Ordering::Greater => vec![
            (open.in_year(year - 1)?, close.in_year(year)?),
            (open.in_year(year)?, close.in_year(year + 1)?),
        ],
        Ordering::Equal => vec![],
    };
    Ok(candidates
        .into_iter()
        .find(|(start, end)| *start <= date && date < *end))
}

/// Resolve the fiscal quarter for `date`.
///
/// Q1..Q3 are matched first. A date before this year's Q1 anchor that none
/// of them claims falls in the previous fiscal year's Q4, which runs from
/// the Q4 anchor of the previous calendar year to this year's Q1 anchor.
/// The fiscal year is the target's calendar year in every other case, so a
/// quarter that crosses New Year carries two labels: with the default
/// anchors 2025-12-25 is Q2 FY2025 and 2026-01-15 is Q2 FY2026, both in the
/// quarter starting 2025-12-22.
/// Anchor ordering is assumed, not checked here. Dates within a year of
/// chrono's limits are `InvalidDate`.
pub fn resolve_fiscal_quarter(
    settings: &FiscalSettings,
    date: NaiveDate,
) -> Result<FiscalQuarter> {
    let year = date.year();
    let anchors = settings.anchors();
    let labels = [
        FiscalQuarterLabel::Q1,
        FiscalQuarterLabel::Q2,
        FiscalQuarterLabel::Q3,
    ];

    for (i, label) in labels.into_iter().enumerate() {
        if let Some((start, close)) = interval_containing(anchors[i], anchors[i + 1], date)? {
            return quarter(label, year, start, close);
        }
    }

    let q1 = settings.q1_start.in_year(year)?;
    if date < q1 {
        return quarter(
            FiscalQuarterLabel::Q4,
            year - 1,
            settings.q4_start.in_year(year - 1)?,
            q1,
        );
    }
    quarter(
        FiscalQuarterLabel::Q4,
        year,
        settings.q4_start.in_year(year)?,
        settings.q1_start.in_year(year + 1)?,
    )
}

fn quarter(
    label: FiscalQuarterLabel,
    fiscal_year: i32,
    start: NaiveDate,
    close: NaiveDate,
) -> Result<FiscalQuarter> {
    let end = close
        .pred_opt()
        .ok_or_else(|| Error::InvalidDate(format!("no day before {close}")))?;
    Ok(FiscalQuarter {
        quarter: label,
        fiscal_year,
        start,
        end,
    })
}
