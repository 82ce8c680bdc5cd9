use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::date_util::{last_day_of_month, quarter_of};
use crate::error::{Error, Result};

/// Rollup granularity.
///
/// `Quarterly` is the plain calendar quarter (Jan-Mar, Apr-Jun, ...). Fiscal
/// quarters live in [`crate::fiscal`] and are never derived from this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// Inclusive date range covered by one period instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodBounds {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodBounds {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl PeriodType {
    /// Every granularity, in fan-out order.
    pub const ALL: [PeriodType; 5] = [
        PeriodType::Daily,
        PeriodType::Weekly,
        PeriodType::Monthly,
        PeriodType::Quarterly,
        PeriodType::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::Daily => "daily",
            PeriodType::Weekly => "weekly",
            PeriodType::Monthly => "monthly",
            PeriodType::Quarterly => "quarterly",
            PeriodType::Yearly => "yearly",
        }
    }

    /// Resolve the period of this type that contains `date`.
    ///
    /// Weeks always run Sunday through Saturday, regardless of any week-start
    /// preference a caller may display elsewhere: rollup keys depend on it.
    /// Dates whose period would leave chrono's range are `InvalidDate`.
    pub fn resolve(self, date: NaiveDate) -> Result<PeriodBounds> {
        let out_of_range = || Error::InvalidDate(format!("no {self} period contains {date}"));
        let bounds = match self {
            PeriodType::Daily => PeriodBounds {
                start: date,
                end: date,
            },
            PeriodType::Weekly => {
                let offset = date.weekday().num_days_from_sunday() as i64;
                let start = date
                    .checked_sub_signed(Duration::days(offset))
                    .ok_or_else(out_of_range)?;
                let end = start
                    .checked_add_signed(Duration::days(6))
                    .ok_or_else(out_of_range)?;
                PeriodBounds { start, end }
            }
            PeriodType::Monthly => PeriodBounds {
                start: date.with_day(1).ok_or_else(out_of_range)?,
                end: last_day_of_month(date.year(), date.month())?,
            },
            PeriodType::Quarterly => {
                let q = quarter_of(date) as u32;
                let start_month = (q - 1) * 3 + 1;
                PeriodBounds {
                    start: NaiveDate::from_ymd_opt(date.year(), start_month, 1)
                        .ok_or_else(out_of_range)?,
                    end: last_day_of_month(date.year(), q * 3)?,
                }
            }
            PeriodType::Yearly => PeriodBounds {
                start: NaiveDate::from_ymd_opt(date.year(), 1, 1).ok_or_else(out_of_range)?,
                end: NaiveDate::from_ymd_opt(date.year(), 12, 31).ok_or_else(out_of_range)?,
            },
        };
        Ok(bounds)
    }
}

impl FromStr for PeriodType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(PeriodType::Daily),
            "weekly" => Ok(PeriodType::Weekly),
            "monthly" => Ok(PeriodType::Monthly),
            "quarterly" => Ok(PeriodType::Quarterly),
            "yearly" => Ok(PeriodType::Yearly),
            _ => Err(Error::InvalidPeriodType(format!(
                "{s:?} (expected one of daily, weekly, monthly, quarterly, yearly)"
            ))),
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per granularity, in fan-out order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodMap<T> {
    pub daily: T,
    pub weekly: T,
    pub monthly: T,
    pub quarterly: T,
    pub yearly: T,
}

impl<T> PeriodMap<T> {
    /// Build a map by evaluating `f` once per granularity, in fan-out order.
    pub fn try_from_fn<E, F>(mut f: F) -> std::result::Result<Self, E>
    where
        F: FnMut(PeriodType) -> std::result::Result<T, E>,
    {
        Ok(Self {
            daily: f(PeriodType::Daily)?,
            weekly: f(PeriodType::Weekly)?,
            monthly: f(PeriodType::Monthly)?,
            quarterly: f(PeriodType::Quarterly)?,
            yearly: f(PeriodType::Yearly)?,
        })
    }

    pub fn get(&self, period_type: PeriodType) -> &T {
        match period_type {
            PeriodType::Daily => &self.daily,
            PeriodType::Weekly => &self.weekly,
            PeriodType::Monthly => &self.monthly,
            PeriodType::Quarterly => &self.quarterly,
            PeriodType::Yearly => &self.yearly,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeriodType, &T)> {
        PeriodType::ALL.into_iter().map(move |pt| (pt, self.get(pt)))
    }
}

impl PeriodMap<PeriodBounds> {
    /// Bounds of every granularity containing `date`.
    pub fn covering(date: NaiveDate) -> Result<Self> {
        Self::try_from_fn(|pt| pt.resolve(date))
    }
}
