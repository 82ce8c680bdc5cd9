use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::period::{PeriodBounds, PeriodType};

/// Advisor activity counter. The set is closed: storage columns, ledger
/// CHECK constraints and [`MetricValues`] slots are all derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricType {
    DaysWorked,
    MeetingsMade,
    KeptMeetings,
    Dials,
    Reached,
    MeetingsSet,
    Meals,
    QsObtained,
    QsAsked,
    NewSeen,
    NewFactFinder,
    CaseOpened,
    JointWork,
    Plans,
    Closes,
    Points,
    Lives,
    Clients,
    /// Currency, the only counter that is routinely fractional.
    Premium,
    MeetingsAhead,
}

impl MetricType {
    pub const COUNT: usize = 20;

    pub const ALL: [MetricType; Self::COUNT] = [
        MetricType::DaysWorked,
        MetricType::MeetingsMade,
        MetricType::KeptMeetings,
        MetricType::Dials,
        MetricType::Reached,
        MetricType::MeetingsSet,
        MetricType::Meals,
        MetricType::QsObtained,
        MetricType::QsAsked,
        MetricType::NewSeen,
        MetricType::NewFactFinder,
        MetricType::CaseOpened,
        MetricType::JointWork,
        MetricType::Plans,
        MetricType::Closes,
        MetricType::Points,
        MetricType::Lives,
        MetricType::Clients,
        MetricType::Premium,
        MetricType::MeetingsAhead,
    ];

    /// Snake-case name; doubles as the rollup column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::DaysWorked => "days_worked",
            MetricType::MeetingsMade => "meetings_made",
            MetricType::KeptMeetings => "kept_meetings",
            MetricType::Dials => "dials",
            MetricType::Reached => "reached",
            MetricType::MeetingsSet => "meetings_set",
            MetricType::Meals => "meals",
            MetricType::QsObtained => "qs_obtained",
            MetricType::QsAsked => "qs_asked",
            MetricType::NewSeen => "new_seen",
            MetricType::NewFactFinder => "new_fact_finder",
            MetricType::CaseOpened => "case_opened",
            MetricType::JointWork => "joint_work",
            MetricType::Plans => "plans",
            MetricType::Closes => "closes",
            MetricType::Points => "points",
            MetricType::Lives => "lives",
            MetricType::Clients => "clients",
            MetricType::Premium => "premium",
            MetricType::MeetingsAhead => "meetings_ahead",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        MetricType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::InvalidMetricType(s.to_string()))
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MetricType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One value for every [`MetricType`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetricValues([f64; MetricType::COUNT]);

impl MetricValues {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: MetricType) -> f64 {
        self.0[metric.index()]
    }

    pub fn set(&mut self, metric: MetricType, value: f64) {
        self.0[metric.index()] = value;
    }

    /// Builder-style setter.
    pub fn with(mut self, metric: MetricType, value: f64) -> Self {
        self.set(metric, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricType, f64)> + '_ {
        MetricType::ALL.into_iter().map(move |m| (m, self.get(m)))
    }

    /// Values in column order, for binding into SQL.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// GUT ratio: closes per kept meeting, as a rounded percentage.
    pub fn gut_ratio(&self) -> f64 {
        let kept = self.get(MetricType::KeptMeetings);
        if kept > 0.0 {
            (self.get(MetricType::Closes) * 100.0 / kept).round()
        } else {
            0.0
        }
    }
}

impl FromIterator<(MetricType, f64)> for MetricValues {
    fn from_iter<I: IntoIterator<Item = (MetricType, f64)>>(iter: I) -> Self {
        let mut values = MetricValues::zero();
        for (metric, value) in iter {
            values.set(metric, value);
        }
        values
    }
}

impl Serialize for MetricValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(MetricType::COUNT))?;
        for (metric, value) in self.iter() {
            map.serialize_entry(metric.as_str(), &value)?;
        }
        map.end()
    }
}

/// A single logged activity event. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEntry {
    pub id: String,
    pub tenant: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub entry_date: NaiveDate,
    pub note: Option<String>,
    pub created_at: String,
}

/// Stored (or default) sums for one period instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodRollup {
    pub tenant: String,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub values: MetricValues,
    /// False for the zero-valued default returned when no row exists yet.
    pub persisted: bool,
}

impl PeriodRollup {
    /// The all-zero record reported for a period nothing has been stored for.
    pub fn unpersisted(tenant: &str, period_type: PeriodType, bounds: PeriodBounds) -> Self {
        Self {
            tenant: tenant.to_string(),
            period_type,
            period_start: bounds.start,
            period_end: bounds.end,
            values: MetricValues::zero(),
            persisted: false,
        }
    }
}

/// Caller-supplied targets for one granularity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Goal {
    pub tenant: String,
    pub period_type: PeriodType,
    pub targets: MetricValues,
}

/// Percent of goal reached, per metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalProgress {
    pub period_type: PeriodType,
    pub actual: MetricValues,
    pub targets: MetricValues,
    pub percent: MetricValues,
}

/// A metric whose stored rollup value disagrees with the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDrift {
    pub metric_type: MetricType,
    pub stored: f64,
    pub ledger: f64,
}

/// Difference between a stored rollup and the ledger-derived truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupDrift {
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub persisted: bool,
    pub drifted: Vec<MetricDrift>,
}

impl RollupDrift {
    pub fn is_consistent(&self) -> bool {
        self.drifted.is_empty()
    }
}

/// One stored period in a performance trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub values: MetricValues,
    pub gut_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_type_count_and_order() {
        assert_eq!(MetricType::ALL.len(), MetricType::COUNT);
        for (i, m) in MetricType::ALL.iter().enumerate() {
            assert_eq!(m.index(), i, "{m} out of order");
        }
        assert_eq!(MetricType::ALL[0], MetricType::DaysWorked);
        assert_eq!(MetricType::ALL[19], MetricType::MeetingsAhead);
    }

    #[test]
    fn test_parse_metric_type() {
        assert_eq!("dials".parse::<MetricType>().unwrap(), MetricType::Dials);
        assert_eq!(
            "new_fact_finder".parse::<MetricType>().unwrap(),
            MetricType::NewFactFinder
        );
        for m in MetricType::ALL {
            assert_eq!(m.as_str().parse::<MetricType>().unwrap(), m);
        }
    }

    #[test]
    fn test_parse_metric_type_invalid() {
        for s in ["", "Dials", "referrals", "appointments", "custom"] {
            assert!(
                matches!(s.parse::<MetricType>(), Err(Error::InvalidMetricType(_))),
                "{s:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_metric_values_get_set() {
        let mut v = MetricValues::zero();
        assert!(v.iter().all(|(_, x)| x == 0.0));

        v.set(MetricType::Dials, 10.0);
        v.set(MetricType::Dials, 15.0);
        v.set(MetricType::Premium, 1250.75);
        v.set(MetricType::Closes, -1.0);

        assert_eq!(v.get(MetricType::Dials), 15.0);
        assert_eq!(v.get(MetricType::Premium), 1250.75);
        assert_eq!(v.get(MetricType::Closes), -1.0);
        assert_eq!(v.get(MetricType::Lives), 0.0);
    }

    #[test]
    fn test_metric_values_from_iter() {
        let v: MetricValues = [(MetricType::Plans, 2.0), (MetricType::Lives, 3.0)]
            .into_iter()
            .collect();
        assert_eq!(v.get(MetricType::Plans), 2.0);
        assert_eq!(v.get(MetricType::Lives), 3.0);
        assert_eq!(v.get(MetricType::Dials), 0.0);
    }

    #[test]
    fn test_metric_values_serialize_zero_filled() {
        let v = MetricValues::zero().with(MetricType::Premium, 99.5);
        let json = serde_json::to_value(v).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 20);
        assert_eq!(obj["premium"], 99.5);
        assert_eq!(obj["dials"], 0.0);
        assert_eq!(obj["meetings_ahead"], 0.0);
    }

    #[test]
    fn test_gut_ratio() {
        let v = MetricValues::zero()
            .with(MetricType::Closes, 2.0)
            .with(MetricType::KeptMeetings, 3.0);
        assert_eq!(v.gut_ratio(), 67.0);

        let none_kept = MetricValues::zero().with(MetricType::Closes, 2.0);
        assert_eq!(none_kept.gut_ratio(), 0.0);
    }
}
