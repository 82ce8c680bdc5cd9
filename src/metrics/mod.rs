pub mod types;

pub use types::*;

/// Differences below this are float noise from summing fractional values.
const DRIFT_EPSILON: f64 = 1e-9;

/// Percent of `target` reached by `actual`, rounded. A zero target reports 0.
pub fn progress_percent(actual: f64, target: f64) -> f64 {
    if target == 0.0 {
        return 0.0;
    }
    (actual / target * 100.0).round()
}

/// Compare a period's values against the caller's goal for that granularity.
pub fn goal_progress(actual: &MetricValues, goal: &Goal) -> GoalProgress {
    let percent = actual
        .iter()
        .map(|(metric, value)| (metric, progress_percent(value, goal.targets.get(metric))))
        .collect();

    GoalProgress {
        period_type: goal.period_type,
        actual: *actual,
        targets: goal.targets,
        percent,
    }
}

/// Report every metric where the stored rollup differs from the ledger sum.
pub fn rollup_drift(stored: &PeriodRollup, ledger: &MetricValues) -> RollupDrift {
    let drifted = stored
        .values
        .iter()
        .filter_map(|(metric, value)| {
            let truth = ledger.get(metric);
            ((value - truth).abs() > DRIFT_EPSILON).then_some(MetricDrift {
                metric_type: metric,
                stored: value,
                ledger: truth,
            })
        })
        .collect();

    RollupDrift {
        period_type: stored.period_type,
        period_start: stored.period_start,
        period_end: stored.period_end,
        persisted: stored.persisted,
        drifted,
    }
}
