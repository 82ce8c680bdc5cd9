use advisordw::{
    AdvisorDW, Database, Error, FiscalQuarterLabel, FiscalSettings, MetricType, MetricValues,
    PeriodType,
};
use chrono::{Duration, NaiveDate};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

async fn memory_dw() -> AdvisorDW {
    AdvisorDW::new(Database::open_memory().await.unwrap())
}

#[tokio::test]
async fn logged_dials_roll_up_across_a_week_and_month() {
    let dw = memory_dw().await;
    // Sunday, Monday, Tuesday of one week, all in October
    for day in [d(2025, 10, 5), d(2025, 10, 6), d(2025, 10, 7)] {
        dw.append_entry("advisor-1", MetricType::Dials, 10.0, day, None)
            .await
            .unwrap();
    }

    let weekly = dw
        .get_rollup("advisor-1", PeriodType::Weekly, d(2025, 10, 8))
        .await
        .unwrap();
    assert_eq!(weekly.period_start, d(2025, 10, 5));
    assert_eq!(weekly.values.get(MetricType::Dials), 30.0);

    let monthly = dw
        .get_rollup("advisor-1", PeriodType::Monthly, d(2025, 10, 31))
        .await
        .unwrap();
    assert_eq!(monthly.values.get(MetricType::Dials), 30.0);

    let daily = dw
        .recompute("advisor-1", PeriodType::Daily, d(2025, 10, 6))
        .await
        .unwrap();
    assert_eq!(daily.get(MetricType::Dials), 10.0);
}

#[tokio::test]
async fn fan_out_matches_ledger_for_every_granularity() {
    let dw = memory_dw().await;
    let start = d(2024, 12, 20);
    for i in 0..30 {
        let day = start + Duration::days(i * 3);
        dw.append_entry("advisor-1", MetricType::KeptMeetings, 1.0, day, None)
            .await
            .unwrap();
        dw.append_entry("advisor-1", MetricType::Premium, 125.25, day, Some("policy"))
            .await
            .unwrap();
    }

    for at in [d(2024, 12, 31), d(2025, 1, 1), d(2025, 2, 14), d(2025, 3, 20)] {
        let summary = dw.multi_granularity_summary("advisor-1", at).await.unwrap();
        for (period_type, rollup) in summary.iter() {
            let ledger = dw
                .ledger_aggregate("advisor-1", period_type, at)
                .await
                .unwrap();
            assert_eq!(
                rollup.values.get(MetricType::KeptMeetings),
                ledger.get(MetricType::KeptMeetings),
                "{period_type} at {at}"
            );
            assert!(
                (rollup.values.get(MetricType::Premium) - ledger.get(MetricType::Premium)).abs()
                    < 1e-6,
                "{period_type} at {at}"
            );
            let drift = dw
                .rollup_drift("advisor-1", period_type, at)
                .await
                .unwrap();
            assert!(drift.is_consistent(), "{period_type} at {at}: {drift:?}");
        }
    }
}

#[tokio::test]
async fn direct_edit_is_provisional_until_recompute() {
    let dw = memory_dw().await;
    dw.append_entry("advisor-1", MetricType::Closes, 1.0, d(2025, 4, 2), None)
        .await
        .unwrap();

    dw.set_rollup(
        "advisor-1",
        PeriodType::Quarterly,
        d(2025, 4, 2),
        MetricValues::zero().with(MetricType::Closes, 9.0),
    )
    .await
    .unwrap();
    let drift = dw
        .rollup_drift("advisor-1", PeriodType::Quarterly, d(2025, 4, 2))
        .await
        .unwrap();
    assert_eq!(drift.drifted.len(), 1);
    assert_eq!(drift.drifted[0].stored, 9.0);
    assert_eq!(drift.drifted[0].ledger, 1.0);

    // Other granularities were untouched by the edit
    let monthly = dw
        .get_rollup("advisor-1", PeriodType::Monthly, d(2025, 4, 2))
        .await
        .unwrap();
    assert_eq!(monthly.values.get(MetricType::Closes), 1.0);

    let sums = dw.recompute_all("advisor-1", d(2025, 4, 2)).await.unwrap();
    assert_eq!(sums.quarterly.get(MetricType::Closes), 1.0);
    let quarterly = dw
        .get_rollup("advisor-1", PeriodType::Quarterly, d(2025, 5, 30))
        .await
        .unwrap();
    assert_eq!(quarterly.values.get(MetricType::Closes), 1.0);
}

#[tokio::test]
async fn negative_entries_are_corrections() {
    let dw = memory_dw().await;
    dw.append_entry("advisor-1", MetricType::Lives, 3.0, d(2025, 8, 1), None)
        .await
        .unwrap();
    dw.append_entry("advisor-1", MetricType::Lives, -1.0, d(2025, 8, 2), Some("duplicate"))
        .await
        .unwrap();

    let yearly = dw
        .get_rollup("advisor-1", PeriodType::Yearly, d(2025, 1, 1))
        .await
        .unwrap();
    assert_eq!(yearly.values.get(MetricType::Lives), 2.0);

    let entries = dw
        .entries_in_range("advisor-1", d(2025, 8, 1), d(2025, 8, 31))
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].value, -1.0);
}

#[tokio::test]
async fn concurrent_appends_lose_nothing() {
    let dw = std::sync::Arc::new(memory_dw().await);
    let mut handles = Vec::new();
    for i in 0..20 {
        let dw = dw.clone();
        handles.push(tokio::spawn(async move {
            dw.append_entry("advisor-1", MetricType::Reached, 1.0, d(2025, 6, 1 + i % 5), None)
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let monthly = dw
        .get_rollup("advisor-1", PeriodType::Monthly, d(2025, 6, 1))
        .await
        .unwrap();
    assert_eq!(monthly.values.get(MetricType::Reached), 20.0);
}

#[tokio::test]
async fn tenants_do_not_share_rollups_or_settings() {
    let dw = memory_dw().await;
    dw.append_entry("advisor-1", MetricType::Meals, 2.0, d(2025, 10, 1), None)
        .await
        .unwrap();
    dw.update_fiscal_settings(
        "advisor-1",
        FiscalSettings::parse("01-01", "04-01", "07-01", "10-01").unwrap(),
    )
    .await
    .unwrap();

    let other = dw
        .multi_granularity_summary("advisor-2", d(2025, 10, 1))
        .await
        .unwrap();
    assert!(other.iter().all(|(_, r)| !r.persisted));

    let q = dw
        .resolve_fiscal_quarter("advisor-2", d(2025, 10, 1))
        .await
        .unwrap();
    assert_eq!(q.quarter, FiscalQuarterLabel::Q1);
    assert_eq!(q.start, d(2025, 9, 22));

    let q = dw
        .resolve_fiscal_quarter("advisor-1", d(2025, 10, 1))
        .await
        .unwrap();
    assert_eq!(q.quarter, FiscalQuarterLabel::Q4);
}

#[tokio::test]
async fn default_fiscal_calendar_examples() {
    let dw = memory_dw().await;

    let q = dw
        .resolve_fiscal_quarter("advisor-1", d(2025, 10, 1))
        .await
        .unwrap();
    assert_eq!((q.quarter, q.fiscal_year), (FiscalQuarterLabel::Q1, 2025));
    assert_eq!((q.start, q.end), (d(2025, 9, 22), d(2025, 12, 21)));

    let q = dw
        .resolve_fiscal_quarter("advisor-1", d(2025, 1, 15))
        .await
        .unwrap();
    assert_eq!((q.quarter, q.fiscal_year), (FiscalQuarterLabel::Q2, 2025));

    let q = dw
        .resolve_fiscal_quarter("advisor-1", d(2025, 9, 1))
        .await
        .unwrap();
    assert_eq!((q.quarter, q.fiscal_year), (FiscalQuarterLabel::Q4, 2024));
    assert_eq!((q.start, q.end), (d(2024, 6, 22), d(2025, 9, 21)));
}

#[tokio::test]
async fn invalid_inputs_are_typed_errors() {
    assert!(matches!(
        "fortnightly".parse::<PeriodType>(),
        Err(Error::InvalidPeriodType(_))
    ));
    assert!(matches!(
        "referrals".parse::<MetricType>(),
        Err(Error::InvalidMetricType(_))
    ));
    assert!(matches!(
        FiscalSettings::parse("02-29", "05-01", "08-01", "11-01"),
        Err(Error::InvalidDate(_))
    ));

    let dw = memory_dw().await;
    assert!(matches!(
        dw.get_rollup("", PeriodType::Daily, d(2025, 1, 1)).await,
        Err(Error::InvalidIdentifier(_))
    ));
}

#[tokio::test]
async fn file_backed_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("advisordw.db");

    {
        let dw = AdvisorDW::new(Database::open_at(&path).await.unwrap());
        dw.append_entry("advisor-1", MetricType::Points, 15.0, d(2025, 10, 1), None)
            .await
            .unwrap();
    }

    let dw = AdvisorDW::new(Database::open_at(&path).await.unwrap());
    let monthly = dw
        .get_rollup("advisor-1", PeriodType::Monthly, d(2025, 10, 1))
        .await
        .unwrap();
    assert!(monthly.persisted);
    assert_eq!(monthly.values.get(MetricType::Points), 15.0);
}
