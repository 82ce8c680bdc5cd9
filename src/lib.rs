pub mod date_util;
pub mod engine;
pub mod error;
pub mod fiscal;
pub mod metrics;
pub mod period;
pub mod storage;

use chrono::NaiveDate;

pub use engine::AggregationEngine;
pub use error::{Error, Result};
pub use fiscal::{FiscalQuarter, FiscalQuarterLabel, FiscalSettings, MonthDay};
pub use metrics::{
    Goal, GoalProgress, MetricDrift, MetricEntry, MetricType, MetricValues, PeriodRollup,
    RollupDrift, TrendPoint,
};
pub use period::{PeriodBounds, PeriodMap, PeriodType};
pub use storage::Database;

use engine::validate_tenant;
use storage::repository;
use storage::retry::with_busy_retry;

/// Main entry point for the advisor metrics warehouse.
///
/// Every operation is scoped to an explicit tenant. Rollup operations are
/// delegated to [`AggregationEngine`]; fiscal calendar settings are handled
/// here.
pub struct AdvisorDW {
    db: Database,
    engine: AggregationEngine,
}

impl AdvisorDW {
    pub fn new(db: Database) -> Self {
        let engine = AggregationEngine::new(db.clone());
        Self { db, engine }
    }

    // ── Periods ────────────────────────────────────────────────────

    pub fn resolve_period_boundaries(
        &self,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<PeriodBounds> {
        period_type.resolve(date)
    }

    // ── Rollups ────────────────────────────────────────────────────

    pub async fn get_rollup(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<PeriodRollup> {
        self.engine.get_rollup(tenant, period_type, date).await
    }

    /// Direct edit: replace every field. Survives only until the next recompute.
    pub async fn set_rollup(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
        values: MetricValues,
    ) -> Result<PeriodRollup> {
        self.engine.set_rollup(tenant, period_type, date, values).await
    }

    /// Direct edit of selected fields. Survives only until the next recompute.
    pub async fn edit_rollup(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
        changes: &[(MetricType, f64)],
    ) -> Result<PeriodRollup> {
        self.engine.edit_rollup(tenant, period_type, date, changes).await
    }

    pub async fn append_entry(
        &self,
        tenant: &str,
        metric_type: MetricType,
        value: f64,
        date: NaiveDate,
        note: Option<&str>,
    ) -> Result<MetricEntry> {
        self.engine
            .append_entry(tenant, metric_type, value, date, note)
            .await
    }

    pub async fn recompute(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<MetricValues> {
        self.engine.recompute(tenant, period_type, date).await
    }

    pub async fn recompute_all(
        &self,
        tenant: &str,
        date: NaiveDate,
    ) -> Result<PeriodMap<MetricValues>> {
        self.engine.recompute_all(tenant, date).await
    }

    pub async fn ledger_aggregate(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<MetricValues> {
        self.engine.ledger_aggregate(tenant, period_type, date).await
    }

    pub async fn multi_granularity_summary(
        &self,
        tenant: &str,
        date: NaiveDate,
    ) -> Result<PeriodMap<PeriodRollup>> {
        self.engine.multi_granularity_summary(tenant, date).await
    }

    pub async fn rollup_drift(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<RollupDrift> {
        self.engine.rollup_drift(tenant, period_type, date).await
    }

    pub async fn sum_in_range(
        &self,
        tenant: &str,
        metric_type: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<f64> {
        self.engine.sum_in_range(tenant, metric_type, start, end).await
    }

    pub async fn entries_in_range(
        &self,
        tenant: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricEntry>> {
        self.engine.entries_in_range(tenant, start, end).await
    }

    pub async fn performance_trend(
        &self,
        tenant: &str,
        period_type: PeriodType,
        limit: u32,
    ) -> Result<Vec<TrendPoint>> {
        self.engine
            .performance_trend(tenant, period_type, limit)
            .await
    }

    /// Stored rollup for the goal's granularity at `date`, compared to its targets.
    pub async fn goal_progress(&self, goal: &Goal, date: NaiveDate) -> Result<GoalProgress> {
        let rollup = self
            .engine
            .get_rollup(&goal.tenant, goal.period_type, date)
            .await?;
        Ok(metrics::goal_progress(&rollup.values, goal))
    }

    // ── Fiscal calendar ────────────────────────────────────────────

    /// The tenant's fiscal anchors. Defaults are stored on first access.
    pub async fn fiscal_settings(&self, tenant: &str) -> Result<FiscalSettings> {
        validate_tenant(tenant)?;
        let settings = self
            .db
            .writer()
            .call({
                let tenant = tenant.to_string();
                move |conn| {
                    with_busy_retry(conn, |conn| {
                        repository::get_or_create_fiscal_settings(conn, &tenant)
                    })
                }
            })
            .await?;
        Ok(settings)
    }

    /// Replace the tenant's fiscal anchors after checking their order.
    pub async fn update_fiscal_settings(
        &self,
        tenant: &str,
        settings: FiscalSettings,
    ) -> Result<FiscalSettings> {
        validate_tenant(tenant)?;
        settings.validate()?;
        log::info!(
            "Updating fiscal anchors for {tenant}: {} {} {} {}",
            settings.q1_start,
            settings.q2_start,
            settings.q3_start,
            settings.q4_start
        );

        self.db
            .writer()
            .call({
                let tenant = tenant.to_string();
                move |conn| {
                    with_busy_retry(conn, |conn| {
                        repository::upsert_fiscal_settings(conn, &tenant, &settings)
                    })
                }
            })
            .await?;
        Ok(settings)
    }

    /// Fiscal quarter containing `date` under the tenant's anchors.
    pub async fn resolve_fiscal_quarter(
        &self,
        tenant: &str,
        date: NaiveDate,
    ) -> Result<FiscalQuarter> {
        let settings = self.fiscal_settings(tenant).await?;
        fiscal::resolve_fiscal_quarter(&settings, date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn dw() -> AdvisorDW {
        AdvisorDW::new(Database::open_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_fiscal_settings_default_on_first_access() {
        let dw = dw().await;
        let settings = dw.fiscal_settings("t1").await.unwrap();
        assert_eq!(settings, FiscalSettings::default());

        let q = dw.resolve_fiscal_quarter("t1", d(2025, 10, 1)).await.unwrap();
        assert_eq!(q.quarter, FiscalQuarterLabel::Q1);
        assert_eq!(q.fiscal_year, 2025);
    }

    #[tokio::test]
    async fn test_update_fiscal_settings() {
        let dw = dw().await;
        let calendar = FiscalSettings::parse("01-01", "04-01", "07-01", "10-01").unwrap();
        dw.update_fiscal_settings("t1", calendar).await.unwrap();

        assert_eq!(dw.fiscal_settings("t1").await.unwrap(), calendar);
        let q = dw.resolve_fiscal_quarter("t1", d(2025, 5, 5)).await.unwrap();
        assert_eq!(q.quarter, FiscalQuarterLabel::Q2);
        assert_eq!((q.start, q.end), (d(2025, 4, 1), d(2025, 6, 30)));

        // Other tenants keep the defaults
        assert_eq!(
            dw.fiscal_settings("t2").await.unwrap(),
            FiscalSettings::default()
        );
    }

    #[tokio::test]
    async fn test_update_rejects_ambiguous_anchors() {
        let dw = dw().await;
        let scrambled = FiscalSettings::parse("09-22", "03-22", "12-22", "06-22").unwrap();
        assert!(matches!(
            dw.update_fiscal_settings("t1", scrambled).await,
            Err(Error::FiscalConfigurationAmbiguous(_))
        ));
        assert_eq!(
            dw.fiscal_settings("t1").await.unwrap(),
            FiscalSettings::default()
        );
    }

    #[tokio::test]
    async fn test_fiscal_settings_require_tenant() {
        let dw = dw().await;
        assert!(matches!(
            dw.fiscal_settings(" ").await,
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_period_boundaries() {
        let dw = dw().await;
        let b = dw
            .resolve_period_boundaries(PeriodType::Weekly, d(2025, 10, 1))
            .unwrap();
        assert_eq!((b.start, b.end), (d(2025, 9, 28), d(2025, 10, 4)));
        assert!(matches!(
            dw.resolve_period_boundaries(PeriodType::Weekly, NaiveDate::MAX),
            Err(Error::InvalidDate(_))
        ));
        assert!(matches!(
            dw.resolve_fiscal_quarter("t1", NaiveDate::MAX).await,
            Err(Error::InvalidDate(_))
        ));
    }

    #[tokio::test]
    async fn test_goal_progress_uses_stored_rollup() {
        let dw = dw().await;
        dw.append_entry("t1", MetricType::Dials, 45.0, d(2025, 10, 1), None)
            .await
            .unwrap();

        let goal = Goal {
            tenant: "t1".to_string(),
            period_type: PeriodType::Weekly,
            targets: MetricValues::zero().with(MetricType::Dials, 60.0),
        };
        let progress = dw.goal_progress(&goal, d(2025, 10, 2)).await.unwrap();
        assert_eq!(progress.percent.get(MetricType::Dials), 75.0);
        assert_eq!(progress.actual.get(MetricType::Dials), 45.0);
    }
}
