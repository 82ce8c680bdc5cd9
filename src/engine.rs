//! Keeps per-period rollups in step with the activity ledger.
//!
//! Rollups can change three ways:
//!
//! * direct edits ([`AggregationEngine::set_rollup`], [`AggregationEngine::edit_rollup`])
//!   overwrite stored values and never touch the ledger;
//! * ledger fan-out ([`AggregationEngine::append_entry`]) records one event and
//!   adds it to the rollup of every granularity covering its date;
//! * recomputation ([`AggregationEngine::recompute`]) replaces a rollup with the
//!   ledger sum over its bounds, discarding any direct edit.
//!
//! Every mutation runs as a single transaction on the writer connection, which
//! `tokio_rusqlite` drives from one thread. Multi-row writes therefore commit
//! fully or not at all, and no two of them interleave.

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::metrics::{
    self, MetricEntry, MetricType, MetricValues, PeriodRollup, RollupDrift, TrendPoint,
};
use crate::period::{PeriodBounds, PeriodMap, PeriodType};
use crate::storage::repository;
use crate::storage::retry::with_busy_retry;
use crate::storage::Database;

/// Most periods a trend query may return.
pub const MAX_HISTORY: u32 = 100;

pub(crate) fn validate_tenant(tenant: &str) -> Result<()> {
    if tenant.trim().is_empty() {
        return Err(Error::InvalidIdentifier("tenant must not be empty".into()));
    }
    Ok(())
}

fn validate_value(metric: MetricType, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::InvalidValue(format!("{metric} = {value}")));
    }
    Ok(())
}

fn validate_values(values: &MetricValues) -> Result<()> {
    values
        .iter()
        .try_for_each(|(metric, value)| validate_value(metric, value))
}

fn validate_limit(limit: u32) -> Result<()> {
    if limit == 0 || limit > MAX_HISTORY {
        return Err(Error::InvalidLimit(format!(
            "{limit} (expected 1..={MAX_HISTORY})"
        )));
    }
    Ok(())
}

/// Stored rollup or the zero default for its bounds.
fn rollup_or_default(
    conn: &Connection,
    tenant: &str,
    period_type: PeriodType,
    bounds: PeriodBounds,
) -> std::result::Result<PeriodRollup, rusqlite::Error> {
    Ok(repository::get_rollup(conn, tenant, period_type, bounds)?
        .unwrap_or_else(|| PeriodRollup::unpersisted(tenant, period_type, bounds)))
}

#[derive(Clone)]
pub struct AggregationEngine {
    db: Database,
}

impl AggregationEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ── Direct edits ───────────────────────────────────────────────

    /// Stored rollup for the period containing `date`, or a zero default.
    pub async fn get_rollup(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<PeriodRollup> {
        validate_tenant(tenant)?;
        let tenant = tenant.to_string();
        let bounds = period_type.resolve(date)?;

        let rollup = self
            .db
            .reader()
            .call(move |conn| rollup_or_default(conn, &tenant, period_type, bounds))
            .await?;
        Ok(rollup)
    }

    /// Replace all twenty values of one rollup.
    pub async fn set_rollup(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
        values: MetricValues,
    ) -> Result<PeriodRollup> {
        validate_tenant(tenant)?;
        validate_values(&values)?;
        let tenant = tenant.to_string();
        let bounds = period_type.resolve(date)?;
        log::debug!("Setting {period_type} rollup {} for {tenant}", bounds.start);

        let rollup = self
            .db
            .writer()
            .call(move |conn| {
                with_busy_retry(conn, |conn| {
                    let tx = conn.transaction()?;
                    repository::put_rollup(&tx, &tenant, period_type, bounds, &values)?;
                    let stored = rollup_or_default(&tx, &tenant, period_type, bounds)?;
                    tx.commit()?;
                    Ok(stored)
                })
            })
            .await?;
        Ok(rollup)
    }

    /// Overwrite the named fields of one rollup, keeping the rest.
    pub async fn edit_rollup(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
        changes: &[(MetricType, f64)],
    ) -> Result<PeriodRollup> {
        validate_tenant(tenant)?;
        for (metric, value) in changes {
            validate_value(*metric, *value)?;
        }
        let tenant = tenant.to_string();
        let changes = changes.to_vec();
        let bounds = period_type.resolve(date)?;
        log::debug!(
            "Editing {} field(s) of {period_type} rollup {} for {tenant}",
            changes.len(),
            bounds.start
        );

        let rollup = self
            .db
            .writer()
            .call(move |conn| {
                with_busy_retry(conn, |conn| {
                    let tx = conn.transaction()?;
                    let mut values = rollup_or_default(&tx, &tenant, period_type, bounds)?.values;
                    for (metric, value) in &changes {
                        values.set(*metric, *value);
                    }
                    repository::put_rollup(&tx, &tenant, period_type, bounds, &values)?;
                    let stored = rollup_or_default(&tx, &tenant, period_type, bounds)?;
                    tx.commit()?;
                    Ok(stored)
                })
            })
            .await?;
        Ok(rollup)
    }

    // ── Ledger fan-out ─────────────────────────────────────────────

    /// Record one activity event and add it to all five covering rollups.
    pub async fn append_entry(
        &self,
        tenant: &str,
        metric_type: MetricType,
        value: f64,
        date: NaiveDate,
        note: Option<&str>,
    ) -> Result<MetricEntry> {
        validate_tenant(tenant)?;
        validate_value(metric_type, value)?;

        let entry = MetricEntry {
            id: uuid::Uuid::new_v4().to_string(),
            tenant: tenant.to_string(),
            metric_type,
            value,
            entry_date: date,
            note: note.map(str::to_string),
            created_at: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        };
        let covering = PeriodMap::covering(date)?;
        log::debug!("Appending {metric_type} {value} on {date} for {tenant}");

        let stored = entry.clone();
        self.db
            .writer()
            .call(move |conn| {
                with_busy_retry(conn, |conn| {
                    let tx = conn.transaction()?;
                    repository::insert_entry(&tx, &stored)?;
                    for (period_type, bounds) in covering.iter() {
                        repository::increment_rollup(
                            &tx,
                            &stored.tenant,
                            period_type,
                            *bounds,
                            stored.metric_type,
                            stored.value,
                        )?;
                    }
                    tx.commit()
                })
            })
            .await?;
        Ok(entry)
    }

    // ── Recomputation ──────────────────────────────────────────────

    /// Rebuild one rollup from the ledger, discarding direct edits.
    pub async fn recompute(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<MetricValues> {
        validate_tenant(tenant)?;
        let tenant = tenant.to_string();
        let bounds = period_type.resolve(date)?;
        log::info!(
            "Recomputing {period_type} rollup {}..{} for {tenant}",
            bounds.start,
            bounds.end
        );

        let values = self
            .db
            .writer()
            .call(move |conn| {
                with_busy_retry(conn, |conn| {
                    let tx = conn.transaction()?;
                    let values =
                        repository::summary_in_range(&tx, &tenant, bounds.start, bounds.end)?;
                    repository::put_rollup(&tx, &tenant, period_type, bounds, &values)?;
                    tx.commit()?;
                    Ok(values)
                })
            })
            .await?;
        Ok(values)
    }

    /// Rebuild all five rollups covering `date` in one transaction.
    pub async fn recompute_all(
        &self,
        tenant: &str,
        date: NaiveDate,
    ) -> Result<PeriodMap<MetricValues>> {
        validate_tenant(tenant)?;
        let tenant = tenant.to_string();
        let covering = PeriodMap::covering(date)?;
        log::info!("Recomputing all rollups covering {date} for {tenant}");

        let sums = self
            .db
            .writer()
            .call(move |conn| {
                with_busy_retry(conn, |conn| {
                    let tx = conn.transaction()?;
                    let sums = PeriodMap::try_from_fn(|period_type| {
                        let bounds = *covering.get(period_type);
                        let values =
                            repository::summary_in_range(&tx, &tenant, bounds.start, bounds.end)?;
                        repository::put_rollup(&tx, &tenant, period_type, bounds, &values)?;
                        Ok::<_, rusqlite::Error>(values)
                    })?;
                    tx.commit()?;
                    Ok(sums)
                })
            })
            .await?;
        Ok(sums)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Ledger sum over the period containing `date`. Nothing is persisted.
    pub async fn ledger_aggregate(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<MetricValues> {
        validate_tenant(tenant)?;
        let tenant = tenant.to_string();
        let bounds = period_type.resolve(date)?;

        let values = self
            .db
            .reader()
            .call(move |conn| {
                repository::summary_in_range(conn, &tenant, bounds.start, bounds.end)
            })
            .await?;
        Ok(values)
    }

    /// All five stored rollups covering `date`, read from one snapshot.
    pub async fn multi_granularity_summary(
        &self,
        tenant: &str,
        date: NaiveDate,
    ) -> Result<PeriodMap<PeriodRollup>> {
        validate_tenant(tenant)?;
        let tenant = tenant.to_string();
        let covering = PeriodMap::covering(date)?;

        let summary = self
            .db
            .reader()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let summary = PeriodMap::try_from_fn(|period_type| {
                    rollup_or_default(&tx, &tenant, period_type, *covering.get(period_type))
                })?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>(summary)
            })
            .await?;
        Ok(summary)
    }

    /// Fields where the stored rollup no longer matches the ledger.
    pub async fn rollup_drift(
        &self,
        tenant: &str,
        period_type: PeriodType,
        date: NaiveDate,
    ) -> Result<RollupDrift> {
        validate_tenant(tenant)?;
        let tenant = tenant.to_string();
        let bounds = period_type.resolve(date)?;

        let (stored, ledger) = self
            .db
            .reader()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stored = rollup_or_default(&tx, &tenant, period_type, bounds)?;
                let ledger = repository::summary_in_range(&tx, &tenant, bounds.start, bounds.end)?;
                tx.commit()?;
                Ok::<_, rusqlite::Error>((stored, ledger))
            })
            .await?;

        let drift = metrics::rollup_drift(&stored, &ledger);
        if !drift.is_consistent() {
            log::debug!(
                "{} field(s) of {period_type} rollup {} differ from the ledger",
                drift.drifted.len(),
                bounds.start
            );
        }
        Ok(drift)
    }

    /// Ledger total of one metric over `start..=end`.
    pub async fn sum_in_range(
        &self,
        tenant: &str,
        metric_type: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<f64> {
        validate_tenant(tenant)?;
        let tenant = tenant.to_string();

        let sum = self
            .db
            .reader()
            .call(move |conn| repository::sum_in_range(conn, &tenant, metric_type, start, end))
            .await?;
        Ok(sum)
    }

    /// Ledger entries dated within `start..=end`, oldest first.
    pub async fn entries_in_range(
        &self,
        tenant: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<MetricEntry>> {
        validate_tenant(tenant)?;
        if end < start {
            return Err(Error::InvalidDate(format!("range ends {end} before it starts {start}")));
        }
        let tenant = tenant.to_string();

        let entries = self
            .db
            .reader()
            .call(move |conn| repository::entries_in_range(conn, &tenant, start, end))
            .await?;
        Ok(entries)
    }

    /// The `limit` most recent stored periods of one type, oldest first,
    /// each with its GUT ratio.
    pub async fn performance_trend(
        &self,
        tenant: &str,
        period_type: PeriodType,
        limit: u32,
    ) -> Result<Vec<TrendPoint>> {
        validate_tenant(tenant)?;
        validate_limit(limit)?;
        let tenant = tenant.to_string();

        let history = self
            .db
            .reader()
            .call(move |conn| repository::rollup_history(conn, &tenant, period_type, limit))
            .await?;

        Ok(history
            .into_iter()
            .map(|rollup| TrendPoint {
                period_start: rollup.period_start,
                period_end: rollup.period_end,
                gut_ratio: rollup.values.gut_ratio(),
                values: rollup.values,
            })
            .collect())
    }
}
