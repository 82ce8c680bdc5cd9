use chrono::NaiveDate;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::date_util::{format_date, DATE_FORMAT};
use crate::fiscal::{FiscalSettings, MonthDay};
use crate::metrics::{MetricEntry, MetricType, MetricValues, PeriodRollup};
use crate::period::{PeriodBounds, PeriodType};

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn date_column(row: &Row, idx: usize) -> Result<NaiveDate, rusqlite::Error> {
    let s: String = row.get(idx)?;
    NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn metric_column(row: &Row, idx: usize) -> Result<MetricType, rusqlite::Error> {
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_error(idx, e))
}

/// Comma-separated rollup value columns, in `MetricType::ALL` order.
fn metric_columns() -> String {
    MetricType::ALL
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read `MetricType::COUNT` consecutive REAL columns starting at `offset`.
fn metric_values(row: &Row, offset: usize) -> Result<MetricValues, rusqlite::Error> {
    let mut values = MetricValues::zero();
    for (i, metric) in MetricType::ALL.into_iter().enumerate() {
        values.set(metric, row.get(offset + i)?);
    }
    Ok(values)
}

// ── Ledger ─────────────────────────────────────────────────────────

pub fn insert_entry(conn: &Connection, entry: &MetricEntry) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO metric_entries (id, tenant_id, metric_type, value, entry_date, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.tenant,
            entry.metric_type.as_str(),
            entry.value,
            format_date(entry.entry_date),
            entry.note,
            entry.created_at,
        ],
    )?;
    Ok(())
}

/// Sum of one metric over an inclusive date range. Zero when nothing matches.
pub fn sum_in_range(
    conn: &Connection,
    tenant: &str,
    metric: MetricType,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<f64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(SUM(value), 0.0) FROM metric_entries
         WHERE tenant_id = ?1 AND metric_type = ?2 AND entry_date BETWEEN ?3 AND ?4",
        params![tenant, metric.as_str(), format_date(start), format_date(end)],
        |row| row.get(0),
    )
}

/// Sum of every metric over an inclusive date range, zero-filled.
pub fn summary_in_range(
    conn: &Connection,
    tenant: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<MetricValues, rusqlite::Error> {
    let mut stmt = conn.prepare_cached(
        "SELECT metric_type, SUM(value) FROM metric_entries
         WHERE tenant_id = ?1 AND entry_date BETWEEN ?2 AND ?3
         GROUP BY metric_type",
    )?;
    let rows = stmt.query_map(
        params![tenant, format_date(start), format_date(end)],
        |row| Ok((metric_column(row, 0)?, row.get::<_, f64>(1)?)),
    )?;
    let summary = rows.collect::<Result<MetricValues, _>>()?;
    Ok(summary)
}

/// Ledger entries in an inclusive date range, oldest first.
pub fn entries_in_range(
    conn: &Connection,
    tenant: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MetricEntry>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, metric_type, value, entry_date, notes, created_at
         FROM metric_entries
         WHERE tenant_id = ?1 AND entry_date BETWEEN ?2 AND ?3
         ORDER BY entry_date, created_at, rowid",
    )?;
    let rows = stmt.query_map(
        params![tenant, format_date(start), format_date(end)],
        |row| {
            Ok(MetricEntry {
                id: row.get(0)?,
                tenant: row.get(1)?,
                metric_type: metric_column(row, 2)?,
                value: row.get(3)?,
                entry_date: date_column(row, 4)?,
                note: row.get(5)?,
                created_at: row.get(6)?,
            })
        },
    )?;
    let entries = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

// ── Rollups ────────────────────────────────────────────────────────

/// Stored rollup keyed by `bounds.start`, if one exists.
pub fn get_rollup(
    conn: &Connection,
    tenant: &str,
    period_type: PeriodType,
    bounds: PeriodBounds,
) -> Result<Option<PeriodRollup>, rusqlite::Error> {
    let sql = format!(
        "SELECT period_start, period_end, {} FROM period_rollups
         WHERE tenant_id = ?1 AND period_type = ?2 AND period_start = ?3",
        metric_columns()
    );
    conn.query_row(
        &sql,
        params![tenant, period_type.as_str(), format_date(bounds.start)],
        |row| {
            Ok(PeriodRollup {
                tenant: tenant.to_string(),
                period_type,
                period_start: date_column(row, 0)?,
                period_end: date_column(row, 1)?,
                values: metric_values(row, 2)?,
                persisted: true,
            })
        },
    )
    .optional()
}

/// Write all twenty values for a period, replacing whatever was stored.
pub fn put_rollup(
    conn: &Connection,
    tenant: &str,
    period_type: PeriodType,
    bounds: PeriodBounds,
    values: &MetricValues,
) -> Result<(), rusqlite::Error> {
    let columns = metric_columns();
    let placeholders = (5..5 + MetricType::COUNT)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let assignments = MetricType::ALL
        .iter()
        .map(|m| format!("{0} = excluded.{0}", m.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO period_rollups (tenant_id, period_type, period_start, period_end, {columns})
         VALUES (?1, ?2, ?3, ?4, {placeholders})
         ON CONFLICT(tenant_id, period_type, period_start) DO UPDATE SET
           period_end = excluded.period_end, {assignments}, updated_at = datetime('now')"
    );

    let mut params: Vec<Box<dyn ToSql>> = vec![
        Box::new(tenant.to_string()),
        Box::new(period_type.as_str()),
        Box::new(format_date(bounds.start)),
        Box::new(format_date(bounds.end)),
    ];
    params.extend(values.as_slice().iter().map(|v| Box::new(*v) as Box<dyn ToSql>));
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

    conn.execute(&sql, param_refs.as_slice())?;
    Ok(())
}

/// Add `delta` to one field, creating the row at zero first if absent.
/// The addition is evaluated by SQLite in the upsert itself.
pub fn increment_rollup(
    conn: &Connection,
    tenant: &str,
    period_type: PeriodType,
    bounds: PeriodBounds,
    metric: MetricType,
    delta: f64,
) -> Result<(), rusqlite::Error> {
    let col = metric.as_str();
    let sql = format!(
        "INSERT INTO period_rollups (tenant_id, period_type, period_start, period_end, {col})
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(tenant_id, period_type, period_start) DO UPDATE SET
           {col} = {col} + excluded.{col}, updated_at = datetime('now')"
    );
    conn.execute(
        &sql,
        params![
            tenant,
            period_type.as_str(),
            format_date(bounds.start),
            format_date(bounds.end),
            delta,
        ],
    )?;
    Ok(())
}

/// The `limit` most recent stored rollups of one type, oldest first.
pub fn rollup_history(
    conn: &Connection,
    tenant: &str,
    period_type: PeriodType,
    limit: u32,
) -> Result<Vec<PeriodRollup>, rusqlite::Error> {
    let sql = format!(
        "SELECT period_start, period_end, {} FROM period_rollups
         WHERE tenant_id = ?1 AND period_type = ?2
         ORDER BY period_start DESC
         LIMIT ?3",
        metric_columns()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![tenant, period_type.as_str(), limit], |row| {
        Ok(PeriodRollup {
            tenant: tenant.to_string(),
            period_type,
            period_start: date_column(row, 0)?,
            period_end: date_column(row, 1)?,
            values: metric_values(row, 2)?,
            persisted: true,
        })
    })?;
    let mut history = rows.collect::<Result<Vec<_>, _>>()?;
    history.reverse();
    Ok(history)
}

// ── Fiscal settings ────────────────────────────────────────────────

pub fn get_fiscal_settings(
    conn: &Connection,
    tenant: &str,
) -> Result<Option<FiscalSettings>, rusqlite::Error> {
    conn.query_row(
        "SELECT q1_start, q2_start, q3_start, q4_start FROM fiscal_settings WHERE tenant_id = ?1",
        params![tenant],
        |row| {
            let anchor = |idx: usize| -> Result<MonthDay, rusqlite::Error> {
                let s: String = row.get(idx)?;
                MonthDay::parse(&s).map_err(|e| conversion_error(idx, e))
            };
            Ok(FiscalSettings {
                q1_start: anchor(0)?,
                q2_start: anchor(1)?,
                q3_start: anchor(2)?,
                q4_start: anchor(3)?,
            })
        },
    )
    .optional()
}

pub fn upsert_fiscal_settings(
    conn: &Connection,
    tenant: &str,
    settings: &FiscalSettings,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO fiscal_settings (tenant_id, q1_start, q2_start, q3_start, q4_start)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(tenant_id) DO UPDATE SET
           q1_start = excluded.q1_start,
           q2_start = excluded.q2_start,
           q3_start = excluded.q3_start,
           q4_start = excluded.q4_start,
           updated_at = datetime('now')",
        params![
            tenant,
            settings.q1_start.to_string(),
            settings.q2_start.to_string(),
            settings.q3_start.to_string(),
            settings.q4_start.to_string(),
        ],
    )?;
    Ok(())
}

/// Stored settings for the tenant, inserting the defaults on first access.
pub fn get_or_create_fiscal_settings(
    conn: &Connection,
    tenant: &str,
) -> Result<FiscalSettings, rusqlite::Error> {
    if let Some(settings) = get_fiscal_settings(conn, tenant)? {
        return Ok(settings);
    }
    let defaults = FiscalSettings::default();
    conn.execute(
        "INSERT OR IGNORE INTO fiscal_settings (tenant_id, q1_start, q2_start, q3_start, q4_start)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            tenant,
            defaults.q1_start.to_string(),
            defaults.q2_start.to_string(),
            defaults.q3_start.to_string(),
            defaults.q4_start.to_string(),
        ],
    )?;
    Ok(get_fiscal_settings(conn, tenant)?.unwrap_or(defaults))
}
