use advisordw::date_util::parse_date;
use advisordw::{
    AdvisorDW, FiscalSettings, Goal, MetricType, MetricValues, PeriodRollup, PeriodType,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "advisordw", about = "Advisor activity metrics warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.advisordw/advisordw.db)
    #[arg(long)]
    db: Option<String>,

    /// Advisor (tenant) the command applies to
    #[arg(long, global = true)]
    tenant: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the period boundaries containing a date
    Period {
        /// daily, weekly, monthly, quarterly, yearly
        period_type: String,
        /// Date (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Log an activity event and roll it up into every granularity
    Log {
        /// Metric name (e.g. dials, closes, premium)
        metric: String,
        /// Amount; negative values record corrections
        #[arg(allow_hyphen_values = true)]
        value: f64,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List logged events in a date range
    Entries {
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        from: String,
        /// Last date, inclusive (default: today)
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Read or directly edit stored rollups
    Rollup {
        #[command(subcommand)]
        action: RollupAction,
    },
    /// Rebuild rollups from the ledger (all granularities if none given)
    Recompute {
        period_type: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Sum the ledger over a period without storing anything
    Aggregate {
        period_type: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show stored rollups for all granularities covering a date
    Summary {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show fields where a stored rollup differs from the ledger
    Drift {
        period_type: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show recent stored periods with GUT ratio
    Trend {
        period_type: String,
        /// Number of periods (1-100)
        #[arg(long, default_value = "12")]
        limit: u32,
        #[arg(long)]
        json: bool,
    },
    /// Compare a stored rollup against goal targets
    Progress {
        period_type: String,
        /// Targets as metric=value pairs
        #[arg(required = true)]
        targets: Vec<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Manage the fiscal calendar
    Fiscal {
        #[command(subcommand)]
        action: FiscalAction,
    },
}

#[derive(Subcommand)]
enum RollupAction {
    /// Show the stored rollup for a period
    Get {
        period_type: String,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Replace every field of a rollup (unset fields become zero)
    Set {
        period_type: String,
        /// Values as metric=value pairs
        values: Vec<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Overwrite selected fields of a rollup
    Edit {
        period_type: String,
        /// Values as metric=value pairs
        #[arg(required = true)]
        values: Vec<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FiscalAction {
    /// Show the quarter start anchors
    Get {
        #[arg(long)]
        json: bool,
    },
    /// Set the quarter start anchors (MM-DD)
    Set {
        q1: String,
        q2: String,
        q3: String,
        q4: String,
    },
    /// Show the fiscal quarter containing a date
    Quarter {
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn date_or_today(date: Option<&str>) -> anyhow::Result<NaiveDate> {
    match date {
        Some(s) => Ok(parse_date(s)?),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn require_tenant(tenant: Option<&str>) -> anyhow::Result<&str> {
    tenant.ok_or_else(|| anyhow::anyhow!("--tenant is required for this command"))
}

/// Parse `metric=value` pairs.
fn parse_assignments(pairs: &[String]) -> anyhow::Result<Vec<(MetricType, f64)>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected metric=value, got '{pair}'"))?;
            let metric: MetricType = name.parse()?;
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("'{value}' is not a number for {metric}"))?;
            Ok((metric, value))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // Pure date arithmetic, no database needed
    if let Commands::Period {
        period_type,
        date,
        json,
    } = &cli.command
    {
        let pt: PeriodType = period_type.parse()?;
        let bounds = pt.resolve(date_or_today(date.as_deref())?)?;
        if *json {
            println!("{}", serde_json::to_string_pretty(&bounds)?);
        } else {
            println!("{pt}: {} .. {}", bounds.start, bounds.end);
        }
        return Ok(());
    }

    let db = match &cli.db {
        Some(path) => advisordw::Database::open_at(path).await?,
        None => advisordw::Database::open().await?,
    };
    let dw = AdvisorDW::new(db);
    let tenant = cli.tenant.as_deref();

    match cli.command {
        Commands::Period { .. } => {}
        Commands::Log {
            metric,
            value,
            date,
            note,
            json,
        } => {
            let tenant = require_tenant(tenant)?;
            let metric: MetricType = metric.parse()?;
            let date = date_or_today(date.as_deref())?;
            let entry = dw
                .append_entry(tenant, metric, value, date, note.as_deref())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!(
                    "Logged {} {} on {} ({})",
                    entry.value, entry.metric_type, entry.entry_date, entry.id
                );
            }
        }
        Commands::Entries { from, to, json } => {
            let tenant = require_tenant(tenant)?;
            let start = parse_date(&from)?;
            let end = date_or_today(to.as_deref())?;
            let entries = dw.entries_in_range(tenant, start, end).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No entries between {start} and {end}");
            } else {
                for e in &entries {
                    let note = e
                        .note
                        .as_deref()
                        .map(|n| format!("  # {n}"))
                        .unwrap_or_default();
                    println!(
                        "{}  {:<16} {:>10}{note}",
                        e.entry_date,
                        e.metric_type.as_str(),
                        e.value
                    );
                }
            }
        }
        Commands::Rollup { action } => {
            handle_rollup(&dw, require_tenant(tenant)?, action).await?;
        }
        Commands::Recompute {
            period_type,
            date,
            json,
        } => {
            let tenant = require_tenant(tenant)?;
            let date = date_or_today(date.as_deref())?;
            match period_type {
                Some(pt) => {
                    let pt: PeriodType = pt.parse()?;
                    let values = dw.recompute(tenant, pt, date).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&values)?);
                    } else {
                        println!("Recomputed {pt} {}", pt.resolve(date)?.start);
                        print_values(&values);
                    }
                }
                None => {
                    let sums = dw.recompute_all(tenant, date).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&sums)?);
                    } else {
                        for (pt, values) in sums.iter() {
                            println!("Recomputed {pt} {}", pt.resolve(date)?.start);
                            print_values(values);
                        }
                    }
                }
            }
        }
        Commands::Aggregate {
            period_type,
            date,
            json,
        } => {
            let tenant = require_tenant(tenant)?;
            let pt: PeriodType = period_type.parse()?;
            let date = date_or_today(date.as_deref())?;
            let values = dw.ledger_aggregate(tenant, pt, date).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                let bounds = pt.resolve(date)?;
                println!("Ledger {pt} {} .. {}", bounds.start, bounds.end);
                print_values(&values);
            }
        }
        Commands::Summary { date, json } => {
            let tenant = require_tenant(tenant)?;
            let date = date_or_today(date.as_deref())?;
            let summary = dw.multi_granularity_summary(tenant, date).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                for (_, rollup) in summary.iter() {
                    print_rollup(rollup);
                }
            }
        }
        Commands::Drift {
            period_type,
            date,
            json,
        } => {
            let tenant = require_tenant(tenant)?;
            let pt: PeriodType = period_type.parse()?;
            let date = date_or_today(date.as_deref())?;
            let drift = dw.rollup_drift(tenant, pt, date).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&drift)?);
            } else if drift.is_consistent() {
                println!("{pt} {}: matches the ledger", drift.period_start);
            } else {
                println!(
                    "{pt} {}: {} field(s) differ from the ledger",
                    drift.period_start,
                    drift.drifted.len()
                );
                for m in &drift.drifted {
                    println!(
                        "  {:<16} stored {:>10}  ledger {:>10}",
                        m.metric_type.as_str(),
                        m.stored,
                        m.ledger
                    );
                }
            }
        }
        Commands::Trend {
            period_type,
            limit,
            json,
        } => {
            let tenant = require_tenant(tenant)?;
            let pt: PeriodType = period_type.parse()?;
            let trend = dw.performance_trend(tenant, pt, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&trend)?);
            } else {
                println!(
                    "{:<12} {:>8} {:>8} {:>8} {:>6}",
                    "Period", "Dials", "Kept", "Closes", "GUT%"
                );
                for p in &trend {
                    println!(
                        "{:<12} {:>8} {:>8} {:>8} {:>6}",
                        p.period_start.to_string(),
                        p.values.get(MetricType::Dials),
                        p.values.get(MetricType::KeptMeetings),
                        p.values.get(MetricType::Closes),
                        p.gut_ratio
                    );
                }
            }
        }
        Commands::Progress {
            period_type,
            targets,
            date,
            json,
        } => {
            let goal = Goal {
                tenant: require_tenant(tenant)?.to_string(),
                period_type: period_type.parse()?,
                targets: parse_assignments(&targets)?.into_iter().collect(),
            };
            let date = date_or_today(date.as_deref())?;
            let progress = dw.goal_progress(&goal, date).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                println!("{} goal progress", goal.period_type);
                for (metric, target) in progress.targets.iter().filter(|(_, t)| *t != 0.0) {
                    println!(
                        "  {:<16} {:>10} / {:<10} {:>4}%",
                        metric.as_str(),
                        progress.actual.get(metric),
                        target,
                        progress.percent.get(metric)
                    );
                }
            }
        }
        Commands::Fiscal { action } => {
            handle_fiscal(&dw, require_tenant(tenant)?, action).await?;
        }
    }

    Ok(())
}

async fn handle_rollup(dw: &AdvisorDW, tenant: &str, action: RollupAction) -> anyhow::Result<()> {
    let (rollup, json) = match action {
        RollupAction::Get {
            period_type,
            date,
            json,
        } => {
            let pt: PeriodType = period_type.parse()?;
            let date = date_or_today(date.as_deref())?;
            (dw.get_rollup(tenant, pt, date).await?, json)
        }
        RollupAction::Set {
            period_type,
            values,
            date,
            json,
        } => {
            let pt: PeriodType = period_type.parse()?;
            let date = date_or_today(date.as_deref())?;
            let values: MetricValues = parse_assignments(&values)?.into_iter().collect();
            (dw.set_rollup(tenant, pt, date, values).await?, json)
        }
        RollupAction::Edit {
            period_type,
            values,
            date,
            json,
        } => {
            let pt: PeriodType = period_type.parse()?;
            let date = date_or_today(date.as_deref())?;
            let changes = parse_assignments(&values)?;
            (dw.edit_rollup(tenant, pt, date, &changes).await?, json)
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&rollup)?);
    } else {
        print_rollup(&rollup);
    }
    Ok(())
}

async fn handle_fiscal(dw: &AdvisorDW, tenant: &str, action: FiscalAction) -> anyhow::Result<()> {
    match action {
        FiscalAction::Get { json } => {
            let settings = dw.fiscal_settings(tenant).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                print_fiscal_settings(&settings);
            }
        }
        FiscalAction::Set { q1, q2, q3, q4 } => {
            let settings = FiscalSettings::parse(&q1, &q2, &q3, &q4)?;
            let saved = dw.update_fiscal_settings(tenant, settings).await?;
            print_fiscal_settings(&saved);
        }
        FiscalAction::Quarter { date, json } => {
            let date = date_or_today(date.as_deref())?;
            let q = dw.resolve_fiscal_quarter(tenant, date).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&q)?);
            } else {
                println!("{} FY{}: {} .. {}", q.quarter, q.fiscal_year, q.start, q.end);
            }
        }
    }
    Ok(())
}

fn print_fiscal_settings(s: &FiscalSettings) {
    println!("Fiscal quarters start:");
    println!("  Q1: {}", s.q1_start);
    println!("  Q2: {}", s.q2_start);
    println!("  Q3: {}", s.q3_start);
    println!("  Q4: {}", s.q4_start);
}

fn print_rollup(r: &PeriodRollup) {
    let marker = if r.persisted { "" } else { " (nothing stored)" };
    println!("{} {} .. {}{marker}", r.period_type, r.period_start, r.period_end);
    print_values(&r.values);
}

/// Print the non-zero fields only.
fn print_values(values: &MetricValues) {
    let mut any = false;
    for (metric, value) in values.iter().filter(|(_, v)| *v != 0.0) {
        println!("  {:<16} {value:>10}", metric.as_str());
        any = true;
    }
    if !any {
        println!("  (all zero)");
    }
}
