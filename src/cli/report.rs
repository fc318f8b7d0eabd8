use std::{fmt::Display, path::Path};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};
use tracing::debug;

use crate::{
    daemon::storage::{
        entities::{DailyBucket, DomainBucket, PeriodBucket},
        file_store::FileStore,
        query::PeriodQuery,
    },
    utils::{
        percentage::{share_percentage, Percentage},
        period::{Granularity, LivePeriods},
        time::format_duration_ms,
    },
};

use super::Args;

/// Entries with this much time or less are treated as noise and never shown.
const MIN_VISIBLE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct DateSelection {
    #[arg(
        long,
        help = "Any date inside the period. Examples are \"yesterday\", \"last monday\", \"15/03/2025\". Defaults to today"
    )]
    date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
}

impl DateSelection {
    fn resolve(&self) -> Result<NaiveDate> {
        let now = Local::now();
        match &self.date {
            None => Ok(now.date_naive()),
            Some(date) => match parse_date_string(date, now, self.date_style.into()) {
                Ok(v) => Ok(v.date_naive()),
                Err(e) => Err(Args::command()
                    .error(
                        clap::error::ErrorKind::ValueValidation,
                        format!("Failed to validate date {e}"),
                    )
                    .into()),
            },
        }
    }
}

#[derive(Debug, Parser)]
pub struct ReportCommand {
    #[arg(long, short = 'g', default_value_t = Granularity::Daily)]
    period: Granularity,
    #[command(flatten)]
    date: DateSelection,
    #[arg(short = 'p', long = "percentage", help = "Only show entries with at least this share of the period", default_value_t = Percentage::default())]
    min_percentage: Percentage,
    #[arg(short = 'n', long, help = "Show at most this many entries")]
    limit: Option<usize>,
}

#[derive(Debug, Parser)]
pub struct PeriodsCommand {
    #[command(flatten)]
    date: DateSelection,
}

/// One row of the report. Daily rows describe a tab, weekly and monthly rows a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub label: String,
    pub url: Option<String>,
    pub time_ms: u64,
    pub share: Percentage,
}

pub struct RankOptions {
    pub min_percentage: Percentage,
    pub limit: Option<usize>,
}

fn rank(mut entries: Vec<RankedEntry>, options: &RankOptions) -> Vec<RankedEntry> {
    let whole = entries.iter().map(|v| v.time_ms).sum::<u64>();
    for entry in entries.iter_mut() {
        entry.share = share_percentage(entry.time_ms, whole);
    }
    entries.retain(|v| v.time_ms > MIN_VISIBLE_MS && v.share >= options.min_percentage);
    // Ties keep a stable order so output doesn't shuffle between runs.
    entries.sort_by(|a, b| b.time_ms.cmp(&a.time_ms).then_with(|| a.label.cmp(&b.label)));
    if let Some(limit) = options.limit {
        entries.truncate(limit);
    }
    entries
}

pub fn rank_daily(bucket: &DailyBucket, options: &RankOptions) -> Vec<RankedEntry> {
    let entries = bucket
        .time_data
        .values()
        .map(|v| RankedEntry {
            label: v.title.clone(),
            url: Some(v.url.clone()),
            time_ms: v.time_spent,
            share: Percentage::default(),
        })
        .collect();
    rank(entries, options)
}

pub fn rank_domains(bucket: &DomainBucket, options: &RankOptions) -> Vec<RankedEntry> {
    let entries = bucket
        .time_data
        .iter()
        .map(|(domain, ms)| RankedEntry {
            label: domain.clone(),
            url: None,
            time_ms: *ms,
            share: Percentage::default(),
        })
        .collect();
    rank(entries, options)
}

fn print_header<T>(key: &str, bucket: &PeriodBucket<T>) {
    println!(
        "{key}\topened {}\tclosed {}",
        bucket.tabs_opened, bucket.tabs_closed
    );
}

fn print_entries(entries: &[RankedEntry]) {
    for entry in entries {
        match &entry.url {
            Some(url) => println!(
                "{}\t{}%\t{}\t{}",
                format_duration_ms(entry.time_ms),
                *entry.share as i32,
                entry.label,
                url
            ),
            None => println!(
                "{}\t{}%\t{}",
                format_duration_ms(entry.time_ms),
                *entry.share as i32,
                entry.label
            ),
        }
    }
}

/// Command to process `report`. Reads the bucket for the period that contains the selected
/// date and prints its entries ranked by time.
pub async fn process_report_command(
    app_dir: &Path,
    ReportCommand {
        period,
        date,
        min_percentage,
        limit,
    }: ReportCommand,
) -> Result<()> {
    let periods = LivePeriods::for_date(date.resolve()?);
    let key = periods.key(period);
    debug!("Reporting on {period} bucket {key}");

    let query = PeriodQuery::new(FileStore::open(app_dir.join("store")));
    let options = RankOptions {
        min_percentage,
        limit,
    };

    match period {
        Granularity::Daily => match query.daily(key).await? {
            Some(bucket) => {
                print_header(key, &bucket);
                print_entries(&rank_daily(&bucket, &options));
            }
            None => println!("Nothing recorded for {key}"),
        },
        Granularity::Weekly | Granularity::Monthly => match query.domains(key).await? {
            Some(bucket) => {
                print_header(key, &bucket);
                print_entries(&rank_domains(&bucket, &options));
            }
            None => println!("Nothing recorded for {key}"),
        },
    }
    Ok(())
}

pub fn process_periods_command(PeriodsCommand { date }: PeriodsCommand) -> Result<()> {
    let periods = LivePeriods::for_date(date.resolve()?);
    for granularity in [Granularity::Daily, Granularity::Weekly, Granularity::Monthly] {
        println!("{granularity}\t{}", periods.key(granularity));
    }
    Ok(())
}
