//! Derivation of the period keys that name buckets in the store. Everything here is a pure
//! function of a calendar date.

use std::fmt::Display;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Daily => write!(f, "daily"),
            Granularity::Weekly => write!(f, "weekly"),
            Granularity::Monthly => write!(f, "monthly"),
        }
    }
}

/// `YYYY-MM-DD`
pub fn daily_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYY-Www`. Week 1 starts on January 1st and every later week starts on a Saturday, so the
/// last days of December land in week 53 (or 54) of the same calendar year.
pub fn weekly_key(date: NaiveDate) -> String {
    let weekday = date.weekday().num_days_from_sunday();
    let jan1_weekday = (weekday + 7 - date.ordinal0() % 7) % 7;
    let week = (date.ordinal() + jan1_weekday + 1).div_ceil(7);
    format!("{}-W{:02}", date.year(), week)
}

/// `YYYY-MM`
pub fn monthly_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

/// The three keys that are live for a given date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePeriods {
    pub daily: String,
    pub weekly: String,
    pub monthly: String,
}

impl LivePeriods {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            daily: daily_key(date),
            weekly: weekly_key(date),
            monthly: monthly_key(date),
        }
    }

    pub fn key(&self, granularity: Granularity) -> &str {
        match granularity {
            Granularity::Daily => &self.daily,
            Granularity::Weekly => &self.weekly,
            Granularity::Monthly => &self.monthly,
        }
    }

    pub fn keys(&self) -> [&str; 3] {
        [&self.daily, &self.weekly, &self.monthly]
    }
}
