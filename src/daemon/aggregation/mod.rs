//! Folds closed-out intervals and tab counters into the buckets of the live periods.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{browser_api::TabId, utils::period::LivePeriods};

use super::storage::{
    entities::{DailyBucket, DomainBucket, TabTime},
    query::decode_bucket,
    store::KeyValueStore,
};

/// Closed-out interval of time spent on one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub tab_id: TabId,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub elapsed_ms: u64,
}

/// All three live buckets, loaded together for one read-modify-write.
struct LiveBuckets {
    daily: DailyBucket,
    weekly: DomainBucket,
    monthly: DomainBucket,
}

pub struct PeriodAggregator<S> {
    store: S,
}

impl<S: KeyValueStore> PeriodAggregator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Fetches the live buckets, creating empty ones for keys that don't exist yet.
    async fn load(&self, periods: &LivePeriods) -> Result<LiveBuckets> {
        let mut values = self.store.get(&periods.keys()).await?;
        Ok(LiveBuckets {
            daily: decode_bucket(&mut values, &periods.daily)?.unwrap_or_default(),
            weekly: decode_bucket(&mut values, &periods.weekly)?.unwrap_or_default(),
            monthly: decode_bucket(&mut values, &periods.monthly)?.unwrap_or_default(),
        })
    }

    /// Writes all three buckets in a single batch.
    async fn save(&self, periods: &LivePeriods, buckets: LiveBuckets) -> Result<()> {
        let batch = HashMap::from([
            (periods.daily.clone(), encode(&buckets.daily)?),
            (periods.weekly.clone(), encode(&buckets.weekly)?),
            (periods.monthly.clone(), encode(&buckets.monthly)?),
        ]);
        self.store.set(batch).await
    }

    /// Adds the interval to the tab's daily entry and to the domain in the weekly and monthly
    /// buckets.
    pub async fn apply_elapsed(
        &self,
        periods: &LivePeriods,
        attribution: &Attribution,
    ) -> Result<()> {
        let mut buckets = self.load(periods).await?;

        buckets.daily.add_tab_time(
            attribution.tab_id,
            &attribution.url,
            attribution.title.as_deref(),
            attribution.elapsed_ms,
        );
        buckets
            .weekly
            .add_domain_time(&attribution.domain, attribution.elapsed_ms);
        buckets
            .monthly
            .add_domain_time(&attribution.domain, attribution.elapsed_ms);

        self.save(periods, buckets).await?;
        debug!(
            "Attributed {}ms to tab {} ({})",
            attribution.elapsed_ms, attribution.tab_id, attribution.domain
        );
        Ok(())
    }

    pub async fn record_tab_created(&self, periods: &LivePeriods) -> Result<()> {
        let mut buckets = self.load(periods).await?;
        buckets.daily.record_opened();
        buckets.weekly.record_opened();
        buckets.monthly.record_opened();
        self.save(periods, buckets).await
    }

    pub async fn record_tab_closed(&self, periods: &LivePeriods) -> Result<()> {
        let mut buckets = self.load(periods).await?;
        buckets.daily.record_closed();
        buckets.weekly.record_closed();
        buckets.monthly.record_closed();
        self.save(periods, buckets).await
    }

    /// Writes empty buckets for live keys that don't exist yet. Existing buckets are left
    /// untouched.
    pub async fn initialize(&self, periods: &LivePeriods) -> Result<()> {
        let existing = self.store.get(&periods.keys()).await?;
        let batch = periods
            .keys()
            .into_iter()
            .filter(|key| !existing.contains_key(*key))
            .map(|key| Ok((key.to_string(), encode(&DomainBucket::default())?)))
            .collect::<Result<HashMap<_, _>>>()?;

        if batch.is_empty() {
            trace!("All live periods already initialized");
            return Ok(());
        }
        debug!("Initializing periods {:?}", batch.keys().collect::<Vec<_>>());
        self.store.set(batch).await
    }

    /// Refreshes url and/or title of a tab that already has a daily entry. Returns whether an
    /// entry was updated.
    pub async fn backfill_details(
        &self,
        periods: &LivePeriods,
        tab_id: TabId,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<bool> {
        if url.is_none() && title.is_none() {
            return Ok(false);
        }
        let mut values = self.store.get(&[periods.daily.as_str()]).await?;
        let Some(mut daily) = decode_bucket::<TabTime>(&mut values, &periods.daily)? else {
            return Ok(false);
        };
        let Some(entry) = daily.tab_mut(tab_id) else {
            return Ok(false);
        };
        if let Some(url) = url {
            entry.url = url.to_owned();
        }
        if let Some(title) = title {
            entry.title = title.to_owned();
        }

        self.store
            .set(HashMap::from([(periods.daily.clone(), encode(&daily)?)]))
            .await?;
        Ok(true)
    }
}

fn encode(bucket: &impl Serialize) -> Result<Value> {
    Ok(serde_json::to_value(bucket)?)
}
