use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::utils::period::LivePeriods;

use super::{
    entities::{DailyBucket, DomainBucket, PeriodBucket},
    store::{KeyValueStore, StoreChange},
};

/// Buckets for all three live periods, `None` where nothing was recorded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSnapshot {
    pub daily: Option<DailyBucket>,
    pub weekly: Option<DomainBucket>,
    pub monthly: Option<DomainBucket>,
}

/// Read-only view over stored buckets. This is everything presentation code gets to see, writes
/// only ever come from the tracker.
pub struct PeriodQuery<S> {
    store: S,
}

impl<S: KeyValueStore> PeriodQuery<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn daily(&self, key: &str) -> Result<Option<DailyBucket>> {
        let mut values = self.store.get(&[key]).await?;
        decode_bucket(&mut values, key)
    }

    pub async fn domains(&self, key: &str) -> Result<Option<DomainBucket>> {
        let mut values = self.store.get(&[key]).await?;
        decode_bucket(&mut values, key)
    }

    /// Reads the three live buckets with a single store access.
    pub async fn snapshot(&self, periods: &LivePeriods) -> Result<PeriodSnapshot> {
        let mut values = self.store.get(&periods.keys()).await?;
        Ok(PeriodSnapshot {
            daily: decode_bucket(&mut values, &periods.daily)?,
            weekly: decode_bucket(&mut values, &periods.weekly)?,
            monthly: decode_bucket(&mut values, &periods.monthly)?,
        })
    }

    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.store.subscribe()
    }
}

pub(crate) fn decode_bucket<T: DeserializeOwned>(
    values: &mut HashMap<String, Value>,
    key: &str,
) -> Result<Option<PeriodBucket<T>>> {
    values
        .remove(key)
        .map(|v| serde_json::from_value(v).with_context(|| format!("Malformed bucket {key}")))
        .transpose()
}
