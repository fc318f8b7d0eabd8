use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::browser_api::TabId;

/// Title given to a daily entry before the browser reports a real one.
pub const PLACEHOLDER_TITLE: &str = "Loading…";

/// Persisted counters and time map for one period key. Daily buckets map tab ids to
/// [TabTime], weekly and monthly buckets map domains to milliseconds. A domain view can't tell
/// apart tabs within a day, and tab ids aren't stable across a week, hence the split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBucket<T> {
    #[serde(default)]
    pub tabs_opened: u64,
    #[serde(default)]
    pub tabs_closed: u64,
    #[serde(default = "BTreeMap::new")]
    pub time_data: BTreeMap<String, T>,
}

impl<T> Default for PeriodBucket<T> {
    fn default() -> Self {
        Self {
            tabs_opened: 0,
            tabs_closed: 0,
            time_data: BTreeMap::new(),
        }
    }
}

impl<T> PeriodBucket<T> {
    pub fn record_opened(&mut self) {
        self.tabs_opened = self.tabs_opened.saturating_add(1);
    }

    pub fn record_closed(&mut self) {
        self.tabs_closed = self.tabs_closed.saturating_add(1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabTime {
    pub url: String,
    pub title: String,
    /// Milliseconds
    pub time_spent: u64,
}

pub type DailyBucket = PeriodBucket<TabTime>;
pub type DomainBucket = PeriodBucket<u64>;

impl PeriodBucket<TabTime> {
    /// Adds time to a tab, creating its entry with a placeholder title on first use.
    pub fn add_tab_time(&mut self, tab_id: TabId, url: &str, title: Option<&str>, ms: u64) {
        let entry = self
            .time_data
            .entry(tab_id.to_string())
            .or_insert_with(|| TabTime {
                url: url.to_owned(),
                title: PLACEHOLDER_TITLE.to_owned(),
                time_spent: 0,
            });
        if let Some(title) = title {
            entry.title = title.to_owned();
        }
        entry.time_spent = entry.time_spent.saturating_add(ms);
    }

    pub fn tab(&self, tab_id: TabId) -> Option<&TabTime> {
        self.time_data.get(&tab_id.to_string())
    }

    pub fn tab_mut(&mut self, tab_id: TabId) -> Option<&mut TabTime> {
        self.time_data.get_mut(&tab_id.to_string())
    }
}

impl PeriodBucket<u64> {
    pub fn add_domain_time(&mut self, domain: &str, ms: u64) {
        let entry = self.time_data.entry(domain.to_owned()).or_insert(0);
        *entry = entry.saturating_add(ms);
    }

    pub fn domain(&self, domain: &str) -> u64 {
        self.time_data.get(domain).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DailyBucket, DomainBucket, PLACEHOLDER_TITLE};
    use crate::browser_api::TabId;

    #[test]
    fn test_daily_entry_keeps_first_url() {
        let mut bucket = DailyBucket::default();
        bucket.add_tab_time(TabId(3), "https://a.com/", None, 100);
        bucket.add_tab_time(TabId(3), "https://b.com/", None, 250);
        let entry = bucket.tab(TabId(3)).unwrap();
        assert_eq!(entry.url, "https://a.com/");
        assert_eq!(entry.title, PLACEHOLDER_TITLE);
        assert_eq!(entry.time_spent, 350);

        bucket.add_tab_time(TabId(3), "https://a.com/", Some("A"), 0);
        assert_eq!(bucket.tab(TabId(3)).unwrap().title, "A");
    }

    #[test]
    fn test_counters_saturate() {
        let mut bucket = DomainBucket {
            tabs_opened: u64::MAX,
            ..Default::default()
        };
        bucket.record_opened();
        assert_eq!(bucket.tabs_opened, u64::MAX);
        bucket.add_domain_time("a.com", u64::MAX);
        bucket.add_domain_time("a.com", 10);
        assert_eq!(bucket.domain("a.com"), u64::MAX);
    }

    #[test]
    fn test_persisted_shape() {
        let mut bucket = DailyBucket::default();
        bucket.record_opened();
        bucket.add_tab_time(TabId(7), "https://example.com/", Some("Example"), 1500);
        assert_eq!(
            serde_json::to_value(&bucket).unwrap(),
            json!({
                "tabsOpened": 1,
                "tabsClosed": 0,
                "timeData": {
                    "7": { "url": "https://example.com/", "title": "Example", "timeSpent": 1500 }
                }
            })
        );

        let parsed: DomainBucket =
            serde_json::from_value(json!({ "tabsOpened": 2, "timeData": { "a.com": 10 } }))
                .unwrap();
        assert_eq!(parsed.tabs_closed, 0);
        assert_eq!(parsed.domain("a.com"), 10);
    }
}
