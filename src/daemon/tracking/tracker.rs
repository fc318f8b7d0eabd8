use anyhow::Result;
use chrono::Duration;
use tracing::{debug, error, instrument, trace, warn};

use crate::{
    browser_api::{
        events::{BrowserEvent, TabChanges},
        Tab, TabId, TabQuery, WindowId,
    },
    daemon::{
        aggregation::{Attribution, PeriodAggregator},
        processing::module::EventProcessor,
        storage::store::KeyValueStore,
    },
    utils::{
        clock::Clock,
        domain::{domain_of, is_web_url},
        period::LivePeriods,
    },
};

use super::watch::{ActiveWatch, FlushOutcome, SkipReason, WatchState};

/// Intervals shorter than this come from rapid event churn and are dropped.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::milliseconds(100);

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub min_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// Decides which tab time belongs to. Owns the [ActiveWatch] cursor and hands closed-out
/// intervals to the [PeriodAggregator].
pub struct AttributionTracker<S, Q> {
    watch: ActiveWatch,
    aggregator: PeriodAggregator<S>,
    tabs: Q,
    clock: Box<dyn Clock>,
    settings: TrackerSettings,
}

impl<S: KeyValueStore, Q: TabQuery> AttributionTracker<S, Q> {
    pub fn new(
        aggregator: PeriodAggregator<S>,
        tabs: Q,
        clock: Box<dyn Clock>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            watch: ActiveWatch::empty(),
            aggregator,
            tabs,
            clock,
            settings,
        }
    }

    pub fn watch(&self) -> &ActiveWatch {
        &self.watch
    }

    fn live_periods(&self) -> LivePeriods {
        LivePeriods::for_date(self.clock.today())
    }

    /// Makes sure buckets for the current periods exist.
    pub async fn initialize(&self) -> Result<()> {
        self.aggregator.initialize(&self.live_periods()).await
    }

    /// Closes out the running interval and attributes it. The watch keeps going from `now`, so
    /// calling this repeatedly never counts the same time twice.
    pub async fn on_watch_end(&mut self) -> Result<FlushOutcome> {
        if self.watch.tab().is_none() {
            return Ok(FlushOutcome::Skipped(SkipReason::NoActiveTab));
        }
        if self.watch.is_idle() {
            return Ok(FlushOutcome::Skipped(SkipReason::Idle));
        }
        let now = self.clock.time();
        let min_interval = self.settings.min_interval;
        let Some(tab) = self.watch.tab_mut() else {
            return Ok(FlushOutcome::Skipped(SkipReason::NoActiveTab));
        };

        let elapsed = now - tab.started_at;
        if elapsed < min_interval {
            return Ok(FlushOutcome::Skipped(SkipReason::BelowThreshold(elapsed)));
        }
        let Some(domain) = domain_of(&tab.url) else {
            return Ok(FlushOutcome::Skipped(SkipReason::Unattributable));
        };

        // Moved before the write, a failed write loses this interval instead of retrying it.
        tab.started_at = now;
        let attribution = Attribution {
            tab_id: tab.id,
            url: tab.url.clone(),
            domain,
            title: tab.title.clone(),
            elapsed_ms: elapsed.num_milliseconds().max(0) as u64,
        };

        self.aggregator
            .apply_elapsed(&self.live_periods(), &attribution)
            .await?;
        Ok(FlushOutcome::Attributed(attribution))
    }

    /// Flush whose failure only gets logged. Used before the cursor changes, where the change
    /// has to happen regardless.
    async fn flush(&mut self) {
        match self.on_watch_end().await {
            Ok(outcome) => trace!("Flush finished with {outcome:?}"),
            Err(e) => error!("Failed to attribute watched time {e:?}"),
        }
    }

    /// Starts watching a tab. Anything that isn't an http(s) page leaves the cursor empty.
    pub async fn on_watch_start(
        &mut self,
        tab_id: TabId,
        url: Option<&str>,
        title: Option<&str>,
    ) -> WatchState {
        let Some(url) = url.filter(|v| is_web_url(v)) else {
            debug!("Tab {tab_id} isn't a web page, nothing to watch");
            self.watch = ActiveWatch::empty();
            return self.watch.state();
        };

        self.watch = ActiveWatch::watching(
            tab_id,
            url.to_owned(),
            title.map(str::to_owned),
            self.clock.time(),
        );

        if let Some(title) = title {
            let periods = self.live_periods();
            if let Err(e) = self
                .aggregator
                .backfill_details(&periods, tab_id, None, Some(title))
                .await
            {
                warn!("Failed to update title of tab {tab_id} {e:?}");
            }
        }
        self.watch.state()
    }

    async fn start_watching(&mut self, tab: &Tab) -> WatchState {
        self.on_watch_start(tab.id, tab.url.as_deref(), tab.title.as_deref())
            .await
    }

    /// Resumes measurement after idle or focus loss. The tab reported by the browser wins, when
    /// there is none the kept tab continues from now.
    async fn resume_with(&mut self, focused: Result<Option<Tab>>) -> WatchState {
        match focused {
            Ok(Some(tab)) => self.start_watching(&tab).await,
            Ok(None) => {
                self.watch.resume(self.clock.time());
                self.watch.state()
            }
            Err(e) => {
                warn!("Couldn't find focused tab {e:?}");
                self.watch = ActiveWatch::empty();
                self.watch.state()
            }
        }
    }

    async fn last_focused_tab(&self) -> Result<Option<Tab>> {
        let Some(window) = self.tabs.last_focused_window().await? else {
            return Ok(None);
        };
        self.tabs.query_active_tab(window).await
    }

    pub async fn on_idle_transition(&mut self, is_idle: bool) -> WatchState {
        if is_idle {
            self.flush().await;
            self.watch.suspend();
            return self.watch.state();
        }

        let focused = self.last_focused_tab().await;
        self.resume_with(focused).await
    }

    pub async fn on_resource_removed(&mut self, tab_id: TabId) -> WatchState {
        self.flush().await;
        if self.watch.tab_id() == Some(tab_id) {
            self.watch = ActiveWatch::empty();
        }
        self.watch.state()
    }

    async fn on_tab_activated(&mut self, tab_id: TabId) -> WatchState {
        self.flush().await;
        match self.tabs.get_tab(tab_id).await {
            Ok(Some(tab)) => self.start_watching(&tab).await,
            Ok(None) => {
                debug!("Activated tab {tab_id} is already gone");
                self.watch = ActiveWatch::empty();
                self.watch.state()
            }
            Err(e) => {
                warn!("Failed to look up activated tab {tab_id} {e:?}");
                self.watch = ActiveWatch::empty();
                self.watch.state()
            }
        }
    }

    async fn on_tab_updated(&mut self, tab_id: TabId, changes: &TabChanges, tab: &Tab) {
        if self.watch.tab_id() != Some(tab_id) || !changes.is_relevant() {
            return;
        }
        self.flush().await;

        match tab.url.as_deref().filter(|v| is_web_url(v)) {
            Some(url) => {
                if let Some(watched) = self.watch.tab_mut() {
                    watched.url = url.to_owned();
                    if tab.title.is_some() {
                        watched.title = tab.title.clone();
                    }
                }
            }
            None => {
                debug!("Tab {tab_id} navigated away from the web");
                self.watch = ActiveWatch::empty();
            }
        }

        let periods = self.live_periods();
        if let Err(e) = self
            .aggregator
            .backfill_details(&periods, tab_id, tab.url.as_deref(), tab.title.as_deref())
            .await
        {
            warn!("Failed to update details of tab {tab_id} {e:?}");
        }
    }

    async fn on_window_focus_changed(&mut self, window: Option<WindowId>) -> WatchState {
        let Some(window) = window else {
            self.flush().await;
            self.watch.suspend();
            return self.watch.state();
        };
        let focused = self.tabs.query_active_tab(window).await;
        self.resume_with(focused).await
    }

    async fn log_open_tabs(&self) {
        match self.tabs.count_tabs().await {
            Ok(count) => debug!("{count} tabs open"),
            Err(e) => warn!("Failed to count tabs {e:?}"),
        }
    }

    #[instrument(skip(self))]
    pub async fn handle_event(&mut self, event: BrowserEvent) -> Result<()> {
        match event {
            BrowserEvent::TabCreated { .. } => {
                self.aggregator
                    .record_tab_created(&self.live_periods())
                    .await?;
                self.log_open_tabs().await;
            }
            BrowserEvent::TabRemoved { tab_id } => {
                self.on_resource_removed(tab_id).await;
                self.aggregator
                    .record_tab_closed(&self.live_periods())
                    .await?;
                self.log_open_tabs().await;
            }
            BrowserEvent::TabActivated { tab_id, .. } => {
                self.on_tab_activated(tab_id).await;
            }
            BrowserEvent::TabUpdated {
                tab_id,
                changes,
                tab,
            } => {
                self.on_tab_updated(tab_id, &changes, &tab).await;
            }
            BrowserEvent::WindowFocusChanged { window_id } => {
                self.on_window_focus_changed(window_id).await;
            }
            BrowserEvent::IdleStateChanged { state } => {
                self.on_idle_transition(state.is_idle()).await;
            }
            BrowserEvent::FlushTick => {
                self.on_watch_end().await?;
            }
        }
        trace!("Watch is now {:?}", self.watch);
        Ok(())
    }
}

impl<S: KeyValueStore, Q: TabQuery> EventProcessor for AttributionTracker<S, Q> {
    async fn process_next(&mut self, message: BrowserEvent) -> Result<()> {
        self.handle_event(message).await
    }

    /// Attributes whatever was running when the host stops, the watch itself is not persisted.
    async fn finalize(&mut self) -> Result<()> {
        let outcome = self.on_watch_end().await?;
        debug!("Final flush {outcome:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use chrono::{Duration, TimeZone, Utc};

    use super::{AttributionTracker, TrackerSettings};
    use crate::{
        browser_api::{
            events::{BrowserEvent, IdleState, TabChanges},
            registry::SharedTabRegistry,
            MockTabQuery, Tab, TabId, WindowId,
        },
        daemon::{
            aggregation::PeriodAggregator,
            storage::{
                query::PeriodQuery,
                store::{KeyValueStore, MemoryStore},
            },
            tracking::watch::{FlushOutcome, SkipReason, WatchState},
        },
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING, period::LivePeriods},
    };

    struct Harness {
        tracker: AttributionTracker<Arc<MemoryStore>, SharedTabRegistry>,
        registry: SharedTabRegistry,
        store: Arc<MemoryStore>,
        clock: ManualClock,
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap())
    }

    fn periods() -> LivePeriods {
        LivePeriods::for_date(chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
    }

    fn web_tab(id: i64, url: &str) -> Tab {
        Tab {
            id: TabId(id),
            window_id: WindowId(1),
            url: Some(url.to_string()),
            title: Some(format!("Tab {id}")),
            active: false,
        }
    }

    impl Harness {
        fn new() -> Self {
            *TEST_LOGGING;
            let store = Arc::new(MemoryStore::new());
            let registry = SharedTabRegistry::default();
            let clock = clock();
            let tracker = AttributionTracker::new(
                PeriodAggregator::new(store.clone()),
                registry.clone(),
                Box::new(clock.clone()),
                TrackerSettings::default(),
            );
            Self {
                tracker,
                registry,
                store,
                clock,
            }
        }

        /// Updates browser state without the tracker seeing the event.
        fn mirror(&self, event: &BrowserEvent) {
            self.registry.lock().unwrap().observe(event);
        }

        async fn send(&mut self, event: BrowserEvent) -> Result<()> {
            self.mirror(&event);
            self.tracker.handle_event(event).await
        }

        async fn activate(&mut self, tab: Tab) -> Result<()> {
            let id = tab.id;
            self.mirror(&BrowserEvent::TabCreated { tab });
            self.send(BrowserEvent::TabActivated {
                tab_id: id,
                window_id: WindowId(1),
            })
            .await
        }

        async fn tab_ms(&self, id: i64) -> u64 {
            PeriodQuery::new(self.store.clone())
                .daily(&periods().daily)
                .await
                .unwrap()
                .and_then(|d| d.tab(TabId(id)).map(|t| t.time_spent))
                .unwrap_or(0)
        }

        async fn domain_ms(&self, domain: &str) -> (u64, u64) {
            let snapshot = PeriodQuery::new(self.store.clone())
                .snapshot(&periods())
                .await
                .unwrap();
            (
                snapshot.weekly.map(|v| v.domain(domain)).unwrap_or(0),
                snapshot.monthly.map(|v| v.domain(domain)).unwrap_or(0),
            )
        }
    }

    #[tokio::test]
    async fn test_idle_gap_is_not_counted() -> Result<()> {
        let mut harness = Harness::new();
        harness.mirror(&BrowserEvent::WindowFocusChanged {
            window_id: Some(WindowId(1)),
        });
        harness.activate(web_tab(1, "https://example.com/a")).await?;

        harness.clock.advance_ms(5000);
        harness
            .send(BrowserEvent::IdleStateChanged {
                state: IdleState::Idle,
            })
            .await?;
        assert_eq!(harness.tracker.watch().state(), WatchState::Idle);
        assert_eq!(harness.tracker.watch().tab_id(), Some(TabId(1)));
        assert_eq!(harness.tab_ms(1).await, 5000);

        harness.clock.advance_ms(10000);
        assert_eq!(
            harness.tracker.on_watch_end().await?,
            FlushOutcome::Skipped(SkipReason::Idle)
        );
        harness
            .send(BrowserEvent::IdleStateChanged {
                state: IdleState::Active,
            })
            .await?;
        assert_eq!(harness.tracker.watch().state(), WatchState::Watching);

        harness.clock.advance_ms(2000);
        let outcome = harness.tracker.on_watch_end().await?;
        assert_eq!(outcome.attributed_ms(), 2000);

        assert_eq!(harness.tab_ms(1).await, 7000);
        assert_eq!(harness.domain_ms("example.com").await, (7000, 7000));
        Ok(())
    }

    #[tokio::test]
    async fn test_short_interval_is_noise() -> Result<()> {
        let mut harness = Harness::new();
        harness
            .tracker
            .on_watch_start(TabId(1), Some("https://example.com"), None)
            .await;
        harness.clock.advance_ms(50);

        assert_eq!(
            harness.tracker.on_watch_end().await?,
            FlushOutcome::Skipped(SkipReason::BelowThreshold(Duration::milliseconds(50)))
        );
        assert!(harness.store.get(&periods().keys()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_flushes_do_not_double_count() -> Result<()> {
        let mut harness = Harness::new();
        harness.activate(web_tab(1, "https://example.com")).await?;

        let mut attributed = 0;
        for step in [3000, 2000, 50, 1000] {
            harness.clock.advance_ms(step);
            attributed += harness.tracker.on_watch_end().await?.attributed_ms();
        }
        // The 50ms flush was skipped, so its time rolled into the following interval.
        assert_eq!(attributed, 6050);
        assert_eq!(harness.tab_ms(1).await, 6050);

        harness.clock.advance_ms(500);
        harness.send(BrowserEvent::FlushTick).await?;
        harness.send(BrowserEvent::FlushTick).await?;
        assert_eq!(harness.tab_ms(1).await, 6550);
        assert_eq!(harness.domain_ms("example.com").await, (6550, 6550));
        Ok(())
    }

    #[tokio::test]
    async fn test_unparsable_url_is_never_attributed() -> Result<()> {
        let mut harness = Harness::new();
        let state = harness
            .tracker
            .on_watch_start(TabId(1), Some("http://"), None)
            .await;
        assert_eq!(state, WatchState::Watching);

        harness.clock.advance_ms(4000);
        assert_eq!(
            harness.tracker.on_watch_end().await?,
            FlushOutcome::Skipped(SkipReason::Unattributable)
        );
        assert!(harness.store.get(&periods().keys()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_non_web_tabs_are_not_watched() -> Result<()> {
        let mut harness = Harness::new();
        let state = harness
            .tracker
            .on_watch_start(TabId(1), Some("chrome://newtab"), Some("New Tab"))
            .await;
        assert_eq!(state, WatchState::Empty);

        let state = harness.tracker.on_watch_start(TabId(2), None, None).await;
        assert_eq!(state, WatchState::Empty);
        assert_eq!(
            harness.tracker.on_watch_end().await?,
            FlushOutcome::Skipped(SkipReason::NoActiveTab)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_switching_tabs_splits_time() -> Result<()> {
        let mut harness = Harness::new();
        harness.activate(web_tab(1, "https://a.com/x")).await?;
        harness.clock.advance_ms(4000);
        harness.activate(web_tab(2, "https://b.com/y")).await?;
        harness.clock.advance_ms(1000);
        harness.tracker.on_watch_end().await?;

        assert_eq!(harness.tab_ms(1).await, 4000);
        assert_eq!(harness.tab_ms(2).await, 1000);
        assert_eq!(harness.domain_ms("a.com").await, (4000, 4000));
        assert_eq!(harness.domain_ms("b.com").await, (1000, 1000));
        Ok(())
    }

    #[tokio::test]
    async fn test_removing_watched_tab() -> Result<()> {
        let mut harness = Harness::new();
        harness.activate(web_tab(1, "https://example.com")).await?;
        harness.activate(web_tab(2, "https://other.com")).await?;
        harness.clock.advance_ms(1500);

        harness
            .send(BrowserEvent::TabRemoved { tab_id: TabId(1) })
            .await?;
        assert_eq!(harness.tracker.watch().tab_id(), Some(TabId(2)));

        harness.clock.advance_ms(500);
        harness
            .send(BrowserEvent::TabRemoved { tab_id: TabId(2) })
            .await?;
        assert_eq!(harness.tracker.watch().state(), WatchState::Empty);

        assert_eq!(harness.tab_ms(2).await, 2000);
        let daily = PeriodQuery::new(harness.store.clone())
            .daily(&periods().daily)
            .await?
            .unwrap();
        assert_eq!(daily.tabs_closed, 2);
        assert_eq!(daily.tabs_opened, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_window_blur_pauses_tracking() -> Result<()> {
        let mut harness = Harness::new();
        harness.mirror(&BrowserEvent::TabCreated {
            tab: Tab {
                active: true,
                ..web_tab(1, "https://example.com")
            },
        });
        harness
            .send(BrowserEvent::WindowFocusChanged {
                window_id: Some(WindowId(1)),
            })
            .await?;
        assert_eq!(harness.tracker.watch().tab_id(), Some(TabId(1)));

        harness.clock.advance_ms(1000);
        harness
            .send(BrowserEvent::WindowFocusChanged { window_id: None })
            .await?;
        assert_eq!(harness.tracker.watch().state(), WatchState::Idle);

        harness.clock.advance_ms(5000);
        harness
            .send(BrowserEvent::WindowFocusChanged {
                window_id: Some(WindowId(1)),
            })
            .await?;
        harness.clock.advance_ms(500);
        harness.tracker.on_watch_end().await?;

        assert_eq!(harness.tab_ms(1).await, 1500);
        Ok(())
    }

    #[tokio::test]
    async fn test_focus_without_active_tab_keeps_watch() -> Result<()> {
        let mut harness = Harness::new();
        harness
            .tracker
            .on_watch_start(TabId(1), Some("https://example.com"), None)
            .await;
        harness.clock.advance_ms(1000);
        harness
            .send(BrowserEvent::WindowFocusChanged { window_id: None })
            .await?;
        harness.clock.advance_ms(9000);
        harness
            .send(BrowserEvent::WindowFocusChanged {
                window_id: Some(WindowId(7)),
            })
            .await?;
        assert_eq!(harness.tracker.watch().state(), WatchState::Watching);

        harness.clock.advance_ms(1000);
        harness.tracker.on_watch_end().await?;
        assert_eq!(harness.tab_ms(1).await, 2000);
        Ok(())
    }

    #[tokio::test]
    async fn test_navigation_moves_time_to_new_domain() -> Result<()> {
        let mut harness = Harness::new();
        harness.activate(web_tab(1, "https://a.com/")).await?;
        harness.clock.advance_ms(2000);

        let navigated = Tab {
            url: Some("https://b.com/".into()),
            title: Some("B".into()),
            ..web_tab(1, "https://b.com/")
        };
        harness
            .send(BrowserEvent::TabUpdated {
                tab_id: TabId(1),
                changes: TabChanges {
                    url: Some("https://b.com/".into()),
                    title: None,
                },
                tab: navigated,
            })
            .await?;
        harness.clock.advance_ms(1000);
        harness.tracker.on_watch_end().await?;

        assert_eq!(harness.domain_ms("a.com").await, (2000, 2000));
        assert_eq!(harness.domain_ms("b.com").await, (1000, 1000));
        let daily = PeriodQuery::new(harness.store.clone())
            .daily(&periods().daily)
            .await?
            .unwrap();
        let entry = daily.tab(TabId(1)).unwrap();
        assert_eq!(entry.url, "https://b.com/");
        assert_eq!(entry.title, "B");
        assert_eq!(entry.time_spent, 3000);
        Ok(())
    }

    #[tokio::test]
    async fn test_navigation_off_the_web_clears_watch() -> Result<()> {
        let mut harness = Harness::new();
        harness.activate(web_tab(1, "https://a.com/")).await?;
        harness.clock.advance_ms(2000);
        harness
            .send(BrowserEvent::TabUpdated {
                tab_id: TabId(1),
                changes: TabChanges {
                    url: Some("chrome://settings".into()),
                    title: None,
                },
                tab: web_tab(1, "chrome://settings"),
            })
            .await?;
        assert_eq!(harness.tracker.watch().state(), WatchState::Empty);

        harness.clock.advance_ms(3000);
        harness.tracker.on_watch_end().await?;
        assert_eq!(harness.domain_ms("a.com").await, (2000, 2000));
        Ok(())
    }

    #[tokio::test]
    async fn test_created_tabs_are_counted() -> Result<()> {
        let mut harness = Harness::new();
        for id in 0..3 {
            harness
                .send(BrowserEvent::TabCreated {
                    tab: web_tab(id, "https://example.com"),
                })
                .await?;
        }
        let snapshot = PeriodQuery::new(harness.store.clone())
            .snapshot(&periods())
            .await?;
        assert_eq!(snapshot.daily.unwrap().tabs_opened, 3);
        assert_eq!(snapshot.weekly.unwrap().tabs_opened, 3);
        assert_eq!(snapshot.monthly.unwrap().tabs_opened, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_tab_lookup_failure_clears_watch() -> Result<()> {
        *TEST_LOGGING;
        let mut tabs = MockTabQuery::new();
        tabs.expect_get_tab()
            .returning(|_| Err(anyhow!("Browser went away")));
        tabs.expect_last_focused_window()
            .returning(|| Err(anyhow!("Browser went away")));

        let clock = clock();
        let store = Arc::new(MemoryStore::new());
        let mut tracker = AttributionTracker::new(
            PeriodAggregator::new(store.clone()),
            tabs,
            Box::new(clock.clone()),
            TrackerSettings::default(),
        );

        tracker
            .on_watch_start(TabId(1), Some("https://example.com"), None)
            .await;
        clock.advance_ms(1000);
        tracker
            .handle_event(BrowserEvent::TabActivated {
                tab_id: TabId(2),
                window_id: WindowId(1),
            })
            .await?;
        assert_eq!(tracker.watch().state(), WatchState::Empty);

        tracker
            .on_watch_start(TabId(1), Some("https://example.com"), None)
            .await;
        tracker.on_idle_transition(true).await;
        assert_eq!(tracker.on_idle_transition(false).await, WatchState::Empty);

        let daily = PeriodQuery::new(store).daily(&periods().daily).await?.unwrap();
        assert_eq!(daily.tab(TabId(1)).unwrap().time_spent, 1000);
        Ok(())
    }
}
