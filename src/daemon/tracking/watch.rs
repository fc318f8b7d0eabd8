use chrono::{DateTime, Duration, Utc};

use crate::{browser_api::TabId, daemon::aggregation::Attribution};

/// Tab whose time is currently being measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedTab {
    pub id: TabId,
    pub url: String,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Empty,
    Watching,
    Idle,
}

/// The cursor recording what is being watched. The start timestamp lives inside [WatchedTab], so
/// it exists exactly when a tab does. Idling keeps the tab but stops time from accruing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveWatch {
    tab: Option<WatchedTab>,
    idle: bool,
}

impl ActiveWatch {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn watching(id: TabId, url: String, title: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            tab: Some(WatchedTab {
                id,
                url,
                title,
                started_at: now,
            }),
            idle: false,
        }
    }

    pub fn state(&self) -> WatchState {
        match (&self.tab, self.idle) {
            (_, true) => WatchState::Idle,
            (Some(_), false) => WatchState::Watching,
            (None, false) => WatchState::Empty,
        }
    }

    pub fn tab(&self) -> Option<&WatchedTab> {
        self.tab.as_ref()
    }

    pub(super) fn tab_mut(&mut self) -> Option<&mut WatchedTab> {
        self.tab.as_mut()
    }

    pub fn tab_id(&self) -> Option<TabId> {
        self.tab.as_ref().map(|v| v.id)
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    pub(super) fn suspend(&mut self) {
        self.idle = true;
    }

    /// Leaves idle and restarts measurement of the kept tab from `now`.
    pub(super) fn resume(&mut self, now: DateTime<Utc>) {
        self.idle = false;
        if let Some(tab) = self.tab.as_mut() {
            tab.started_at = now;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoActiveTab,
    Idle,
    BelowThreshold(Duration),
    /// The url has no domain, so the time can't be attributed to anything.
    Unattributable,
}

/// Result of trying to close out the running interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Attributed(Attribution),
    Skipped(SkipReason),
}

impl FlushOutcome {
    pub fn attributed_ms(&self) -> u64 {
        match self {
            FlushOutcome::Attributed(v) => v.elapsed_ms,
            FlushOutcome::Skipped(_) => 0,
        }
    }
}
