use serde::{Deserialize, Serialize};

use super::{Tab, TabId, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

impl IdleState {
    pub fn is_idle(self) -> bool {
        !matches!(self, IdleState::Active)
    }
}

/// Which properties of a tab changed in a [BrowserEvent::TabUpdated].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabChanges {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl TabChanges {
    pub fn is_relevant(&self) -> bool {
        self.url.is_some() || self.title.is_some()
    }
}

/// One message from the browser. The host receives these as JSON lines, for example
/// `{"event":"tab_activated","tab_id":4,"window_id":1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrowserEvent {
    TabCreated {
        tab: Tab,
    },
    TabRemoved {
        tab_id: TabId,
    },
    TabActivated {
        tab_id: TabId,
        window_id: WindowId,
    },
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        changes: TabChanges,
        tab: Tab,
    },
    WindowFocusChanged {
        /// `None` when every browser window lost focus.
        window_id: Option<WindowId>,
    },
    IdleStateChanged {
        state: IdleState,
    },
    /// Produced internally by the host to flush the running watch periodically.
    #[serde(skip_deserializing)]
    FlushTick,
}
