//! Contract between the tracker and the browser it observes. The browser itself lives in another
//! process, so everything the tracker needs to ask about tabs goes through [TabQuery].
//! [registry::TabRegistry] is the implementation used by the host.

pub mod events;
pub mod registry;

use std::fmt::Display;

use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub i64);

/// Snapshot of a browser tab as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    /// Current address. Browsers leave it out for tabs that are still loading or that the
    /// extension isn't allowed to see.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// Read access to live browser state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TabQuery: Send + Sync {
    /// `Ok(None)` when the tab no longer exists.
    async fn get_tab(&self, id: TabId) -> Result<Option<Tab>>;

    async fn query_active_tab(&self, window: WindowId) -> Result<Option<Tab>>;

    /// Window that had focus most recently, even if no window has it right now.
    async fn last_focused_window(&self) -> Result<Option<WindowId>>;

    async fn count_tabs(&self) -> Result<usize>;
}
