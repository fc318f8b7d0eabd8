use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::trace;

use super::{events::BrowserEvent, Tab, TabId, TabQuery, WindowId};

/// Mirror of the browser's tab state, rebuilt from the event stream. Like the real browser it
/// reflects the latest event received, not the one the tracker is currently handling, so a
/// lookup can miss a tab that was closed in the meantime.
#[derive(Debug, Default)]
pub struct TabRegistry {
    tabs: HashMap<TabId, Tab>,
    active_by_window: HashMap<WindowId, TabId>,
    focused_window: Option<WindowId>,
    last_focused_window: Option<WindowId>,
}

impl TabRegistry {
    pub fn observe(&mut self, event: &BrowserEvent) {
        trace!("Registry observing {event:?}");
        match event {
            BrowserEvent::TabCreated { tab } | BrowserEvent::TabUpdated { tab, .. } => {
                self.upsert(tab.clone());
            }
            BrowserEvent::TabRemoved { tab_id } => {
                if let Some(tab) = self.tabs.remove(tab_id) {
                    if self.active_by_window.get(&tab.window_id) == Some(tab_id) {
                        self.active_by_window.remove(&tab.window_id);
                    }
                }
            }
            BrowserEvent::TabActivated { tab_id, window_id } => {
                if let Some(previous) = self.active_by_window.insert(*window_id, *tab_id) {
                    if let Some(tab) = self.tabs.get_mut(&previous) {
                        tab.active = false;
                    }
                }
                if let Some(tab) = self.tabs.get_mut(tab_id) {
                    tab.active = true;
                    tab.window_id = *window_id;
                }
            }
            BrowserEvent::WindowFocusChanged { window_id } => {
                self.focused_window = *window_id;
                if window_id.is_some() {
                    self.last_focused_window = *window_id;
                }
            }
            BrowserEvent::IdleStateChanged { .. } | BrowserEvent::FlushTick => {}
        }
    }

    fn upsert(&mut self, tab: Tab) {
        if tab.active {
            self.active_by_window.insert(tab.window_id, tab.id);
        }
        self.tabs.insert(tab.id, tab);
    }

    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.get(&id)
    }

    pub fn active_tab(&self, window: WindowId) -> Option<&Tab> {
        self.active_by_window
            .get(&window)
            .and_then(|id| self.tabs.get(id))
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.focused_window
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

/// Handle shared between the event reader, which keeps the registry current, and the tracker,
/// which queries it.
#[derive(Debug, Default, Clone)]
pub struct SharedTabRegistry(Arc<Mutex<TabRegistry>>);

impl SharedTabRegistry {
    pub fn lock(&self) -> Result<MutexGuard<'_, TabRegistry>> {
        self.0
            .lock()
            .map_err(|_| anyhow!("Tab registry lock was poisoned"))
    }
}

#[async_trait]
impl TabQuery for SharedTabRegistry {
    async fn get_tab(&self, id: TabId) -> Result<Option<Tab>> {
        Ok(self.lock()?.tab(id).cloned())
    }

    async fn query_active_tab(&self, window: WindowId) -> Result<Option<Tab>> {
        Ok(self.lock()?.active_tab(window).cloned())
    }

    async fn last_focused_window(&self) -> Result<Option<WindowId>> {
        Ok(self.lock()?.last_focused_window)
    }

    async fn count_tabs(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}
