use std::{collections::HashMap, future::Future, ops::Deref, sync::Mutex};

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::broadcast;

const CHANGE_CAPACITY: usize = 16;

/// Emitted after every successful batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub keys: Vec<String>,
}

/// Interface for abstracting the persistent key-value store buckets live in.
pub trait KeyValueStore {
    /// Returns values for the keys that exist. Missing keys are simply absent from the result.
    fn get(&self, keys: &[&str]) -> impl Future<Output = Result<HashMap<String, Value>>>;

    /// Writes every entry of `batch` or none of them.
    fn set(&self, batch: HashMap<String, Value>) -> impl Future<Output = Result<()>>;

    /// Notifications about written keys. Only meant for readers presenting the data.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

impl<T: Deref> KeyValueStore for T
where
    T::Target: KeyValueStore,
{
    fn get(&self, keys: &[&str]) -> impl Future<Output = Result<HashMap<String, Value>>> {
        self.deref().get(keys)
    }

    fn set(&self, batch: HashMap<String, Value>) -> impl Future<Output = Result<()>> {
        self.deref().set(batch)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.deref().subscribe()
    }
}

/// Sends a change notification for a written batch. Having no listeners is fine.
pub(super) fn notify(changes: &broadcast::Sender<StoreChange>, batch: &HashMap<String, Value>) {
    let mut keys = batch.keys().cloned().collect::<Vec<_>>();
    keys.sort();
    let _ = changes.send(StoreChange { keys });
}

/// Store kept entirely in memory. Used by tests and by anything that doesn't need data to
/// outlive the process.
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            changes: broadcast::channel(CHANGE_CAPACITY).0,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
        self.values
            .lock()
            .map_err(|_| anyhow!("Memory store lock was poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let values = self.values()?;
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, batch: HashMap<String, Value>) -> Result<()> {
        self.values()?
            .extend(batch.iter().map(|(k, v)| (k.clone(), v.clone())));
        notify(&self.changes, &batch);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
