use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs4::tokio::AsyncFileExt;
use serde_json::{Map, Value};
use tokio::{fs::File, sync::broadcast};
use tracing::debug;

use crate::fs::operations::{read_or_empty, replace_file};

use super::store::{notify, KeyValueStore, StoreChange};

const STORE_FILE: &str = "periods.json";
const LOCK_FILE: &str = ".periods.lock";

/// The main realization of [KeyValueStore]. All keys live in a single JSON object so that a batch
/// can be replaced in one rename. Access is guarded by a lock file, which lets the report command
/// read while the host is writing.
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    /// Store used for writing. Creates `store_dir` when it's missing.
    pub fn new(store_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&store_dir)?;
        Ok(Self::open(store_dir))
    }

    /// Store for readers. Nothing is created on disk until the first write, a missing directory
    /// simply reads as empty.
    pub fn open(store_dir: PathBuf) -> Self {
        Self {
            path: store_dir.join(STORE_FILE),
            lock_path: store_dir.join(LOCK_FILE),
            changes: broadcast::channel(16).0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_lock(&self) -> Result<File> {
        Ok(File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .await?)
    }

    async fn read_all(&self) -> Result<Map<String, Value>> {
        let bytes = read_or_empty(&self.path).await?;
        if bytes.is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Store file {:?} is not a JSON object", self.path))
    }
}

impl KeyValueStore for FileStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(HashMap::new());
        }
        let lock = self.open_lock().await?;
        lock.lock_shared()?;
        let result = self.read_all().await;
        lock.unlock_async().await?;

        let mut all = result?;
        Ok(keys
            .iter()
            .filter_map(|key| all.remove(*key).map(|v| (key.to_string(), v)))
            .collect())
    }

    async fn set(&self, batch: HashMap<String, Value>) -> Result<()> {
        let lock = self.open_lock().await?;
        // Read-merge-write has to happen under one exclusive lock, otherwise another writer
        // could slip in between and its keys would be lost.
        lock.lock_exclusive()?;
        let result = async {
            let mut all = self.read_all().await?;
            all.extend(batch.iter().map(|(k, v)| (k.clone(), v.clone())));
            let bytes = serde_json::to_vec(&all)?;
            replace_file(&self.path, &bytes).await?;
            anyhow::Ok(())
        }
        .await;
        lock.unlock_async().await?;
        result?;

        debug!("Stored keys {:?}", batch.keys().collect::<Vec<_>>());
        notify(&self.changes, &batch);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
