use std::{path::Path, time::Duration};

use anyhow::Result;
use collection::collector::EventCollector;
use processing::ProcessingModule;
use storage::file_store::FileStore;
use tokio::{
    io::{AsyncBufRead, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracking::tracker::{AttributionTracker, TrackerSettings};

use crate::{
    browser_api::{events::BrowserEvent, registry::SharedTabRegistry},
    daemon::aggregation::PeriodAggregator,
    utils::clock::{Clock, DefaultClock},
};

pub mod aggregation;
pub mod args;
pub mod collection;
pub mod processing;
pub mod shutdown;
pub mod storage;
pub mod tracking;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct DaemonConfig {
    pub flush_interval: Duration,
    pub tracker: TrackerSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            tracker: TrackerSettings::default(),
        }
    }
}

/// Represents the starting point for the host. Newline-delimited JSON events are read from stdin
/// until it is closed or the process is interrupted.
pub async fn start_daemon(dir: &Path, config: DaemonConfig) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let source = BufReader::new(tokio::io::stdin());

    let (_, result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        run_host(dir, config, source, shutdown_token.clone(), DefaultClock),
    );
    result
}

async fn run_host<R: AsyncBufRead + Unpin>(
    dir: &Path,
    config: DaemonConfig,
    source: R,
    shutdown_token: CancellationToken,
    clock: impl Clock + Clone,
) -> Result<()> {
    let (sender, receiver) = mpsc::channel::<BrowserEvent>(32);
    let registry = SharedTabRegistry::default();

    let store = FileStore::new(dir.join("store"))?;
    info!("Using store at {:?}", store.path());

    let tracker = create_tracker(store, registry.clone(), config.tracker, clock.clone());
    if let Err(e) = tracker.initialize().await {
        error!("Failed to initialize period buckets {e:?}");
    }

    let collector = create_collector(
        sender,
        source,
        registry,
        &shutdown_token,
        config.flush_interval,
        clock,
    );
    let processor = ProcessingModule::new(receiver, tracker);

    let (collection_result, processing_result) = tokio::join!(collector.run(), processor.run());

    if let Err(collection_result) = collection_result {
        error!("Collection module got an error {:?}", collection_result);
    }

    if let Err(processing_result) = processing_result {
        error!("Processing module got an error {:?}", processing_result);
    }

    Ok(())
}

fn create_collector<R: AsyncBufRead + Unpin>(
    sender: mpsc::Sender<BrowserEvent>,
    source: R,
    registry: SharedTabRegistry,
    shutdown_token: &CancellationToken,
    flush_interval: Duration,
    clock: impl Clock,
) -> EventCollector<R> {
    EventCollector::new(
        sender,
        source,
        registry,
        shutdown_token.clone(),
        flush_interval,
        Box::new(clock),
    )
}

fn create_tracker(
    store: FileStore,
    registry: SharedTabRegistry,
    settings: TrackerSettings,
    clock: impl Clock,
) -> AttributionTracker<FileStore, SharedTabRegistry> {
    AttributionTracker::new(
        PeriodAggregator::new(store),
        registry,
        Box::new(clock),
        settings,
    )
}
