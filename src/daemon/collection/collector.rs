use std::time::Duration;

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    browser_api::{events::BrowserEvent, registry::SharedTabRegistry},
    utils::clock::Clock,
};

/// Reads browser events line by line, keeps the tab registry current and forwards every event to
/// the processing module. Also emits [BrowserEvent::FlushTick] on a fixed schedule so long visits
/// get persisted before the tab changes.
pub struct EventCollector<R> {
    next: mpsc::Sender<BrowserEvent>,
    source: R,
    registry: SharedTabRegistry,
    shutdown: CancellationToken,
    flush_frequency: Duration,
    time_provider: Box<dyn Clock>,
}

impl<R: AsyncBufRead + Unpin> EventCollector<R> {
    pub fn new(
        next: mpsc::Sender<BrowserEvent>,
        source: R,
        registry: SharedTabRegistry,
        shutdown: CancellationToken,
        flush_frequency: Duration,
        time_provider: Box<dyn Clock>,
    ) -> Self {
        Self {
            next,
            source,
            registry,
            shutdown,
            flush_frequency,
            time_provider,
        }
    }

    fn parse(line: &str) -> Option<BrowserEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<BrowserEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                // A broken message shouldn't take the whole host down.
                warn!("Ignoring malformed event {line}: {e}");
                None
            }
        }
    }

    async fn forward(
        registry: &SharedTabRegistry,
        next: &mpsc::Sender<BrowserEvent>,
        event: BrowserEvent,
    ) -> Result<()> {
        registry.lock()?.observe(&event);
        debug!("Sending event {:?}", event);
        next.send(event)
            .await
            .inspect_err(|e| error!("Unexpected error during sending {e:?}"))?;
        Ok(())
    }

    /// Executes the collector event loop. Ends when the source is exhausted or on shutdown, in
    /// the first case shutdown is requested for everyone else.
    pub async fn run(self) -> Result<()> {
        let Self {
            next,
            source,
            registry,
            shutdown,
            flush_frequency,
            time_provider,
        } = self;
        let mut lines = source.lines();
        let mut flush_point = time_provider.instant() + flush_frequency;
        loop {
            tokio::select! {
                // Dropping the sender on return is what stops the processing module.
                _ = shutdown.cancelled() => {
                    return Ok(())
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(event) = Self::parse(&line) {
                                Self::forward(&registry, &next, event).await?;
                            }
                        }
                        Ok(None) => {
                            info!("Event source closed");
                            shutdown.cancel();
                            return Ok(());
                        }
                        Err(e) => {
                            error!("Failed to read from event source {e:?}");
                            shutdown.cancel();
                            return Err(e.into());
                        }
                    }
                }
                _ = time_provider.sleep_until(flush_point) => {
                    flush_point += flush_frequency;
                    Self::forward(&registry, &next, BrowserEvent::FlushTick).await?;
                }
            }
        }
    }
}
