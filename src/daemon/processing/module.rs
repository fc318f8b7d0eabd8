use anyhow::Result;

use crate::browser_api::events::BrowserEvent;

/// Represents a consumer of browser events. The processing loop feeds every event through one of
/// these, so an implementation never sees two events at once.
pub trait EventProcessor {
    fn process_next(&mut self, message: BrowserEvent) -> impl std::future::Future<Output = Result<()>>;

    /// Called once after the event source is exhausted.
    fn finalize(&mut self) -> impl std::future::Future<Output = Result<()>>;
}
