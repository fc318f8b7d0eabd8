//! Attribution of browsing time. [tracker::AttributionTracker] reacts to browser events and keeps
//! the [watch::ActiveWatch] cursor up to date.

pub mod tracker;
pub mod watch;
