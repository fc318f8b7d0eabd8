use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

/// The host reads one JSON event per line from stdin.
#[derive(Parser)]
#[command(version, about = "Records browsing time from tab events read as JSON lines on stdin")]
pub struct HostArgs {
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only. Stdout must stay quiet when the browser is
    /// attached.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Seconds between periodic flushes of the watched tab.
    #[arg(long = "flush-interval", default_value_t = 30)]
    pub flush_interval: u64,
    /// Intervals shorter than this many milliseconds are not recorded.
    #[arg(long = "min-interval-ms", default_value_t = 100)]
    pub min_interval_ms: i64,
}
