use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tabtally::{
    daemon::{
        args::HostArgs,
        start_daemon,
        tracking::tracker::TrackerSettings,
        DaemonConfig,
    },
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, HOST_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() -> Result<()> {
    run(HostArgs::parse())
}

fn run(args: HostArgs) -> Result<()> {
    let app_dir = match args.dir {
        Some(dir) => ensure_dir(dir)?,
        None => create_application_default_path()?,
    };
    enable_logging(HOST_PREFIX, &app_dir, args.log, args.log_console)?;

    let config = DaemonConfig {
        flush_interval: Duration::from_secs(args.flush_interval.max(1)),
        tracker: TrackerSettings {
            min_interval: chrono::Duration::milliseconds(args.min_interval_ms.max(0)),
        },
    };
    single_thread_runtime()?.block_on(async move { start_daemon(&app_dir, config).await })?;
    Ok(())
}
