//! Records how long each browser tab stays in front of the user and rolls the time up into
//! daily per-tab and weekly/monthly per-domain buckets.
//!
//! The `tabtally-host` binary is started by the browser and receives tab events over stdin,
//! `tabtally` reads the stored buckets back.

pub mod browser_api;
pub mod cli;
pub mod daemon;
pub mod fs;
pub mod utils;
