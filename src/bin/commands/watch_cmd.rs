use anyhow::{Context, Result};
use geoscope::GeoEngine;
use std::io::{self, Write};
use tracing::info;

use crate::cli_utils::{error_json, print_line, stdin_lines};

/// Resolve addresses from stdin until EOF
///
/// The engine's scheduler keeps running in the background, so answers
/// follow database updates as they land.
pub fn cmd_watch(engine: &GeoEngine) -> Result<()> {
    let config = engine.config();
    info!(
        data_dir = %config.data_dir.display(),
        reload_interval_secs = config.reload_interval_secs,
        watch = config.watch,
        "reading addresses from stdin"
    );

    let mut out = io::stdout().lock();
    for line in stdin_lines() {
        let input = line.context("Failed to read from stdin")?;
        match engine.lookup(&input) {
            Ok(record) => print_line(&mut out, &record)?,
            Err(e) => print_line(&mut out, &error_json(&input, &e))?,
        }
        // Line-buffered for pipes
        out.flush()?;
    }
    Ok(())
}
