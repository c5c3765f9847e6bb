use anyhow::{Context, Result};
use geoscope::GeoEngine;
use std::io::{self, BufWriter, Write};

use crate::cli_utils::{error_json, print_line, stdin_lines};

/// Resolve every address against one snapshot, one JSON object per line
///
/// Returns false when any address failed to resolve.
pub fn cmd_lookup(engine: &GeoEngine, addresses: Vec<String>) -> Result<bool> {
    let addresses = if addresses.len() == 1 && addresses[0] == "-" {
        stdin_lines()
            .collect::<io::Result<Vec<_>>>()
            .context("Failed to read addresses from stdin")?
    } else {
        addresses
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut all_found = true;

    for (input, result) in addresses.iter().zip(engine.lookup_batch(addresses.as_slice())) {
        match result {
            Ok(record) => print_line(&mut out, &record)?,
            Err(e) => {
                all_found = false;
                print_line(&mut out, &error_json(input, &e))?;
            }
        }
    }

    out.flush()?;
    Ok(all_found)
}
