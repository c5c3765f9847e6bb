use anyhow::Result;
use geoscope::GeoEngine;
use std::io;

use crate::cli_utils::{error_json, print_line};

pub fn cmd_network(engine: &GeoEngine, address: &str) -> Result<bool> {
    let mut out = io::stdout().lock();
    match engine.resolve_network(address) {
        Ok(record) => {
            print_line(&mut out, &record)?;
            Ok(true)
        }
        Err(e) => {
            print_line(&mut out, &error_json(address, &e))?;
            Ok(false)
        }
    }
}
