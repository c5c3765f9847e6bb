use anyhow::Result;
use geoscope::{GeoEngine, Overall};

/// Print the health report; false when nothing is loaded
pub fn cmd_health(engine: &GeoEngine) -> Result<bool> {
    let report = engine.report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report.overall != Overall::Unavailable)
}
