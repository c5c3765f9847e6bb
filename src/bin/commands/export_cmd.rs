use anyhow::{Context, Result};
use geoscope::{Edition, EngineConfig, GeoSource, Grouping, RangeLists};
use std::path::PathBuf;

/// Write per-group range lists from a Country (or City) database
///
/// Reads `database` when given, otherwise the configured Country file.
pub fn cmd_export(
    config: &EngineConfig,
    database: Option<PathBuf>,
    by: Grouping,
    output: PathBuf,
) -> Result<()> {
    let path = database.unwrap_or_else(|| config.resolve(&config.country_file));
    let source = GeoSource::open(Edition::Country, &path, config.load_mode)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;

    let lists = RangeLists::from_source(&source)
        .with_context(|| format!("Failed to read networks from {}", path.display()))?;
    let summary = lists
        .write(&output, by)
        .with_context(|| format!("Failed to write range lists to {}", output.display()))?;

    eprintln!(
        "Wrote {} networks in {} groups to {}",
        summary.networks,
        summary.groups.len(),
        output.display()
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
