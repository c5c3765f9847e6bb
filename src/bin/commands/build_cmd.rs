use anyhow::{bail, Context, Result};
use geoscope::GeoDatabaseBuilder;
use std::fs;
use std::path::PathBuf;

use crate::cli_utils::{format_bytes, json_to_data_value};

/// Build a database from `[{"network": "8.8.8.0/24", "data": {...}}, ...]`
pub fn cmd_build(
    input: PathBuf,
    output: PathBuf,
    database_type: String,
    description: Option<String>,
    desc_lang: String,
) -> Result<()> {
    let text = fs::read_to_string(&input)
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse JSON from: {}", input.display()))?;

    let serde_json::Value::Array(entries) = json else {
        bail!("Expected a JSON array of network entries");
    };

    let mut builder = GeoDatabaseBuilder::new(database_type);
    if let Some(desc) = description {
        builder = builder.with_description(desc_lang, desc);
    }

    for (i, entry) in entries.iter().enumerate() {
        let network = entry
            .get("network")
            .and_then(|v| v.as_str())
            .with_context(|| format!("Entry {}: missing \"network\" string", i))?;
        let data = entry
            .get("data")
            .with_context(|| format!("Entry {}: missing \"data\" field", i))?;
        let value = json_to_data_value(data)
            .with_context(|| format!("Entry {} ({}): invalid data", i, network))?;
        builder
            .add_network(network, value)
            .with_context(|| format!("Entry {}: invalid network", i))?;
    }

    let bytes = builder.build().context("Failed to build database")?;
    fs::write(&output, &bytes)
        .with_context(|| format!("Failed to write output file: {}", output.display()))?;

    eprintln!(
        "Wrote {} ({} networks, {})",
        output.display(),
        builder.len(),
        format_bytes(bytes.len())
    );
    Ok(())
}
