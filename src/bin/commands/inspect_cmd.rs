use anyhow::{Context, Result};
use geoscope::data_section::DataDecoder;
use geoscope::mmdb::{MmdbHeader, MmdbMetadata, SearchTree};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cli_utils::{data_value_to_json, format_bytes, format_epoch};

pub fn cmd_inspect(database: PathBuf, json_output: bool, ip: Option<String>) -> Result<()> {
    let bytes = std::fs::read(&database)
        .with_context(|| format!("Failed to read database: {}", database.display()))?;
    let header = MmdbHeader::from_file(&bytes)
        .with_context(|| format!("Not a valid MMDB file: {}", database.display()))?;
    let metadata = MmdbMetadata::from_file(&bytes)
        .with_context(|| format!("Failed to read metadata: {}", database.display()))?;

    // Raw record for one address, when asked
    let record = match ip {
        Some(text) => {
            let addr: IpAddr = text
                .trim()
                .parse()
                .with_context(|| format!("Invalid IP address: {}", text))?;
            let found = SearchTree::new(&bytes, &header)
                .lookup(addr)
                .with_context(|| format!("Lookup failed for {}", addr))?;
            match found {
                Some(result) => {
                    let section = &bytes[header.data_section_start..header.data_section_end];
                    let value = DataDecoder::new(section)
                        .decode(result.data_offset)
                        .with_context(|| format!("Failed to decode record for {}", addr))?;
                    Some(json!({
                        "ip": addr.to_string(),
                        "prefix_len": result.prefix_len,
                        "data": data_value_to_json(&value),
                    }))
                }
                None => Some(json!({ "ip": addr.to_string(), "data": null })),
            }
        }
        None => None,
    };

    if json_output {
        let mut output = json!({
            "file": database.display().to_string(),
            "size": bytes.len(),
            "database_type": metadata.database_type,
            "build_epoch": metadata.build_epoch,
            "binary_format": format!("{}.{}", metadata.binary_format.0, metadata.binary_format.1),
            "ip_version": header.ip_version.as_number(),
            "node_count": header.node_count,
            "record_size": header.record_size.bits(),
            "languages": metadata.languages,
            "description": metadata.description,
        });
        if let Some(record) = record {
            output["record"] = record;
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database:        {}", database.display());
    println!("Size:            {}", format_bytes(bytes.len()));
    println!("Database type:   {}", metadata.database_type);
    println!(
        "Build time:      {} ({})",
        format_epoch(metadata.build_epoch),
        metadata.build_epoch
    );
    println!(
        "Binary format:   {}.{}",
        metadata.binary_format.0, metadata.binary_format.1
    );
    println!("IP version:      IPv{}", header.ip_version.as_number());
    println!("Node count:      {}", header.node_count);
    println!("Record size:     {} bits", header.record_size.bits());
    if !metadata.languages.is_empty() {
        println!("Languages:       {}", metadata.languages.join(", "));
    }
    if !metadata.description.is_empty() {
        println!("Description:");
        let mut langs: Vec<_> = metadata.description.iter().collect();
        langs.sort();
        for (lang, text) in langs {
            println!("  {}: {}", lang, text);
        }
    }
    if let Some(record) = record {
        println!();
        println!("{}", serde_json::to_string_pretty(&record)?);
    }

    Ok(())
}
