use anyhow::{bail, Result};
use chrono::DateTime;
use geoscope::{DataValue, LookupError};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{self, Write};

/// Print one compact JSON document per line
pub fn print_line<T: Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// JSON shape of a failed lookup
pub fn error_json(input: &str, err: &LookupError) -> serde_json::Value {
    json!({
        "ip": input.trim(),
        "error": err.kind(),
        "detail": err.to_string(),
    })
}

/// Non-empty, trimmed lines of stdin
pub fn stdin_lines() -> impl Iterator<Item = io::Result<String>> {
    io::stdin().lines().filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(Ok(line.trim().to_string())),
        Err(e) => Some(Err(e)),
    })
}

pub fn format_bytes(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

pub fn format_epoch(epoch: u64) -> String {
    i64::try_from(epoch)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("invalid timestamp {}", epoch))
}

pub fn data_value_to_json(data: &DataValue) -> serde_json::Value {
    match data {
        DataValue::String(s) => json!(s),
        DataValue::Double(d) => json!(d),
        DataValue::Bytes(b) => json!(b),
        DataValue::Uint16(u) => json!(u),
        DataValue::Uint32(u) => json!(u),
        DataValue::Uint64(u) => json!(u),
        DataValue::Uint128(u) => json!(u.to_string()),
        DataValue::Int32(i) => json!(i),
        DataValue::Bool(b) => json!(b),
        DataValue::Float(f) => json!(f),
        DataValue::Map(entries) => {
            let map: serde_json::Map<_, _> = entries
                .iter()
                .map(|(k, v)| (k.clone(), data_value_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
        DataValue::Array(items) => {
            json!(items.iter().map(data_value_to_json).collect::<Vec<_>>())
        }
    }
}

/// Convert input JSON to a stored value
///
/// Integers take the narrowest unsigned type that holds them (GeoLite2
/// stores ASNs as uint32 and accuracy radii as uint16); negative integers
/// become int32 when they fit.
pub fn json_to_data_value(json: &serde_json::Value) -> Result<DataValue> {
    match json {
        serde_json::Value::Null => bail!("null values cannot be stored"),
        serde_json::Value::Bool(b) => Ok(DataValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(match u {
                    u if u <= u16::MAX as u64 => DataValue::Uint16(u as u16),
                    u if u <= u32::MAX as u64 => DataValue::Uint32(u as u32),
                    u => DataValue::Uint64(u),
                })
            } else if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(DataValue::Int32(i))
            } else if let Some(f) = n.as_f64() {
                Ok(DataValue::Double(f))
            } else {
                bail!("Unsupported number: {}", n)
            }
        }
        serde_json::Value::String(s) => Ok(DataValue::String(s.clone())),
        serde_json::Value::Array(arr) => {
            let items = arr
                .iter()
                .map(json_to_data_value)
                .collect::<Result<Vec<_>>>()?;
            Ok(DataValue::Array(items))
        }
        serde_json::Value::Object(obj) => {
            let entries = obj
                .iter()
                .map(|(k, v)| Ok((k.clone(), json_to_data_value(v)?)))
                .collect::<Result<HashMap<_, _>>>()?;
            Ok(DataValue::Map(entries))
        }
    }
}
