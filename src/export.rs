//! Per-country and per-continent IP range lists
//!
//! Walks every network of a Country (or City) edition and keeps those that
//! carry both a country and a continent code. Output is plain text, one
//! `NETWORK CODE` line per range:
//!
//! - `ip-ranges-all.txt`: every network with its continent, grouped by continent
//! - `ip-ranges-{KEY}.txt`: one file per country or continent, each line
//!   naming the network's country

use crate::data_section::DataValue;
use crate::error::ExportError;
use crate::source::GeoSource;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the combined list
pub const ALL_RANGES_FILE: &str = "ip-ranges-all.txt";

/// How networks are split into files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grouping {
    /// One file per ISO country code
    Country,
    /// One file per continent code
    Continent,
}

/// One exported network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry {
    /// The network, IPv4 networks of IPv6 databases in IPv4 form
    pub network: IpNet,
    /// ISO 3166-1 country code
    pub country: String,
    /// Two-letter continent code
    pub continent: String,
}

impl RangeEntry {
    fn key(&self, by: Grouping) -> &str {
        match by {
            Grouping::Country => &self.country,
            Grouping::Continent => &self.continent,
        }
    }
}

/// What an export wrote
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    /// Networks written to the combined list
    pub networks: usize,
    /// Networks left out for lacking a country or continent code
    pub skipped: usize,
    /// Network count per group key
    pub groups: BTreeMap<String, usize>,
    /// Every file written, combined list first
    pub files: Vec<PathBuf>,
}

/// Networks of one database tagged with their country and continent
#[derive(Debug, Clone, Default)]
pub struct RangeLists {
    entries: Vec<RangeEntry>,
    skipped: usize,
}

impl RangeLists {
    /// Collect the networks of `source`
    pub fn from_source(source: &GeoSource) -> Result<Self, ExportError> {
        let mut lists = Self::default();
        for found in source.networks() {
            let (network, record) = found?;
            let code = |path: &[&str]| {
                record
                    .get_path(path)
                    .and_then(DataValue::as_str)
                    .filter(|code| !code.is_empty())
                    .map(str::to_string)
            };
            match (code(&["country", "iso_code"]), code(&["continent", "code"])) {
                (Some(country), Some(continent)) => lists.entries.push(RangeEntry {
                    network,
                    country,
                    continent,
                }),
                _ => lists.skipped += 1,
            }
        }
        debug!(
            edition = %source.edition(),
            networks = lists.entries.len(),
            skipped = lists.skipped,
            "collected networks"
        );
        Ok(lists)
    }

    /// Tagged networks in address order
    pub fn entries(&self) -> &[RangeEntry] {
        &self.entries
    }

    /// Networks without a country or continent code
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Networks keyed by country or continent code, each group in address order
    pub fn groups(&self, by: Grouping) -> BTreeMap<&str, Vec<&RangeEntry>> {
        let mut groups: BTreeMap<&str, Vec<&RangeEntry>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(entry.key(by)).or_default().push(entry);
        }
        groups
    }

    /// Write the combined list and one file per group under `dir`
    ///
    /// Group keys that are not plain ASCII alphanumerics never become file
    /// names; their networks still appear in the combined list.
    pub fn write(&self, dir: &Path, by: Grouping) -> Result<ExportSummary, ExportError> {
        fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        let all_path = dir.join(ALL_RANGES_FILE);
        let by_continent = self.groups(Grouping::Continent);
        let all = by_continent.iter().flat_map(|(continent, entries)| {
            entries.iter().map(move |entry| (entry.network, *continent))
        });
        write_lines(&all_path, all)?;
        files.push(all_path);

        let mut groups = BTreeMap::new();
        for (key, entries) in self.groups(by) {
            if !key.chars().all(|c| c.is_ascii_alphanumeric()) {
                warn!(key, "skipping group with an unusable file name");
                continue;
            }
            let path = dir.join(format!("ip-ranges-{}.txt", key));
            let lines = entries.iter().map(|entry| (entry.network, entry.country.as_str()));
            write_lines(&path, lines)?;
            groups.insert(key.to_string(), entries.len());
            files.push(path);
        }

        info!(
            dir = %dir.display(),
            networks = self.entries.len(),
            groups = groups.len(),
            "wrote range lists"
        );
        Ok(ExportSummary {
            networks: self.entries.len(),
            skipped: self.skipped,
            groups,
            files,
        })
    }
}

fn write_lines<'e>(
    path: &Path,
    lines: impl Iterator<Item = (IpNet, &'e str)>,
) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    for (network, code) in lines {
        writeln!(out, "{} {}", network, code).map_err(io_err)?;
    }
    out.flush().map_err(io_err)
}
