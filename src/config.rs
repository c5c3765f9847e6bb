//! Engine configuration
//!
//! Settings are layered, later sources winning:
//! 1. built-in defaults
//! 2. an optional TOML file
//! 3. environment variables prefixed with `GEOSCOPE_`
//!    (e.g. `GEOSCOPE_DATA_DIR=/srv/geoip`, `GEOSCOPE_LOCALES=de,en`)

use crate::registry::RegistryOptions;
use crate::source::LoadMode;
use crate::watcher::{SchedulerOptions, DEBOUNCE};
use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables read by [`EngineConfig::load`]
pub const ENV_PREFIX: &str = "GEOSCOPE";

/// Example configuration file
pub const EXAMPLE_CONFIG: &str = r#"### geoscope configuration file

### directory holding the GeoLite2 .mmdb files
# data_dir = "/geoip-data"

### file names, relative to data_dir (absolute paths are used as-is)
# country_file = "GeoLite2-Country.mmdb"
# city_file = "GeoLite2-City.mmdb"
# asn_file = "GeoLite2-ASN.mmdb"

### periodic reload in seconds (0 disables)
# reload_interval_secs = 3600

### reload as soon as the files change on disk
# watch = false

### keep a loaded database when its replacement fails to open
# retain_stale_sources = true

### "mmap" or "memory"
### with "mmap", updaters must replace files by rename: rewriting a mapped
### file in place can crash running lookups (SIGBUS) or return torn records
# load_mode = "mmap"

### preferred locales for names
# locales = ["en"]

# log_level = "info"
"#;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the database files
    pub data_dir: PathBuf,
    /// Country edition file
    pub country_file: PathBuf,
    /// City edition file
    pub city_file: PathBuf,
    /// ASN edition file
    pub asn_file: PathBuf,
    /// Periodic reload interval in seconds; 0 disables the timer
    pub reload_interval_secs: u64,
    /// Reload when the database files change on disk
    pub watch: bool,
    /// Keep a loaded source when its file fails to reopen
    pub retain_stale_sources: bool,
    /// How files are brought into memory
    pub load_mode: LoadMode,
    /// Preferred locales for entity names, most preferred first
    pub locales: Vec<String>,
    /// Log verbosity for the command line front-end
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/geoip-data"),
            country_file: PathBuf::from("GeoLite2-Country.mmdb"),
            city_file: PathBuf::from("GeoLite2-City.mmdb"),
            asn_file: PathBuf::from("GeoLite2-ASN.mmdb"),
            reload_interval_secs: 3600,
            watch: false,
            retain_stale_sources: true,
            load_mode: LoadMode::Mmap,
            locales: vec!["en".to_string()],
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from an optional TOML file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// Load with an explicit environment map instead of the process environment
    pub fn load_from(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(anyhow!("config file {} does not exist", path.display()));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("locales")
                .source(env),
        );

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;
        let mut config: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        config.locales.retain(|l| !l.trim().is_empty());
        if config.locales.is_empty() {
            config.locales.push("en".to_string());
        }
        Ok(config)
    }

    /// Replace the data directory
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Full path of a configured file; relative names resolve under `data_dir`
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }

    /// Registry settings derived from this configuration
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            country_path: self.resolve(&self.country_file),
            city_path: self.resolve(&self.city_file),
            asn_path: self.resolve(&self.asn_file),
            load_mode: self.load_mode,
            retain_stale_sources: self.retain_stale_sources,
        }
    }

    /// Scheduler settings; `None` when neither the timer nor watching is on
    pub fn scheduler_options(&self) -> Option<SchedulerOptions> {
        let interval = (self.reload_interval_secs > 0)
            .then(|| Duration::from_secs(self.reload_interval_secs));
        if interval.is_none() && !self.watch {
            return None;
        }
        Some(SchedulerOptions {
            interval,
            watch: self.watch,
            debounce: DEBOUNCE,
        })
    }
}
