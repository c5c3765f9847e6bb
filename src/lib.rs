//! Geoscope - GeoIP resolution over hot-reloadable MaxMind DB editions
//!
//! Geoscope resolves IP addresses to geographic and network-ownership
//! information using three independently updated database editions
//! (Country, City, ASN). Files are opened (memory-mapped by default),
//! published as an immutable snapshot, and swapped atomically when they
//! change on disk, so lookups never block on a reload.
//!
//! # Quick Start
//!
//! ```rust
//! use geoscope::{DataValue, Edition, GeoDatabaseBuilder, GeoEngine, EngineConfig};
//! use std::collections::HashMap;
//!
//! let dir = tempfile::tempdir()?;
//!
//! // Write a tiny ASN edition
//! let mut builder = GeoDatabaseBuilder::new("GeoLite2-ASN");
//! let mut data = HashMap::new();
//! data.insert("autonomous_system_number".to_string(), DataValue::Uint32(15169));
//! data.insert(
//!     "autonomous_system_organization".to_string(),
//!     DataValue::String("GOOGLE".to_string()),
//! );
//! builder.add_network("8.8.8.0/24", DataValue::Map(data))?;
//! std::fs::write(dir.path().join(Edition::Asn.default_file_name()), builder.build()?)?;
//!
//! let mut config = EngineConfig::default().with_data_dir(dir.path());
//! config.reload_interval_secs = 0;
//! let engine = GeoEngine::new(config)?;
//!
//! let record = engine.lookup("8.8.8.8")?;
//! assert_eq!(record.asn, Some(15169));
//! assert!(record.country_code.is_none());
//!
//! let network = engine.resolve_network("8.8.8.8")?;
//! assert_eq!(network.network, "8.8.8.0/24");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  ReloadScheduler (timer / fs events) │
//! └──────────────────┬───────────────────┘
//!                    ↓ reload()
//! ┌──────────────────────────────────────┐
//! │  SnapshotRegistry                    │
//! │    ArcSwap<DatabaseSnapshot>         │
//! │      country / city / asn slots      │
//! └──────────────────┬───────────────────┘
//!                    ↓ current()
//! ┌──────────────────────────────────────┐
//! │  LookupOrchestrator  NetworkResolver │
//! │  HealthReporter                      │
//! └──────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Input classification
pub mod address;
/// MMDB file writer
pub mod builder;
/// Layered engine configuration
pub mod config;
/// Data section encoding/decoding
pub mod data_section;
pub mod engine;
/// Error types
pub mod error;
/// Per-country and per-continent range lists
pub mod export;
/// Availability reporting
pub mod health;
/// IP tree builder for MMDB format
pub mod ip_tree_builder;
pub mod lookup;
/// MMDB format primitives
pub mod mmdb;
pub mod network;
/// Result records
pub mod record;
/// Snapshot publication and reloads
pub mod registry;
/// Immutable database snapshots
pub mod snapshot;
/// Single database files
pub mod source;
/// Periodic and filesystem-triggered reloads
pub mod watcher;

pub use crate::address::{class_of, classify, Address, AddressClass};
pub use crate::builder::GeoDatabaseBuilder;
pub use crate::config::EngineConfig;
pub use crate::data_section::DataValue;
pub use crate::engine::GeoEngine;
pub use crate::error::{
    BuildError, ExportError, LoadError, LookupError, SourceError, RETRY_AFTER_SECS,
};
pub use crate::export::{ExportSummary, Grouping, RangeEntry, RangeLists};
pub use crate::health::{HealthReporter, HealthStatus, Overall};
pub use crate::lookup::LookupOrchestrator;
pub use crate::mmdb::MmdbError;
pub use crate::network::NetworkResolver;
pub use crate::record::{GeoRecord, NetworkRecord};
pub use crate::registry::{
    LoadSummary, RegistryOptions, ReloadEvent, SnapshotRegistry, SourceOutcome, SourceState,
};
pub use crate::snapshot::{DatabaseSnapshot, SourceSlot};
pub use crate::source::{Edition, GeoSource, LoadMode};
pub use crate::watcher::{ReloadScheduler, SchedulerOptions};

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
