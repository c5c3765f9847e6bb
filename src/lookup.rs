//! Geolocation lookups merged across editions
//!
//! A lookup classifies the input, captures one snapshot, then consults:
//! 1. City, when loaded
//! 2. Country, when City is absent or had no country data for the address
//! 3. ASN, when loaded
//!
//! City fields take precedence over Country fields; ASN fields are
//! independent. Every field of a record comes from the same snapshot.

use crate::address::{require_public, Address};
use crate::data_section::DataValue;
use crate::error::LookupError;
use crate::record::GeoRecord;
use crate::registry::SnapshotRegistry;
use crate::snapshot::DatabaseSnapshot;
use crate::source::GeoSource;
use std::sync::Arc;
use tracing::error;

/// Resolves addresses to merged [`GeoRecord`]s
pub struct LookupOrchestrator {
    registry: Arc<SnapshotRegistry>,
    locales: Vec<String>,
}

impl LookupOrchestrator {
    /// Create an orchestrator reading from `registry`, naming entities in
    /// the first of `locales` the data carries
    pub fn new(registry: Arc<SnapshotRegistry>, locales: Vec<String>) -> Self {
        Self { registry, locales }
    }

    /// Look up one address against the current snapshot
    pub fn lookup(&self, text: &str) -> Result<GeoRecord, LookupError> {
        let address = require_public(text)?;
        let snapshot = self.registry.current();
        lookup_address(&snapshot, &address, &self.locales)
    }

    /// Look up several addresses against a single snapshot
    pub fn lookup_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Result<GeoRecord, LookupError>> {
        let snapshot = self.registry.current();
        texts
            .iter()
            .map(|text| lookup_in(&snapshot, text.as_ref(), &self.locales))
            .collect()
    }
}

/// Look up `text` in a given snapshot
pub fn lookup_in(
    snapshot: &DatabaseSnapshot,
    text: &str,
    locales: &[String],
) -> Result<GeoRecord, LookupError> {
    let address = require_public(text)?;
    lookup_address(snapshot, &address, locales)
}

fn lookup_address(
    snapshot: &DatabaseSnapshot,
    address: &Address,
    locales: &[String],
) -> Result<GeoRecord, LookupError> {
    if !snapshot.any_loaded() {
        return Err(LookupError::DatabaseUnavailable("no database sources loaded"));
    }

    let mut record = GeoRecord::empty(address.canonical());
    let mut found = false;

    if let Some(data) = snapshot.city().and_then(|city| query(city, address)) {
        record.apply_city(&data, locales);
        found = true;
    }

    if !record.has_country() {
        if let Some(data) = snapshot.country().and_then(|country| query(country, address)) {
            record.apply_country(&data, locales);
            found = true;
        }
    }

    if let Some(data) = snapshot.asn().and_then(|asn| query(asn, address)) {
        record.apply_asn(&data);
        found = true;
    }

    if !found {
        return Err(LookupError::NotFound { ip: address.ip() });
    }
    Ok(record)
}

/// Record for `address` in `source`; decode failures count as no data
pub(crate) fn query(source: &GeoSource, address: &Address) -> Option<DataValue> {
    match source.lookup(address.ip()) {
        Ok(found) => found.map(|(data, _)| data),
        Err(e) => {
            error!(
                edition = %source.edition(),
                ip = %address,
                error = %e,
                "database lookup failed"
            );
            None
        }
    }
}
