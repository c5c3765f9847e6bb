//! Enclosing-network resolution from the ASN edition

use crate::address::{require_public, Address};
use crate::error::LookupError;
use crate::record::{asn_fields, NetworkRecord};
use crate::registry::SnapshotRegistry;
use crate::snapshot::DatabaseSnapshot;
use ipnet::IpNet;
use std::sync::Arc;
use tracing::error;

/// Resolves the most specific network containing an address
pub struct NetworkResolver {
    registry: Arc<SnapshotRegistry>,
}

impl NetworkResolver {
    /// Create a resolver reading from `registry`
    pub fn new(registry: Arc<SnapshotRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `text` against the current snapshot
    pub fn resolve_network(&self, text: &str) -> Result<NetworkRecord, LookupError> {
        let address = require_public(text)?;
        let snapshot = self.registry.current();
        resolve_address(&snapshot, &address)
    }
}

/// Resolve `text` in a given snapshot
pub fn resolve_in(snapshot: &DatabaseSnapshot, text: &str) -> Result<NetworkRecord, LookupError> {
    let address = require_public(text)?;
    resolve_address(snapshot, &address)
}

fn resolve_address(
    snapshot: &DatabaseSnapshot,
    address: &Address,
) -> Result<NetworkRecord, LookupError> {
    let asn = snapshot
        .asn()
        .ok_or(LookupError::DatabaseUnavailable("ASN database not loaded"))?;
    let not_found = || LookupError::NotFound { ip: address.ip() };

    let (data, prefix_len) = match asn.lookup(address.ip()) {
        Ok(Some(found)) => found,
        Ok(None) => return Err(not_found()),
        Err(e) => {
            error!(ip = %address, error = %e, "ASN lookup failed");
            return Err(not_found());
        }
    };

    // Prefix lengths follow the family of the looked-up address, so mapped
    // IPv6 input resolves to an IPv4 network
    let network = IpNet::new(address.canonical(), prefix_len)
        .map_err(|_| {
            error!(ip = %address, prefix_len, "prefix length out of range");
            not_found()
        })?
        .trunc();

    let (asn, asn_org) = asn_fields(&data);
    Ok(NetworkRecord {
        ip: address.canonical(),
        network: network.to_string(),
        prefix_len: network.prefix_len(),
        asn,
        asn_org,
    })
}
