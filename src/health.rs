//! Availability reporting

use crate::registry::{RegistryStatus, SnapshotRegistry, SourceState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Overall service state derived from the number of loaded sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    /// All three sources loaded
    Healthy,
    /// One or two sources loaded
    Degraded,
    /// Nothing loaded
    Unavailable,
}

impl Overall {
    fn message(self) -> &'static str {
        match self {
            Overall::Healthy => "All systems operational",
            Overall::Degraded => "Some databases unavailable",
            Overall::Unavailable => "Waiting for database files",
        }
    }
}

/// Per-source availability
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStates {
    /// Country edition
    pub country: SourceState,
    /// City edition
    pub city: SourceState,
    /// ASN edition
    pub asn: SourceState,
}

/// Health summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Derived overall state
    pub overall: Overall,
    /// Country edition loaded
    pub country: bool,
    /// City edition loaded
    pub city: bool,
    /// ASN edition loaded
    pub asn: bool,
    /// Detailed per-source state
    pub sources: SourceStates,
    /// When the current snapshot was published
    pub last_load_time: Option<DateTime<Utc>>,
    /// Generation of the current snapshot
    pub generation: u64,
    /// True while a reload is running
    pub reload_in_progress: bool,
    /// Human readable summary
    pub message: &'static str,
}

impl From<RegistryStatus> for HealthStatus {
    fn from(status: RegistryStatus) -> Self {
        let loaded = |state| state == SourceState::Loaded;
        let (country, city, asn) = (loaded(status.country), loaded(status.city), loaded(status.asn));

        let overall = match [country, city, asn].iter().filter(|&&b| b).count() {
            3 => Overall::Healthy,
            0 => Overall::Unavailable,
            _ => Overall::Degraded,
        };

        HealthStatus {
            overall,
            country,
            city,
            asn,
            sources: SourceStates {
                country: status.country,
                city: status.city,
                asn: status.asn,
            },
            last_load_time: status.last_load_time,
            generation: status.generation,
            reload_in_progress: status.reload_in_progress,
            message: overall.message(),
        }
    }
}

/// Produces [`HealthStatus`] reports; never triggers a reload
pub struct HealthReporter {
    registry: Arc<SnapshotRegistry>,
}

impl HealthReporter {
    /// Create a reporter for `registry`
    pub fn new(registry: Arc<SnapshotRegistry>) -> Self {
        Self { registry }
    }

    /// Current health
    pub fn report(&self) -> HealthStatus {
        HealthStatus::from(self.registry.status())
    }
}
