//! Immutable views of the loaded database sources

use crate::source::{Edition, GeoSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One edition's handle in a snapshot
#[derive(Debug, Clone, Default)]
pub enum SourceSlot {
    /// Not available in this snapshot
    #[default]
    Absent,
    /// Opened and validated
    Loaded(Arc<GeoSource>),
}

impl SourceSlot {
    /// The source, when loaded
    pub fn source(&self) -> Option<&Arc<GeoSource>> {
        match self {
            SourceSlot::Loaded(source) => Some(source),
            SourceSlot::Absent => None,
        }
    }

    /// True when a source is present
    pub fn is_loaded(&self) -> bool {
        matches!(self, SourceSlot::Loaded(_))
    }
}

/// The three sources as they were at one load event
///
/// Snapshots are never mutated. A reload builds a new one and publishes it;
/// requests holding the previous `Arc` keep using it until they finish.
#[derive(Debug, Clone, Default)]
pub struct DatabaseSnapshot {
    country: SourceSlot,
    city: SourceSlot,
    asn: SourceSlot,
    generation: u64,
    loaded_at: Option<DateTime<Utc>>,
}

impl DatabaseSnapshot {
    /// The initial snapshot: nothing loaded, generation 0
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a snapshot from its slots
    pub fn new(
        country: SourceSlot,
        city: SourceSlot,
        asn: SourceSlot,
        generation: u64,
        loaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            country,
            city,
            asn,
            generation,
            loaded_at: Some(loaded_at),
        }
    }

    /// Slot for `edition`
    pub fn slot(&self, edition: Edition) -> &SourceSlot {
        match edition {
            Edition::Country => &self.country,
            Edition::City => &self.city,
            Edition::Asn => &self.asn,
        }
    }

    /// Source for `edition`, when loaded
    pub fn source(&self, edition: Edition) -> Option<&Arc<GeoSource>> {
        self.slot(edition).source()
    }

    /// Country source
    pub fn country(&self) -> Option<&Arc<GeoSource>> {
        self.country.source()
    }

    /// City source
    pub fn city(&self) -> Option<&Arc<GeoSource>> {
        self.city.source()
    }

    /// ASN source
    pub fn asn(&self) -> Option<&Arc<GeoSource>> {
        self.asn.source()
    }

    /// Number of loaded sources (0 to 3)
    pub fn loaded_count(&self) -> usize {
        Edition::ALL
            .iter()
            .filter(|&&edition| self.slot(edition).is_loaded())
            .count()
    }

    /// True when at least one source is loaded
    pub fn any_loaded(&self) -> bool {
        self.loaded_count() > 0
    }

    /// Monotonic load counter; 0 for the initial empty snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this snapshot was published
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GeoDatabaseBuilder;

    fn source(edition: Edition) -> Arc<GeoSource> {
        let bytes = GeoDatabaseBuilder::new("Test").build().unwrap();
        Arc::new(GeoSource::from_bytes(edition, bytes).unwrap())
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = DatabaseSnapshot::empty();
        assert_eq!(snapshot.generation(), 0);
        assert_eq!(snapshot.loaded_count(), 0);
        assert!(snapshot.loaded_at().is_none());
        assert!(snapshot.city().is_none());
    }

    #[test]
    fn test_slots_by_edition() {
        let snapshot = DatabaseSnapshot::new(
            SourceSlot::Absent,
            SourceSlot::Loaded(source(Edition::City)),
            SourceSlot::Loaded(source(Edition::Asn)),
            3,
            Utc::now(),
        );
        assert_eq!(snapshot.loaded_count(), 2);
        assert!(snapshot.any_loaded());
        assert!(snapshot.country().is_none());
        assert_eq!(snapshot.source(Edition::Asn).map(|s| s.edition()), Some(Edition::Asn));
        assert_eq!(snapshot.generation(), 3);
    }
}
