//! Snapshot registry: owns the current snapshot and reloads it
//!
//! Readers call [`SnapshotRegistry::current`], a lock-free `ArcSwap` load,
//! and keep the returned `Arc` for the whole request. Reloads open every
//! edition file, build a fresh [`DatabaseSnapshot`] and publish it with a
//! single pointer swap. A writer-only mutex totally orders reloads; readers
//! never touch it.

use crate::error::LoadError;
use crate::snapshot::{DatabaseSnapshot, SourceSlot};
use crate::source::{Edition, GeoSource, LoadMode};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, error, info, warn};

/// Where the edition files live and how they are opened
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Path of the Country edition
    pub country_path: PathBuf,
    /// Path of the City edition
    pub city_path: PathBuf,
    /// Path of the ASN edition
    pub asn_path: PathBuf,
    /// Memory map or read files
    pub load_mode: LoadMode,
    /// Keep a previously loaded source when its file fails to reopen
    pub retain_stale_sources: bool,
}

impl RegistryOptions {
    /// Default GeoLite2 file names inside `data_dir`
    pub fn for_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let dir = data_dir.as_ref();
        Self {
            country_path: dir.join(Edition::Country.default_file_name()),
            city_path: dir.join(Edition::City.default_file_name()),
            asn_path: dir.join(Edition::Asn.default_file_name()),
            load_mode: LoadMode::default(),
            retain_stale_sources: true,
        }
    }

    /// Configured path of `edition`
    pub fn path(&self, edition: Edition) -> &Path {
        match edition {
            Edition::Country => &self.country_path,
            Edition::City => &self.city_path,
            Edition::Asn => &self.asn_path,
        }
    }

    /// Paths of all editions, in load order
    pub fn paths(&self) -> impl Iterator<Item = &Path> + '_ {
        Edition::ALL.into_iter().map(move |edition| self.path(edition))
    }
}

/// What a reload did with one edition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// Opened (or kept, when the file did not change)
    Loaded {
        /// File the source was read from
        path: PathBuf,
        /// `database_type` metadata
        database_type: String,
        /// Build time, seconds since the Unix epoch
        build_epoch: u64,
    },
    /// The file failed to open; the previously loaded source was kept
    Retained {
        /// Why the file failed to open
        reason: String,
    },
    /// The file failed to open and nothing was carried over
    Absent {
        /// Why the file failed to open
        reason: String,
    },
}

impl SourceOutcome {
    fn loaded(path: &Path, source: &GeoSource) -> Self {
        SourceOutcome::Loaded {
            path: path.to_path_buf(),
            database_type: source.database_type().to_string(),
            build_epoch: source.build_epoch(),
        }
    }

    /// True for `Loaded`
    pub fn is_loaded(&self) -> bool {
        matches!(self, SourceOutcome::Loaded { .. })
    }
}

/// Result of a successful reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Generation of the published snapshot
    pub generation: u64,
    /// Publication time
    pub loaded_at: DateTime<Utc>,
    /// Country edition outcome
    pub country: SourceOutcome,
    /// City edition outcome
    pub city: SourceOutcome,
    /// ASN edition outcome
    pub asn: SourceOutcome,
}

impl LoadSummary {
    /// Outcome for `edition`
    pub fn outcome(&self, edition: Edition) -> &SourceOutcome {
        match edition {
            Edition::Country => &self.country,
            Edition::City => &self.city,
            Edition::Asn => &self.asn,
        }
    }
}

/// Event fired after every reload attempt
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// Whether a new snapshot was published
    pub success: bool,
    /// Generation current after the attempt
    pub generation: u64,
    /// Error message if the reload failed (None on success)
    pub error: Option<String>,
}

/// Callback type for reload notifications
pub type ReloadCallback = Arc<dyn Fn(ReloadEvent) + Send + Sync>;

/// Availability of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    /// Not loaded
    Absent,
    /// Not loaded yet, and a reload is running
    Loading,
    /// Loaded in the current snapshot
    Loaded,
}

/// Point-in-time availability of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    /// Country source state
    pub country: SourceState,
    /// City source state
    pub city: SourceState,
    /// ASN source state
    pub asn: SourceState,
    /// When the current snapshot was published
    pub last_load_time: Option<DateTime<Utc>>,
    /// Generation of the current snapshot
    pub generation: u64,
    /// True while a reload is running
    pub reload_in_progress: bool,
}

/// State only touched by the reloading thread
#[derive(Default)]
struct WriterState {
    callback: Option<ReloadCallback>,
}

/// Owner of the current snapshot
pub struct SnapshotRegistry {
    current: ArcSwap<DatabaseSnapshot>,
    options: RegistryOptions,
    writer: Mutex<WriterState>,
    reloading: AtomicBool,
}

impl SnapshotRegistry {
    /// Create a registry holding the empty generation-0 snapshot
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            current: ArcSwap::from_pointee(DatabaseSnapshot::empty()),
            options,
            writer: Mutex::new(WriterState::default()),
            reloading: AtomicBool::new(false),
        }
    }

    /// Options the registry was created with
    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// The current snapshot; never blocks
    pub fn current(&self) -> Arc<DatabaseSnapshot> {
        self.current.load_full()
    }

    /// Register a callback invoked after every reload attempt
    pub fn on_reload<F>(&self, callback: F)
    where
        F: Fn(ReloadEvent) + Send + Sync + 'static,
    {
        self.lock_writer().callback = Some(Arc::new(callback));
    }

    /// Reopen every edition and publish a new snapshot
    ///
    /// Waits for a reload already in progress. When no edition can be
    /// opened the current snapshot stays in place.
    pub fn reload(&self) -> Result<LoadSummary, LoadError> {
        let writer = self.lock_writer();
        self.reload_locked(&writer)
    }

    /// Like [`reload`](Self::reload), but returns `None` instead of waiting
    /// when another reload is running
    pub fn try_reload(&self) -> Option<Result<LoadSummary, LoadError>> {
        match self.writer.try_lock() {
            Ok(writer) => Some(self.reload_locked(&writer)),
            Err(TryLockError::Poisoned(poisoned)) => Some(self.reload_locked(&poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => {
                debug!("reload already in progress, skipping");
                None
            }
        }
    }

    /// Availability of each source plus load bookkeeping
    pub fn status(&self) -> RegistryStatus {
        let snapshot = self.current.load();
        let reload_in_progress = self.reloading.load(Ordering::Acquire);
        let state = |edition| {
            if snapshot.slot(edition).is_loaded() {
                SourceState::Loaded
            } else if reload_in_progress {
                SourceState::Loading
            } else {
                SourceState::Absent
            }
        };

        RegistryStatus {
            country: state(Edition::Country),
            city: state(Edition::City),
            asn: state(Edition::Asn),
            last_load_time: snapshot.loaded_at(),
            generation: snapshot.generation(),
            reload_in_progress,
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        // A panicking callback must not wedge future reloads
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reload_locked(&self, writer: &WriterState) -> Result<LoadSummary, LoadError> {
        let _flag = ReloadingFlag::raise(&self.reloading);
        let previous = self.current.load_full();

        let (country, country_outcome) = self.load_edition(Edition::Country, &previous);
        let (city, city_outcome) = self.load_edition(Edition::City, &previous);
        let (asn, asn_outcome) = self.load_edition(Edition::Asn, &previous);

        let outcomes = [
            (Edition::Country, &country_outcome),
            (Edition::City, &city_outcome),
            (Edition::Asn, &asn_outcome),
        ];
        if !outcomes.iter().any(|(_, outcome)| outcome.is_loaded()) {
            let reasons = outcomes
                .iter()
                .filter_map(|(edition, outcome)| match outcome {
                    SourceOutcome::Retained { reason } | SourceOutcome::Absent { reason } => {
                        Some(format!("{}: {}", edition, reason))
                    }
                    SourceOutcome::Loaded { .. } => None,
                })
                .collect();
            warn!(
                generation = previous.generation(),
                "no database files could be opened, keeping current snapshot"
            );
            let err = LoadError::NoDatabasesAvailable { reasons };
            notify(
                writer,
                ReloadEvent {
                    success: false,
                    generation: previous.generation(),
                    error: Some(err.to_string()),
                },
            );
            return Err(err);
        }

        let generation = previous.generation() + 1;
        let loaded_at = Utc::now();
        let snapshot = DatabaseSnapshot::new(country, city, asn, generation, loaded_at);
        let loaded = snapshot.loaded_count();
        self.current.store(Arc::new(snapshot));
        info!(generation, loaded, "published database snapshot");

        notify(
            writer,
            ReloadEvent {
                success: true,
                generation,
                error: None,
            },
        );

        Ok(LoadSummary {
            generation,
            loaded_at,
            country: country_outcome,
            city: city_outcome,
            asn: asn_outcome,
        })
    }

    fn load_edition(
        &self,
        edition: Edition,
        previous: &DatabaseSnapshot,
    ) -> (SourceSlot, SourceOutcome) {
        let path = self.options.path(edition);
        let prior = previous.source(edition);

        if let Some(source) = prior.filter(|source| source.is_unchanged(path)) {
            debug!(edition = %edition, path = %path.display(), "database file unchanged");
            return (
                SourceSlot::Loaded(Arc::clone(source)),
                SourceOutcome::loaded(path, source),
            );
        }

        match GeoSource::open(edition, path, self.options.load_mode) {
            Ok(source) => {
                info!(
                    edition = %edition,
                    path = %path.display(),
                    database_type = source.database_type(),
                    build_epoch = source.build_epoch(),
                    "loaded database"
                );
                let outcome = SourceOutcome::loaded(path, &source);
                (SourceSlot::Loaded(Arc::new(source)), outcome)
            }
            Err(e) => {
                if e.is_missing() {
                    warn!(edition = %edition, path = %path.display(), "database file not found");
                } else {
                    error!(edition = %edition, error = %e, "failed to open database");
                }
                let reason = e.to_string();
                match prior {
                    Some(source) if self.options.retain_stale_sources => {
                        warn!(edition = %edition, "keeping previously loaded database");
                        (
                            SourceSlot::Loaded(Arc::clone(source)),
                            SourceOutcome::Retained { reason },
                        )
                    }
                    _ => (SourceSlot::Absent, SourceOutcome::Absent { reason }),
                }
            }
        }
    }
}

fn notify(writer: &WriterState, event: ReloadEvent) {
    if let Some(callback) = &writer.callback {
        callback(event);
    }
}

/// Holds `reload_in_progress` up for the duration of a reload
struct ReloadingFlag<'a>(&'a AtomicBool);

impl<'a> ReloadingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ReloadingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GeoDatabaseBuilder;
    use std::sync::atomic::AtomicU64;

    fn write_edition(dir: &Path, edition: Edition) {
        let bytes = GeoDatabaseBuilder::new(format!("GeoLite2-{:?}", edition))
            .build()
            .unwrap();
        std::fs::write(dir.join(edition.default_file_name()), bytes).unwrap();
    }

    #[test]
    fn test_initial_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SnapshotRegistry::new(RegistryOptions::for_data_dir(dir.path()));
        let status = registry.status();
        assert_eq!(status.generation, 0);
        assert_eq!(status.country, SourceState::Absent);
        assert!(status.last_load_time.is_none());
        assert!(!status.reload_in_progress);
    }

    #[test]
    fn test_no_databases_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SnapshotRegistry::new(RegistryOptions::for_data_dir(dir.path()));
        let before = registry.current();

        match registry.reload() {
            Err(LoadError::NoDatabasesAvailable { reasons }) => assert_eq!(reasons.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(Arc::ptr_eq(&before, &registry.current()));
    }

    #[test]
    fn test_partial_load_publishes() {
        let dir = tempfile::tempdir().unwrap();
        write_edition(dir.path(), Edition::Asn);
        let registry = SnapshotRegistry::new(RegistryOptions::for_data_dir(dir.path()));

        let summary = registry.reload().unwrap();
        assert_eq!(summary.generation, 1);
        assert!(summary.asn.is_loaded());
        assert!(matches!(summary.city, SourceOutcome::Absent { .. }));

        let status = registry.status();
        assert_eq!(status.asn, SourceState::Loaded);
        assert_eq!(status.city, SourceState::Absent);
        assert_eq!(status.last_load_time, Some(summary.loaded_at));
    }

    #[test]
    fn test_unchanged_file_reuses_source() {
        let dir = tempfile::tempdir().unwrap();
        write_edition(dir.path(), Edition::Country);
        let registry = SnapshotRegistry::new(RegistryOptions::for_data_dir(dir.path()));

        registry.reload().unwrap();
        let first = registry.current();
        registry.reload().unwrap();
        let second = registry.current();

        assert_eq!(second.generation(), 2);
        assert!(Arc::ptr_eq(
            first.country().unwrap(),
            second.country().unwrap()
        ));
    }

    #[test]
    fn test_stale_source_retention() {
        for retain in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            write_edition(dir.path(), Edition::Country);
            write_edition(dir.path(), Edition::Asn);
            let mut options = RegistryOptions::for_data_dir(dir.path());
            options.retain_stale_sources = retain;
            let registry = SnapshotRegistry::new(options);
            registry.reload().unwrap();

            // Corrupt the Country file in place
            std::fs::write(dir.path().join(Edition::Country.default_file_name()), b"garbage")
                .unwrap();
            let summary = registry.reload().unwrap();

            if retain {
                assert!(matches!(summary.country, SourceOutcome::Retained { .. }));
                assert!(registry.current().country().is_some());
            } else {
                assert!(matches!(summary.country, SourceOutcome::Absent { .. }));
                assert!(registry.current().country().is_none());
            }
            assert!(summary.asn.is_loaded());
        }
    }

    #[test]
    fn test_reload_callback() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SnapshotRegistry::new(RegistryOptions::for_data_dir(dir.path()));
        let seen = Arc::new(AtomicU64::new(u64::MAX));
        let failures = Arc::new(AtomicU64::new(0));
        {
            let seen = Arc::clone(&seen);
            let failures = Arc::clone(&failures);
            registry.on_reload(move |event| {
                seen.store(event.generation, Ordering::SeqCst);
                if !event.success {
                    assert!(event.error.is_some());
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        assert!(registry.reload().is_err());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        write_edition(dir.path(), Edition::City);
        registry.reload().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_reload_coalesces() {
        let dir = tempfile::tempdir().unwrap();
        write_edition(dir.path(), Edition::City);
        let registry = SnapshotRegistry::new(RegistryOptions::for_data_dir(dir.path()));

        let held = registry.writer.lock().unwrap();
        assert!(registry.try_reload().is_none());
        drop(held);
        assert!(matches!(registry.try_reload(), Some(Ok(_))));
    }
}
