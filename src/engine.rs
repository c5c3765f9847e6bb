//! Engine facade
//!
//! [`GeoEngine`] wires the configuration, registry, reload scheduler and
//! the lookup/network/health components together.
//!
//! ```no_run
//! use geoscope::{EngineConfig, GeoEngine};
//!
//! let config = EngineConfig::default().with_data_dir("/geoip-data");
//! let engine = GeoEngine::new(config).unwrap();
//!
//! match engine.lookup("8.8.8.8") {
//!     Ok(record) => println!("{:?}", record.country_code),
//!     Err(e) if e.is_retryable() => eprintln!("try again later: {}", e),
//!     Err(e) => eprintln!("{}", e),
//! }
//! ```

use crate::config::EngineConfig;
use crate::error::{LoadError, LookupError};
use crate::health::{HealthReporter, HealthStatus};
use crate::lookup::LookupOrchestrator;
use crate::network::NetworkResolver;
use crate::record::{GeoRecord, NetworkRecord};
use crate::registry::{LoadSummary, ReloadEvent, SnapshotRegistry};
use crate::snapshot::DatabaseSnapshot;
use crate::watcher::ReloadScheduler;
use std::sync::Arc;
use tracing::{info, warn};

/// The resolution engine
pub struct GeoEngine {
    config: EngineConfig,
    registry: Arc<SnapshotRegistry>,
    lookups: LookupOrchestrator,
    networks: NetworkResolver,
    health: HealthReporter,
    _scheduler: Option<ReloadScheduler>,
}

impl GeoEngine {
    /// Build the engine, load whatever databases exist, and start the
    /// reload scheduler
    ///
    /// Missing databases are not an error: the engine reports
    /// `Unavailable` until a later reload finds them.
    pub fn new(config: EngineConfig) -> std::io::Result<Self> {
        Self::build(config, None::<fn(ReloadEvent)>)
    }

    /// Like [`new`](Self::new), with a callback invoked after every reload
    /// attempt, the initial one included
    pub fn with_reload_callback<F>(config: EngineConfig, callback: F) -> std::io::Result<Self>
    where
        F: Fn(ReloadEvent) + Send + Sync + 'static,
    {
        Self::build(config, Some(callback))
    }

    fn build<F>(config: EngineConfig, callback: Option<F>) -> std::io::Result<Self>
    where
        F: Fn(ReloadEvent) + Send + Sync + 'static,
    {
        let registry = Arc::new(SnapshotRegistry::new(config.registry_options()));
        if let Some(callback) = callback {
            registry.on_reload(callback);
        }

        match registry.reload() {
            Ok(summary) => info!(
                generation = summary.generation,
                data_dir = %config.data_dir.display(),
                "databases loaded"
            ),
            Err(e) => warn!(error = %e, "waiting for database files"),
        }

        let scheduler = match config.scheduler_options() {
            Some(options) => Some(ReloadScheduler::start(Arc::clone(&registry), options)?),
            None => None,
        };

        Ok(Self {
            lookups: LookupOrchestrator::new(Arc::clone(&registry), config.locales.clone()),
            networks: NetworkResolver::new(Arc::clone(&registry)),
            health: HealthReporter::new(Arc::clone(&registry)),
            registry,
            config,
            _scheduler: scheduler,
        })
    }

    /// Geolocate one address
    pub fn lookup(&self, text: &str) -> Result<GeoRecord, LookupError> {
        self.lookups.lookup(text)
    }

    /// Geolocate several addresses against one snapshot
    pub fn lookup_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Result<GeoRecord, LookupError>> {
        self.lookups.lookup_batch(texts)
    }

    /// Most specific network containing an address
    pub fn resolve_network(&self, text: &str) -> Result<NetworkRecord, LookupError> {
        self.networks.resolve_network(text)
    }

    /// Reload the databases now
    pub fn reload(&self) -> Result<LoadSummary, LoadError> {
        self.registry.reload()
    }

    /// Current health
    pub fn report(&self) -> HealthStatus {
        self.health.report()
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<DatabaseSnapshot> {
        self.registry.current()
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying registry
    pub fn registry(&self) -> &Arc<SnapshotRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Overall;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet_config(dir: &std::path::Path) -> EngineConfig {
        let mut config = EngineConfig::default().with_data_dir(dir);
        config.reload_interval_secs = 0;
        config
    }

    #[test]
    fn test_starts_without_databases() {
        let dir = tempfile::tempdir().unwrap();
        let engine = GeoEngine::new(quiet_config(dir.path())).unwrap();

        let health = engine.report();
        assert_eq!(health.overall, Overall::Unavailable);
        assert_eq!(health.message, "Waiting for database files");
        assert!(engine.lookup("8.8.8.8").unwrap_err().is_retryable());
        assert!(engine.reload().is_err());
        assert_eq!(engine.snapshot().generation(), 0);
    }

    #[test]
    fn test_initial_reload_reaches_callback() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let _engine = GeoEngine::with_reload_callback(quiet_config(dir.path()), move |event| {
            assert!(!event.success);
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
