//! Background reload scheduling
//!
//! A dedicated thread reloads the registry on a fixed interval and,
//! optionally, shortly after the database files change on disk. File
//! events are debounced: the reload runs once events have been quiet for
//! the debounce period, so a multi-step replace triggers a single reload.

use crate::registry::SnapshotRegistry;
use crossbeam_channel::{after, never, select, tick, unbounded, Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Quiet period after the last file event before reloading
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// When the scheduler reloads
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Periodic reload interval; `None` disables the timer
    pub interval: Option<Duration>,
    /// Reload when the watched database files change
    pub watch: bool,
    /// Quiet period for file events
    pub debounce: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(3600)),
            watch: false,
            debounce: DEBOUNCE,
        }
    }
}

/// Handle to the reload thread; dropping it stops the thread
pub struct ReloadScheduler {
    shutdown_tx: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    // Kept alive for as long as events should flow
    _watcher: Option<RecommendedWatcher>,
}

impl ReloadScheduler {
    /// Spawn the reload thread for `registry`
    ///
    /// When file watching cannot be set up (for example the data directory
    /// does not exist yet) the scheduler logs a warning and runs on the
    /// timer alone.
    pub fn start(registry: Arc<SnapshotRegistry>, options: SchedulerOptions) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let (watcher, fs_rx) = if options.watch {
            match watch_database_files(&registry) {
                Ok((watcher, rx)) => (Some(watcher), rx),
                Err(e) => {
                    warn!(error = %e, "file watching unavailable, relying on the reload interval");
                    (None, never())
                }
            }
        } else {
            (None, never())
        };

        let files = database_file_names(&registry);
        let handle = thread::Builder::new()
            .name("geoscope-reload".to_string())
            .spawn(move || run(registry, options, shutdown_rx, fs_rx, files))?;

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
            _watcher: watcher,
        })
    }
}

impl Drop for ReloadScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

type FsEvents = Receiver<notify::Result<Event>>;

fn run(
    registry: Arc<SnapshotRegistry>,
    options: SchedulerOptions,
    shutdown_rx: Receiver<()>,
    mut fs_rx: FsEvents,
    files: HashSet<OsString>,
) {
    let ticker = options.interval.map(tick).unwrap_or_else(never);
    let mut last_event: Option<Instant> = None;

    loop {
        let debounce = match last_event {
            Some(at) => after(options.debounce.saturating_sub(at.elapsed())),
            None => never(),
        };

        select! {
            recv(shutdown_rx) -> _ => break,
            recv(ticker) -> _ => {
                debug!("interval reload");
                reload(&registry);
            }
            recv(fs_rx) -> event => match event {
                Ok(Ok(event)) => {
                    if touches_database_file(&event, &files) {
                        last_event = Some(Instant::now());
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "file watcher error"),
                Err(_) => fs_rx = never(),
            },
            recv(debounce) -> _ => {
                debug!("database files changed");
                // A reload already running may have opened the old files
                last_event = if reload(&registry) { None } else { Some(Instant::now()) };
            }
        }
    }
    debug!("reload scheduler stopped");
}

/// Run a reload unless one is already in progress; true when it ran
fn reload(registry: &SnapshotRegistry) -> bool {
    match registry.try_reload() {
        Some(Ok(summary)) => debug!(generation = summary.generation, "scheduled reload finished"),
        Some(Err(e)) => warn!(error = %e, "scheduled reload failed"),
        None => return false,
    }
    true
}

fn watch_database_files(
    registry: &SnapshotRegistry,
) -> notify::Result<(RecommendedWatcher, FsEvents)> {
    let (fs_tx, fs_rx) = unbounded();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = fs_tx.send(res);
    })?;

    // Watch directories, not files: updaters replace files by rename
    let mut dirs: Vec<PathBuf> = registry
        .options()
        .paths()
        .filter_map(|path| path.parent().map(Path::to_path_buf))
        .map(|dir| if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir })
        .collect();
    dirs.sort();
    dirs.dedup();

    for dir in &dirs {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching for database updates");
    }
    Ok((watcher, fs_rx))
}

fn database_file_names(registry: &SnapshotRegistry) -> HashSet<OsString> {
    registry
        .options()
        .paths()
        .filter_map(|path| path.file_name().map(|name| name.to_os_string()))
        .collect()
}

fn touches_database_file(event: &Event, files: &HashSet<OsString>) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .filter_map(|path| path.file_name())
        .any(|name| files.contains(name))
}
