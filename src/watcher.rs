//! Folder watcher that keeps the index in step with changes made by other
//! processes and sync clients.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::error::{RepoResult, RepositoryError};
use crate::models::is_reserved_dir;
use crate::repository::{NoteRepository, RepositoryEvent};

/// Suffix of the temporary file an atomic write renames into place.
pub const TEMP_SUFFIX: &str = ".quillpad-tmp";

const BURST_THRESHOLD: usize = 10;
const BURST_WINDOW: Duration = Duration::from_secs(2);

static CONFLICT_MARKER: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \ \((?:SynologyDrive|Synology)\ conflict[^)]*\)   # Synology Drive
        | \ \([^)]*conflicted\ copy[^)]*\)               # Dropbox, Nextcloud
        | \.sync-conflict-[0-9]{8}-[0-9]{6}(?:-[A-Z0-9]+)?  # Syncthing
        ",
    )
    .map_err(|e| log::error!("[Watcher] Invalid conflict pattern: {}", e))
    .ok()
});

pub fn is_temp_file(file_name: &str) -> bool {
    file_name.ends_with(TEMP_SUFFIX)
}

/// Whether a file name looks like a sync client's conflict copy, e.g.
///   "notes (SynologyDrive Conflict 2024-01-01).md"
///   "notes (Jane's conflicted copy 2024-01-01).md"
///   "notes.sync-conflict-20240101-120000-ABCDEFG.md"
pub fn is_sync_conflict_file(file_name: &str) -> bool {
    CONFLICT_MARKER.as_ref().map_or(false, |re| re.is_match(file_name))
}

/// Rewrite a file stem so it no longer reads as a conflict copy. The
/// separator in front of each marker becomes `_`, e.g.
/// "Plan (my conflicted copy)" -> "Plan_(my conflicted copy)".
pub fn defuse_conflict_marker(stem: &str) -> String {
    let Some(re) = CONFLICT_MARKER.as_ref() else {
        return stem.to_string();
    };
    let mut out = stem.to_string();
    // Each pass removes at least one marker separator.
    while re.is_match(&out) {
        out = re
            .replace_all(&out, |caps: &regex::Captures| format!("_{}", &caps[0][1..]))
            .to_string();
    }
    out
}

/// Path of the file a conflict copy was split from.
pub fn original_from_conflict(conflict_path: &Path) -> Option<PathBuf> {
    let file_name = conflict_path.file_name()?.to_string_lossy().to_string();
    let original_name = CONFLICT_MARKER.as_ref()?.replace(&file_name, "").to_string();
    if original_name == file_name || original_name.is_empty() {
        return None;
    }
    conflict_path.parent().map(|p| p.join(original_name))
}

/// Paths whose changes can affect the index: note files with an accepted
/// extension and folder-like paths, at any depth the scanner looks at.
/// Hidden paths are skipped except the reserved folders directly under the
/// root.
pub fn should_process_path(path: &Path, root: &Path, extensions: &[String]) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let names: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    let Some(file_name) = names.last() else {
        return false;
    };
    if is_temp_file(file_name) {
        return false;
    }
    for (depth, name) in names.iter().enumerate() {
        if name.starts_with('.') && !(depth == 0 && is_reserved_dir(name)) {
            return false;
        }
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)),
        None => true,
    }
}

/// What the watcher loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceOutcome {
    Idle,
    Waiting,
    Fire { burst_ended: bool },
}

/// Restart-on-event timer with burst detection. Time is passed in so the
/// behavior can be driven without sleeping.
#[derive(Debug)]
pub struct Debouncer {
    debounce: Duration,
    burst_debounce: Duration,
    last_event: Option<Instant>,
    window_start: Instant,
    window_count: usize,
    in_burst: bool,
}

impl Debouncer {
    pub fn new(debounce: Duration, burst_debounce: Duration, now: Instant) -> Self {
        Debouncer {
            debounce,
            burst_debounce,
            last_event: None,
            window_start: now,
            window_count: 0,
            in_burst: false,
        }
    }

    pub fn in_burst(&self) -> bool {
        self.in_burst
    }

    /// Record `paths` relevant paths. Returns the burst size when this event
    /// starts a burst.
    pub fn record(&mut self, paths: usize, now: Instant) -> Option<usize> {
        if now.duration_since(self.window_start) > BURST_WINDOW {
            self.window_start = now;
            self.window_count = 0;
        }
        self.window_count += paths;
        self.last_event = Some(now);

        if self.window_count > BURST_THRESHOLD && !self.in_burst {
            self.in_burst = true;
            return Some(self.window_count);
        }
        None
    }

    pub fn poll(&mut self, now: Instant) -> DebounceOutcome {
        let Some(last) = self.last_event else {
            return DebounceOutcome::Idle;
        };
        let effective = if self.in_burst { self.burst_debounce } else { self.debounce };
        if now.duration_since(last) < effective {
            return DebounceOutcome::Waiting;
        }

        self.last_event = None;
        self.window_count = 0;
        self.window_start = now;
        let burst_ended = std::mem::replace(&mut self.in_burst, false);
        DebounceOutcome::Fire { burst_ended }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerOptions {
    pub debounce: Duration,
    pub burst_debounce: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        ReconcilerOptions {
            debounce: Duration::from_millis(500),
            burst_debounce: Duration::from_secs(2),
        }
    }
}

impl ReconcilerOptions {
    pub fn from_config(config: &Config) -> Self {
        ReconcilerOptions {
            debounce: Duration::from_millis(config.debounce_ms),
            burst_debounce: Duration::from_millis(config.burst_debounce_ms.max(config.debounce_ms)),
        }
    }
}

/// Watches the repository root and reloads the index once changes settle.
/// Dropping it stops the watcher and joins its thread.
pub struct ChangeReconciler {
    watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ChangeReconciler {
    pub fn start(repository: NoteRepository, options: ReconcilerOptions) -> RepoResult<Self> {
        let root = repository.root().to_path_buf();
        let extensions = repository.scan_options().extensions.clone();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            tx,
            notify::Config::default().with_poll_interval(Duration::from_millis(300)),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        log::info!("[Watcher] Watching {:?}", root);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let tick = (options.debounce / 2).clamp(Duration::from_millis(20), Duration::from_millis(250));

        let worker = thread::Builder::new()
            .name("quillpad-watcher".to_string())
            .spawn(move || {
                let mut debouncer = Debouncer::new(options.debounce, options.burst_debounce, Instant::now());

                while !stop_flag.load(Ordering::Acquire) {
                    match rx.recv_timeout(tick) {
                        Ok(Ok(event)) => {
                            // Reads by the scanner itself show up as access events.
                            if matches!(event.kind, EventKind::Access(_)) {
                                continue;
                            }
                            let relevant: Vec<&PathBuf> = event
                                .paths
                                .iter()
                                .filter(|p| should_process_path(p, &root, &extensions))
                                .collect();
                            if relevant.is_empty() {
                                continue;
                            }
                            for path in &relevant {
                                let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                                if is_sync_conflict_file(&name) {
                                    log::debug!("[Watcher] Conflict copy changed: {}", path.display());
                                }
                            }
                            if let Some(file_count) = debouncer.record(relevant.len(), Instant::now()) {
                                log::info!("[Watcher] Bulk sync detected ({} paths)", file_count);
                                repository.emit(RepositoryEvent::BulkSync { syncing: true, file_count });
                            }
                        }
                        Ok(Err(e)) => {
                            log::warn!("[Watcher] File watcher error: {}", e);
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }

                    if let DebounceOutcome::Fire { burst_ended } = debouncer.poll(Instant::now()) {
                        match repository.reload() {
                            Ok(count) => log::debug!("[Watcher] Reloaded {} notes", count),
                            Err(RepositoryError::Cancelled) => {
                                log::debug!("[Watcher] Reload superseded by a newer one")
                            }
                            Err(e) => log::warn!("[Watcher] Reload failed: {}", e),
                        }
                        if burst_ended {
                            repository.emit(RepositoryEvent::BulkSync { syncing: false, file_count: 0 });
                        }
                    }
                }
                log::debug!("[Watcher] Stopped");
            })?;

        Ok(ChangeReconciler {
            watcher: Some(watcher),
            stop,
            worker: Some(worker),
        })
    }
}

impl Drop for ChangeReconciler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        drop(self.watcher.take());
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("[Watcher] Watcher thread panicked");
            }
        }
    }
}
