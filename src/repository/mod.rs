//! The note repository: the in-memory index over a folder of note files and
//! the only code path that mutates either.
//!
//! All index mutations run while holding the repository's mutation lock, so
//! saves, deletes, folder operations and scan commits are linearized. Scans
//! and body reads run on blocking workers and only touch the index when they
//! commit. Every read or write of a note file happens inside a
//! [`WriteCoordinator`] region and inside the capability scope.

pub mod coordinator;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::aggregate::{self, MetadataSummary};
use crate::capability::{resolve_root, CapabilityProvider, FolderGrantProvider, ScopedAccess};
use crate::config::{self, Config};
use crate::error::{RepoResult, RepositoryError};
use crate::frontmatter::HeaderCodec;
use crate::models::{
    file_stem_for_title, is_reserved_dir, make_preview, Note, DEFAULT_EXTENSION, NEW_NOTE_TITLE,
};
use crate::scanner::{DirectoryScanner, ScanOptions, ScanSnapshot};
use crate::search::{SearchEntry, SearchSink, SinkDispatcher};
use crate::watcher::defuse_conflict_marker;

pub use coordinator::WriteCoordinator;

/// A scan that keeps losing the race against saves commits after this many
/// attempts anyway.
const MAX_SCAN_ATTEMPTS: usize = 3;
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RepositoryEvent {
    IndexReloaded { note_count: usize },
    NoteSaved { id: Uuid },
    NoteDeleted { id: Uuid },
    NotebooksChanged,
    SyncConflict { conflict_path: PathBuf, original_path: PathBuf },
    BulkSync { syncing: bool, file_count: usize },
}

pub struct RepositoryOptions {
    pub root: PathBuf,
    pub scope: ScopedAccess,
    pub scan: ScanOptions,
    pub sink: Option<Arc<dyn SearchSink>>,
}

impl RepositoryOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RepositoryOptions {
            root: root.into(),
            scope: ScopedAccess::unrestricted(),
            scan: ScanOptions::default(),
            sink: None,
        }
    }

    /// Resolve the root from settings. A configured folder is used only when
    /// its capability can be acquired; otherwise the default root is used.
    pub fn from_config(config: &Config, provider: Option<&dyn CapabilityProvider>) -> Self {
        let default_root = config::default_root();
        let (root, scope) = match (&config.root, provider) {
            (_, Some(provider)) => resolve_root(Some(provider), &default_root),
            (Some(configured), None) => {
                let grant = FolderGrantProvider::new(configured.clone());
                resolve_root(Some(&grant as &dyn CapabilityProvider), &default_root)
            }
            (None, None) => (default_root, ScopedAccess::unrestricted()),
        };
        RepositoryOptions {
            root,
            scope,
            scan: config.scan_options(),
            sink: None,
        }
    }

    pub fn with_scope(mut self, scope: ScopedAccess) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_scan_options(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SearchSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

#[derive(Default)]
struct IndexState {
    notes: Vec<Note>,
    notebook_folders: Vec<String>,
    summary: MetadataSummary,
}

struct Inner {
    root: PathBuf,
    scope: ScopedAccess,
    scanner: DirectoryScanner,
    coordinator: WriteCoordinator,
    state: RwLock<IndexState>,
    mutation: Mutex<()>,
    /// Bumped by every committed save or delete.
    mutation_epoch: AtomicU64,
    scan_generation: AtomicU64,
    search_generation: AtomicU64,
    loading: AtomicUsize,
    sink: SinkDispatcher,
    events: broadcast::Sender<RepositoryEvent>,
}

/// Cheap to clone; clones share one index.
#[derive(Clone)]
pub struct NoteRepository {
    inner: Arc<Inner>,
}

struct LoadingGuard<'a>(&'a AtomicUsize);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl NoteRepository {
    /// Create the root folder if needed. The index starts empty; call
    /// [`load_metadata`](Self::load_metadata) to fill it.
    pub fn open(options: RepositoryOptions) -> RepoResult<Self> {
        let RepositoryOptions { root, scope, scan, sink } = options;
        scope.run(|| fs::create_dir_all(&root))?;
        log::info!("[repository] Opened {:?}", root);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(NoteRepository {
            inner: Arc::new(Inner {
                root,
                scope,
                scanner: DirectoryScanner::new(scan),
                coordinator: WriteCoordinator::new(),
                state: RwLock::new(IndexState::default()),
                mutation: Mutex::new(()),
                mutation_epoch: AtomicU64::new(0),
                scan_generation: AtomicU64::new(0),
                search_generation: AtomicU64::new(0),
                loading: AtomicUsize::new(0),
                sink: SinkDispatcher::new(sink),
                events,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn scan_options(&self) -> &ScanOptions {
        self.inner.scanner.options()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.inner.events.subscribe()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.read_state().notes.clone()
    }

    pub fn note(&self, id: Uuid) -> Option<Note> {
        self.read_state().notes.iter().find(|n| n.id == id).cloned()
    }

    pub fn summary(&self) -> MetadataSummary {
        self.read_state().summary.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::Acquire) > 0
    }

    /// Wait until pending search-sink updates have been delivered.
    pub fn flush_search_sink(&self, timeout: Duration) -> bool {
        self.inner.sink.flush(timeout)
    }

    pub fn shutdown(&self) {
        if !self.inner.sink.flush(Duration::from_secs(5)) {
            log::warn!("[repository] Search sink did not drain before shutdown");
        }
    }

    pub(crate) fn emit(&self, event: RepositoryEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn read_state(&self) -> RwLockReadGuard<'_, IndexState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_mutation(&self) -> MutexGuard<'_, ()> {
        self.inner.mutation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_summary(state: &mut IndexState) {
        state.summary = aggregate::recompute(&state.notes, &state.notebook_folders, Utc::now());
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Rescan the root on a blocking worker and merge the result.
    pub async fn load_metadata(&self) -> RepoResult<usize> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.reload()).await?
    }

    /// Synchronous rescan and merge. Returns the number of indexed notes, or
    /// `Cancelled` when a newer reload started while this one was scanning.
    pub fn reload(&self) -> RepoResult<usize> {
        let inner = &self.inner;
        let generation = inner.scan_generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.loading.fetch_add(1, Ordering::AcqRel);
        let _loading = LoadingGuard(&inner.loading);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let epoch = inner.mutation_epoch.load(Ordering::SeqCst);
            let snapshot = inner.scope.run(|| inner.scanner.scan(&inner.root));

            if inner.scan_generation.load(Ordering::SeqCst) != generation {
                log::debug!("[reload] Scan {} superseded, discarding", generation);
                return Err(RepositoryError::Cancelled);
            }

            let _mutation = self.lock_mutation();
            if inner.mutation_epoch.load(Ordering::SeqCst) != epoch && attempt < MAX_SCAN_ATTEMPTS {
                log::debug!("[reload] Index changed during scan {}, rescanning", generation);
                continue;
            }
            if inner.scan_generation.load(Ordering::SeqCst) != generation {
                return Err(RepositoryError::Cancelled);
            }
            return Ok(self.commit_snapshot(snapshot));
        }
    }

    /// Replace the index with a snapshot, keeping bodies already in memory.
    /// Caller holds the mutation lock.
    fn commit_snapshot(&self, snapshot: ScanSnapshot) -> usize {
        let ScanSnapshot {
            mut notes,
            notebook_folders,
            conflicts,
            skipped,
        } = snapshot;

        let (removed, entries, count) = {
            let mut state = self.write_state();
            let previous = std::mem::take(&mut state.notes);
            let previous_ids: HashSet<Uuid> = previous.iter().map(|n| n.id).collect();
            let mut bodies: HashMap<Uuid, String> = previous
                .into_iter()
                .filter_map(|n| n.body.map(|b| (n.id, b)))
                .collect();

            for note in &mut notes {
                if let Some(body) = bodies.remove(&note.id) {
                    note.body = Some(body);
                }
            }

            let current: HashSet<Uuid> = notes.iter().map(|n| n.id).collect();
            let removed: Vec<Uuid> = previous_ids.difference(&current).copied().collect();
            let entries: Vec<SearchEntry> = notes.iter().map(SearchEntry::from_note).collect();

            state.notes = notes;
            state.notebook_folders = notebook_folders;
            Self::refresh_summary(&mut state);
            (removed, entries, state.notes.len())
        };

        self.inner.sink.remove(removed);
        self.inner.sink.index(entries);

        for conflict in conflicts {
            log::warn!(
                "[reload] Sync conflict copy {:?} of {:?} is not indexed",
                conflict.conflict_path,
                conflict.original_path
            );
            self.emit(RepositoryEvent::SyncConflict {
                conflict_path: conflict.conflict_path,
                original_path: conflict.original_path,
            });
        }

        log::info!("[reload] Indexed {} notes ({} skipped)", count, skipped);
        self.emit(RepositoryEvent::IndexReloaded { note_count: count });
        count
    }

    /// Read and cache the full body of a note. Returns whether the note is
    /// loaded afterwards; failures are logged, not returned.
    pub async fn load_body(&self, id: Uuid) -> bool {
        let Some(note) = self.note(id) else {
            return false;
        };
        if note.is_loaded() {
            return true;
        }
        let Some(path) = note.location else {
            return false;
        };

        let repo = self.clone();
        let read_path = path.clone();
        match tokio::task::spawn_blocking(move || repo.read_body(&read_path)).await {
            Ok(Ok(body)) => self.cache_body(id, &path, body),
            Ok(Err(e)) => {
                log::warn!("[load_body] Failed to read {:?}: {}", path, e);
                false
            }
            Err(e) => {
                log::warn!("[load_body] Read task for {:?} failed: {}", path, e);
                false
            }
        }
    }

    /// Coordinated read of a note file's body (header stripped).
    fn read_body(&self, path: &Path) -> RepoResult<String> {
        let bytes = self
            .inner
            .scope
            .run(|| self.inner.coordinator.coordinate(&[path], || fs::read(path)))?;
        let text = String::from_utf8_lossy(&bytes);
        let (_, body) = HeaderCodec::decode(&text);
        Ok(body.to_string())
    }

    fn cache_body(&self, id: Uuid, path: &Path, body: String) -> bool {
        let _mutation = self.lock_mutation();
        let mut state = self.write_state();
        match state.notes.iter_mut().find(|n| n.id == id) {
            Some(note) if note.is_loaded() => true,
            Some(note) if note.location.as_deref() == Some(path) => {
                note.body = Some(body);
                true
            }
            _ => false,
        }
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Persist a note and update the index.
    ///
    /// The file name comes from the title and the folder from the lifecycle
    /// flags. A note that changes folder or title is moved, never copied.
    /// On failure the index is left unchanged.
    pub fn save(&self, note: Note) -> RepoResult<Note> {
        let _mutation = self.lock_mutation();
        self.save_locked(note)
    }

    fn save_locked(&self, note: Note) -> RepoResult<Note> {
        let stored = self.inner.scope.run(|| self.persist(note))?;
        self.inner.mutation_epoch.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.write_state();
            match state.notes.iter().position(|n| n.id == stored.id) {
                Some(pos) => state.notes[pos] = stored.clone(),
                None => state.notes.insert(0, stored.clone()),
            }
            if let Some(notebook) = &stored.notebook_name {
                if !state.notebook_folders.contains(notebook) {
                    state.notebook_folders.push(notebook.clone());
                    state.notebook_folders.sort();
                }
            }
            Self::refresh_summary(&mut state);
        }

        self.inner.sink.index(vec![SearchEntry::from_note(&stored)]);
        log::debug!("[save] {} -> {:?}", stored.id, stored.location);
        self.emit(RepositoryEvent::NoteSaved { id: stored.id });
        Ok(stored)
    }

    /// File work of a save. Runs inside the capability scope with the
    /// mutation lock held.
    fn persist(&self, mut note: Note) -> RepoResult<Note> {
        let root = &self.inner.root;
        let indexed_location = self.note(note.id).and_then(|n| n.location);
        let old_path = indexed_location.or_else(|| note.location.clone());

        if note.body.is_none() {
            let body = match &old_path {
                Some(path) if path.exists() => self.read_body(path)?,
                _ => String::new(),
            };
            note.body = Some(body);
        }

        if note.bucket().reserved_dir().is_some() {
            note.notebook_name = None;
        }
        if let Some(notebook) = &note.notebook_name {
            validate_notebook_name(notebook)?;
        }

        let folder = note.placement_folder(root);
        fs::create_dir_all(&folder).map_err(|e| {
            RepositoryError::Coordination(format!("create folder {:?}: {}", folder, e))
        })?;

        let extension = old_path
            .as_deref()
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .filter(|e| self.scan_options().extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string();
        let (stem, dest) = unique_destination(
            &folder,
            &defuse_conflict_marker(&file_stem_for_title(&note.title)),
            &extension,
            old_path.as_deref(),
        );
        note.title = stem;

        let attachment_moves: Vec<(PathBuf, PathBuf)> = match old_path.as_deref().and_then(Path::parent) {
            Some(old_folder) if old_folder != folder => note
                .attachments
                .iter()
                .filter(|name| is_plain_file_name(name))
                .map(|name| (old_folder.join(name), folder.join(name)))
                .filter(|(src, dst)| src.exists() && !dst.exists())
                .collect(),
            _ => Vec::new(),
        };

        let content = HeaderCodec::encode(&note);

        let mut paths: Vec<&Path> = vec![dest.as_path()];
        if let Some(old) = &old_path {
            paths.push(old.as_path());
        }
        for (src, dst) in &attachment_moves {
            paths.push(src.as_path());
            paths.push(dst.as_path());
        }

        self.inner.coordinator.coordinate(&paths, || -> RepoResult<()> {
            if let Some(old) = &old_path {
                if *old != dest && old.exists() {
                    fs::rename(old, &dest).map_err(|e| {
                        RepositoryError::Coordination(format!("move {:?} -> {:?}: {}", old, dest, e))
                    })?;
                }
            }
            crate::atomic_write_file(&dest, content.as_bytes()).map_err(RepositoryError::Coordination)?;

            for (src, dst) in &attachment_moves {
                if let Err(e) = fs::rename(src, dst) {
                    log::warn!("[save] Failed to move attachment {:?} -> {:?}: {}", src, dst, e);
                }
            }
            Ok(())
        })?;

        let body = note.body.as_deref().unwrap_or("");
        note.preview = make_preview(body, self.scan_options().preview_chars);
        note.updated_at = Utc::now();
        note.location = Some(dest);
        Ok(note)
    }

    /// Permanently remove a note file, its attachment files, and its index
    /// entry.
    pub fn delete(&self, id: Uuid) -> RepoResult<()> {
        let _mutation = self.lock_mutation();
        let note = self
            .note(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        if let Some(path) = &note.location {
            let attachment_paths = self.owned_attachment_paths(&note, path);
            let mut paths: Vec<&Path> = vec![path.as_path()];
            paths.extend(attachment_paths.iter().map(|p| p.as_path()));

            self.inner.scope.run(|| {
                self.inner.coordinator.coordinate(&paths, || -> RepoResult<()> {
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            log::debug!("[delete] {:?} already gone", path);
                        }
                        Err(e) => {
                            return Err(RepositoryError::Coordination(format!(
                                "remove {:?}: {}",
                                path, e
                            )))
                        }
                    }
                    for attachment in &attachment_paths {
                        match fs::remove_file(attachment) {
                            Ok(()) => log::debug!("[delete] Removed attachment {:?}", attachment),
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => log::warn!("[delete] Failed to remove attachment {:?}: {}", attachment, e),
                        }
                    }
                    Ok(())
                })
            })?;
        }

        self.inner.mutation_epoch.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.write_state();
            state.notes.retain(|n| n.id != id);
            Self::refresh_summary(&mut state);
        }
        self.inner.sink.remove(vec![id]);
        log::info!("[delete] Removed note {}", id);
        self.emit(RepositoryEvent::NoteDeleted { id });
        Ok(())
    }

    /// Attachment files next to `path` that no other note in the same
    /// folder lists.
    fn owned_attachment_paths(&self, note: &Note, path: &Path) -> Vec<PathBuf> {
        let Some(folder) = path.parent() else {
            return Vec::new();
        };
        let shared: HashSet<String> = self
            .read_state()
            .notes
            .iter()
            .filter(|other| other.id != note.id)
            .filter(|other| other.location.as_deref().and_then(Path::parent) == Some(folder))
            .flat_map(|other| other.attachments.iter().cloned())
            .collect();

        note.attachments
            .iter()
            .filter(|name| is_plain_file_name(name) && !shared.contains(*name))
            .map(|name| folder.join(name))
            .collect()
    }

    /// Create and save an empty note, optionally inside a notebook.
    pub fn add_note(&self, notebook: Option<&str>) -> RepoResult<Uuid> {
        let notebook = notebook
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        let note = Note::new(NEW_NOTE_TITLE, notebook);
        Ok(self.save(note)?.id)
    }

    /// Save a copy with a fresh id. The source body is loaded first; a copy
    /// is never written with an empty stand-in body.
    pub async fn duplicate(&self, id: Uuid) -> RepoResult<Uuid> {
        if self.note(id).is_none() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        if !self.load_body(id).await {
            return Err(RepositoryError::Io(format!("could not load body of {}", id)));
        }
        let source = self
            .note(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        let now = Utc::now();
        let mut copy = source.clone();
        copy.id = Uuid::new_v4();
        copy.title = format!("{} Copy", source.title);
        copy.pinned = false;
        copy.reminders.clear();
        copy.location = None;
        copy.created_at = now;
        copy.updated_at = now;
        Ok(self.save(copy)?.id)
    }

    /// Load, modify and save one note under the mutation lock.
    fn update(&self, id: Uuid, f: impl FnOnce(&mut Note)) -> RepoResult<Note> {
        let _mutation = self.lock_mutation();
        let mut note = self
            .note(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        f(&mut note);
        self.save_locked(note)
    }

    pub fn set_archived(&self, id: Uuid, archived: bool) -> RepoResult<Note> {
        self.update(id, |n| n.flags.archived = archived)
    }

    pub fn set_hidden(&self, id: Uuid, hidden: bool) -> RepoResult<Note> {
        self.update(id, |n| n.flags.hidden = hidden)
    }

    /// Soft delete: the note moves to the trash folder and can be restored.
    pub fn move_to_trash(&self, id: Uuid) -> RepoResult<Note> {
        self.update(id, |n| n.flags.deleted = true)
    }

    pub fn restore(&self, id: Uuid) -> RepoResult<Note> {
        self.update(id, |n| n.flags.deleted = false)
    }

    pub fn set_pinned(&self, id: Uuid, pinned: bool) -> RepoResult<Note> {
        self.update(id, |n| n.pinned = pinned)
    }

    pub fn set_color(&self, id: Uuid, color: Option<String>) -> RepoResult<Note> {
        self.update(id, |n| n.color = color.filter(|c| !c.trim().is_empty()))
    }

    pub fn rename(&self, id: Uuid, title: &str) -> RepoResult<Note> {
        self.update(id, |n| n.title = title.to_string())
    }

    pub fn move_to_notebook(&self, id: Uuid, notebook: Option<&str>) -> RepoResult<Note> {
        let notebook = notebook
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if let Some(name) = &notebook {
            validate_notebook_name(name)?;
        }
        self.update(id, |n| n.notebook_name = notebook)
    }

    pub fn toggle_tag(&self, id: Uuid, tag: &str) -> RepoResult<Note> {
        self.update(id, |n| n.toggle_tag(tag))
    }

    pub fn add_reminder(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<Note> {
        self.update(id, |n| {
            if !n.reminders.contains(&at) {
                n.reminders.push(at);
                n.reminders.sort();
            }
        })
    }

    /// Copy `source` next to the note and list it as an attachment. Returns
    /// the stored file name.
    pub fn import_attachment(&self, id: Uuid, source: &Path) -> RepoResult<String> {
        let _mutation = self.lock_mutation();
        let mut note = self
            .note(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        let folder = note
            .location
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .ok_or_else(|| RepositoryError::NotFound(format!("note {} has no file yet", id)))?;
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| is_plain_file_name(n))
            .ok_or_else(|| RepositoryError::InvalidName(source.display().to_string()))?;

        let target = resolve_collision(&folder.join(&file_name));
        self.inner.scope.run(|| {
            self.inner.coordinator.coordinate(&[target.as_path()], || {
                fs::copy(source, &target).map_err(|e| {
                    RepositoryError::Coordination(format!("copy {:?} -> {:?}: {}", source, target, e))
                })
            })
        })?;

        let stored_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or(file_name);
        note.attachments.push(stored_name.clone());
        self.save_locked(note)?;
        Ok(stored_name)
    }

    /// Permanently delete every soft-deleted note. Returns how many were
    /// removed; individual failures are logged and skipped.
    pub fn empty_trash(&self) -> RepoResult<usize> {
        let ids: Vec<Uuid> = self
            .read_state()
            .notes
            .iter()
            .filter(|n| n.flags.deleted)
            .map(|n| n.id)
            .collect();
        let mut removed = 0;
        for id in ids {
            match self.delete(id) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("[empty_trash] Failed to delete {}: {}", id, e),
            }
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------------
    // Notebooks
    // ---------------------------------------------------------------------

    pub async fn add_notebook(&self, name: &str) -> RepoResult<()> {
        let name = name.trim();
        validate_notebook_name(name)?;
        let folder = self.inner.root.join(name);
        self.inner.scope.run(|| fs::create_dir_all(&folder))?;
        log::info!("[notebook] Created {:?}", folder);
        self.emit(RepositoryEvent::NotebooksChanged);
        self.reload_after_folder_change().await
    }

    /// Remove a notebook folder together with every file inside it.
    pub async fn delete_notebook(&self, name: &str) -> RepoResult<()> {
        let name = name.trim();
        validate_notebook_name(name)?;
        let folder = self.inner.root.join(name);

        {
            let _mutation = self.lock_mutation();
            if !self.inner.scope.run(|| folder.is_dir()) {
                return Err(RepositoryError::NotFound(format!("notebook {}", name)));
            }
            let note_paths: Vec<PathBuf> = self
                .read_state()
                .notes
                .iter()
                .filter_map(|n| n.location.clone())
                .filter(|p| p.parent() == Some(folder.as_path()))
                .collect();
            let paths: Vec<&Path> = note_paths.iter().map(|p| p.as_path()).collect();
            self.inner.scope.run(|| {
                self.inner.coordinator.coordinate(&paths, || fs::remove_dir_all(&folder))
            })?;
            self.inner.mutation_epoch.fetch_add(1, Ordering::SeqCst);
        }

        log::info!("[notebook] Deleted {:?}", folder);
        self.emit(RepositoryEvent::NotebooksChanged);
        self.reload_after_folder_change().await
    }

    async fn reload_after_folder_change(&self) -> RepoResult<()> {
        match self.load_metadata().await {
            Ok(_) => Ok(()),
            // A newer reload already covers this change.
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ---------------------------------------------------------------------
    // Search
    // ---------------------------------------------------------------------

    /// Case-insensitive substring search over title, preview and body. Notes
    /// whose body is not loaded are read from disk for the match without
    /// caching. A newer search cancels this one.
    pub async fn deep_search(&self, query: &str) -> RepoResult<Vec<Uuid>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let needle = query.to_lowercase();
        let generation = self.inner.search_generation.fetch_add(1, Ordering::SeqCst) + 1;

        let candidates: Vec<(Uuid, String, Option<String>, Option<PathBuf>)> = self
            .read_state()
            .notes
            .iter()
            .map(|n| {
                (
                    n.id,
                    format!("{}\n{}", n.title, n.preview).to_lowercase(),
                    n.body.clone(),
                    n.location.clone(),
                )
            })
            .collect();

        let repo = self.clone();
        tokio::task::spawn_blocking(move || {
            let inner = &repo.inner;
            let superseded = || inner.search_generation.load(Ordering::SeqCst) != generation;

            let matches: Vec<Uuid> = candidates
                .par_iter()
                .filter_map(|(id, heading, body, location)| {
                    if superseded() {
                        return None;
                    }
                    if heading.contains(&needle) {
                        return Some(*id);
                    }
                    let found = match (body, location) {
                        (Some(body), _) => body.to_lowercase().contains(&needle),
                        (None, Some(path)) => match repo.read_body(path) {
                            Ok(body) => body.to_lowercase().contains(&needle),
                            Err(e) => {
                                log::debug!("[deep_search] Skipping {:?}: {}", path, e);
                                false
                            }
                        },
                        (None, None) => false,
                    };
                    found.then_some(*id)
                })
                .collect();

            if superseded() {
                Err(RepositoryError::Cancelled)
            } else {
                Ok(matches)
            }
        })
        .await?
    }
}

/// Notebook names become folder names directly under the root.
pub fn validate_notebook_name(name: &str) -> RepoResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RepositoryError::InvalidName("notebook name is empty".to_string()));
    }
    if trimmed.starts_with('.') || is_reserved_dir(trimmed) {
        return Err(RepositoryError::InvalidName(format!("{} is reserved", trimmed)));
    }
    if trimmed.contains(['/', '\\']) || trimmed.contains('\0') {
        return Err(RepositoryError::InvalidName(format!("{} contains a path separator", trimmed)));
    }
    Ok(())
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// `<folder>/<stem>.<ext>`, or `<stem> 2.<ext>`, `<stem> 3.<ext>`, ... when
/// another file already holds the name. The note's own file never counts as
/// a collision.
fn unique_destination(folder: &Path, stem: &str, extension: &str, own: Option<&Path>) -> (String, PathBuf) {
    let is_free = |candidate: &Path| {
        !candidate.exists() || own.map_or(false, |own| own == candidate || same_file(own, candidate))
    };

    let first = folder.join(format!("{}.{}", stem, extension));
    if is_free(&first) {
        return (stem.to_string(), first);
    }
    let mut counter = 2;
    loop {
        let candidate_stem = format!("{} {}", stem, counter);
        let candidate = folder.join(format!("{}.{}", candidate_stem, extension));
        if is_free(&candidate) {
            return (candidate_stem, candidate);
        }
        counter += 1;
    }
}

/// `name_1.ext`, `name_2.ext`, ... for a target that already exists.
fn resolve_collision(target: &Path) -> PathBuf {
    if !target.exists() {
        return target.to_path_buf();
    }
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = target.extension().map(|e| e.to_string_lossy().to_string());
    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    let mut counter = 1;
    loop {
        let new_name = match &ext {
            Some(e) => format!("{}_{}.{}", stem, counter, e),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = parent.join(&new_name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
