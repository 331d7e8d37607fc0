//! Builds an index snapshot from the files under a repository root.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use walkdir::{DirEntry, WalkDir};

use crate::frontmatter::HeaderCodec;
use crate::identity;
use crate::models::{make_preview, LifecycleFlags, Note, ARCHIVE_DIR, HIDDEN_DIR, TRASH_DIR};
use crate::watcher::{is_sync_conflict_file, is_temp_file, original_from_conflict};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub extensions: Vec<String>,
    /// Bytes read per file for header and preview.
    pub prefix_bytes: usize,
    /// Upper bound when the header block is longer than the prefix.
    pub max_header_bytes: usize,
    pub preview_chars: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            extensions: vec!["md".to_string(), "txt".to_string()],
            prefix_bytes: 2048,
            max_header_bytes: 64 * 1024,
            preview_chars: 150,
        }
    }
}

impl ScanOptions {
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Zone {
    Root,
    Archive,
    Trash,
    Hidden,
}

impl Zone {
    fn forced_flags(&self) -> LifecycleFlags {
        LifecycleFlags {
            archived: *self == Zone::Archive,
            deleted: *self == Zone::Trash,
            hidden: *self == Zone::Hidden,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConflict {
    pub conflict_path: PathBuf,
    pub original_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ScanSnapshot {
    pub notes: Vec<Note>,
    /// User folders at depth 1, including empty ones.
    pub notebook_folders: Vec<String>,
    pub conflicts: Vec<SyncConflict>,
    pub skipped: usize,
}

pub struct DirectoryScanner {
    options: ScanOptions,
}

impl DirectoryScanner {
    pub fn new(options: ScanOptions) -> Self {
        DirectoryScanner { options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn scan(&self, root: &Path) -> ScanSnapshot {
        let started = std::time::Instant::now();
        let mut snapshot = ScanSnapshot::default();
        let mut candidates: Vec<(PathBuf, Zone)> = Vec::new();

        let zones = [
            (root.to_path_buf(), Zone::Root, 2),
            (root.join(ARCHIVE_DIR), Zone::Archive, 1),
            (root.join(TRASH_DIR), Zone::Trash, 1),
            (root.join(HIDDEN_DIR), Zone::Hidden, 1),
        ];

        for (dir, zone, depth) in zones {
            if !dir.is_dir() {
                continue;
            }
            let mut files = Vec::new();
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(depth)
                .into_iter()
                .filter_entry(|e| !is_hidden(e))
            {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("[scanner] Skipping unreadable entry: {}", e);
                        snapshot.skipped += 1;
                        continue;
                    }
                };
                let path = entry.path();
                if entry.file_type().is_dir() {
                    if zone == Zone::Root && entry.depth() == 1 {
                        snapshot
                            .notebook_folders
                            .push(entry.file_name().to_string_lossy().to_string());
                    }
                    continue;
                }
                if !self.options.accepts(path) {
                    continue;
                }
                let file_name = entry.file_name().to_string_lossy();
                if is_temp_file(&file_name) {
                    continue;
                }
                if is_sync_conflict_file(&file_name) {
                    if let Some(original_path) = original_from_conflict(path) {
                        snapshot.conflicts.push(SyncConflict {
                            conflict_path: path.to_path_buf(),
                            original_path,
                        });
                    }
                    continue;
                }
                files.push(path.to_path_buf());
            }
            files.sort();
            candidates.extend(files.into_iter().map(|p| (p, zone)));
        }

        let parsed: Vec<Result<Note, String>> = candidates
            .par_iter()
            .map(|(path, zone)| self.read_note(root, path, *zone))
            .collect();

        let mut seen = HashSet::new();
        for (result, (path, _)) in parsed.into_iter().zip(candidates.iter()) {
            match result {
                Ok(note) => {
                    if seen.insert(note.id) {
                        snapshot.notes.push(note);
                    } else {
                        log::warn!(
                            "[scanner] Duplicate id {} at {:?}, keeping the first file",
                            note.id, path
                        );
                        snapshot.skipped += 1;
                    }
                }
                Err(e) => {
                    log::warn!("[scanner] Skipping {:?}: {}", path, e);
                    snapshot.skipped += 1;
                }
            }
        }

        snapshot.notebook_folders.sort();
        log::debug!(
            "[scanner] Scanned {:?}: {} notes, {} skipped, {} conflicts in {:?}",
            root,
            snapshot.notes.len(),
            snapshot.skipped,
            snapshot.conflicts.len(),
            started.elapsed()
        );
        snapshot
    }

    fn read_note(&self, root: &Path, path: &Path, zone: Zone) -> Result<Note, String> {
        let metadata = fs::metadata(path).map_err(|e| e.to_string())?;
        let text = read_prefix(path, self.options.prefix_bytes, self.options.max_header_bytes)
            .map_err(|e| e.to_string())?;
        let (fields, body) = HeaderCodec::decode(&text);

        let relative = identity::relative_path(root, path);
        let id = identity::resolve(&fields, &relative);

        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let notebook_name = match zone {
            Zone::Root => path
                .parent()
                .filter(|parent| *parent != root)
                .and_then(|parent| parent.file_name())
                .map(|name| name.to_string_lossy().to_string()),
            _ => None,
        };

        let forced = zone.forced_flags();
        let flags = LifecycleFlags {
            archived: forced.archived || fields.archived,
            deleted: forced.deleted || fields.is_deleted(),
            hidden: forced.hidden || fields.hidden,
        };

        let updated_at = metadata
            .modified()
            .map(to_utc)
            .unwrap_or_else(|_| Utc::now());
        let created_at = metadata.created().map(to_utc).unwrap_or(updated_at);

        Ok(Note {
            id,
            title,
            body: None,
            preview: make_preview(body, self.options.preview_chars),
            created_at,
            updated_at,
            flags,
            pinned: fields.pinned,
            color: fields.color,
            notebook_name,
            tags: fields.tags,
            attachments: fields.attachments,
            reminders: fields.reminders,
            location: Some(path.to_path_buf()),
        })
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

/// Read the first `limit` bytes of a file as text. When they open a header
/// block that is not closed yet, keep reading up to `header_limit`.
pub fn read_prefix(path: &Path, limit: usize, header_limit: usize) -> std::io::Result<String> {
    let file = fs::File::open(path)?;
    let mut bytes = Vec::with_capacity(limit);
    let mut reader = file.take(limit as u64);
    reader.read_to_end(&mut bytes)?;

    if bytes.len() == limit && header_limit > limit {
        let probe = decode_utf8_prefix(&bytes);
        if HeaderCodec::is_block_unterminated(&probe) {
            reader
                .into_inner()
                .take((header_limit - limit) as u64)
                .read_to_end(&mut bytes)?;
        }
    }

    Ok(decode_utf8_prefix(&bytes))
}

/// Lossy UTF-8 decode that drops a multi-byte character cut off at the end.
pub fn decode_utf8_prefix(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(e) if e.error_len().is_none() => {
            String::from_utf8_lossy(&bytes[..e.valid_up_to()]).to_string()
        }
        Err(_) => String::from_utf8_lossy(bytes).to_string(),
    }
}
