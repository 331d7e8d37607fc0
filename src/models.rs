//! Note records and the small value types that describe where they live.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ARCHIVE_DIR: &str = ".archive";
pub const TRASH_DIR: &str = ".trash";
pub const HIDDEN_DIR: &str = ".hidden";

pub const RESERVED_DIRS: [&str; 3] = [ARCHIVE_DIR, TRASH_DIR, HIDDEN_DIR];

pub const DEFAULT_EXTENSION: &str = "md";
pub const UNTITLED_FILE_STEM: &str = "Untitled";
pub const NEW_NOTE_TITLE: &str = "Untitled Note";

pub fn is_reserved_dir(name: &str) -> bool {
    RESERVED_DIRS.contains(&name)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleFlags {
    pub archived: bool,
    pub deleted: bool,
    pub hidden: bool,
}

impl LifecycleFlags {
    /// Deleted wins over archived, archived over hidden.
    pub fn bucket(&self) -> Bucket {
        if self.deleted {
            Bucket::Trash
        } else if self.archived {
            Bucket::Archive
        } else if self.hidden {
            Bucket::Hidden
        } else {
            Bucket::Visible
        }
    }
}

/// The one lifecycle bucket a note lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Trash,
    Archive,
    Hidden,
    Visible,
}

impl Bucket {
    pub fn reserved_dir(&self) -> Option<&'static str> {
        match self {
            Bucket::Trash => Some(TRASH_DIR),
            Bucket::Archive => Some(ARCHIVE_DIR),
            Bucket::Hidden => Some(HIDDEN_DIR),
            Bucket::Visible => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub title: String,
    /// `None` until the full file has been read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub flags: LifecycleFlags,
    pub pinned: bool,
    pub color: Option<String>,
    pub notebook_name: Option<String>,
    pub tags: Vec<String>,
    pub attachments: Vec<String>,
    pub reminders: Vec<DateTime<Utc>>,
    pub location: Option<PathBuf>,
}

impl Note {
    /// A fresh, never-persisted note with an empty loaded body.
    pub fn new(title: impl Into<String>, notebook_name: Option<String>) -> Self {
        let now = Utc::now();
        Note {
            id: Uuid::new_v4(),
            title: title.into(),
            body: Some(String::new()),
            preview: String::new(),
            created_at: now,
            updated_at: now,
            flags: LifecycleFlags::default(),
            pinned: false,
            color: None,
            notebook_name,
            tags: Vec::new(),
            attachments: Vec::new(),
            reminders: Vec::new(),
            location: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.body.is_some()
    }

    pub fn bucket(&self) -> Bucket {
        self.flags.bucket()
    }

    pub fn is_visible(&self) -> bool {
        self.bucket() == Bucket::Visible
    }

    pub fn has_upcoming_reminder(&self, now: DateTime<Utc>) -> bool {
        self.reminders.iter().any(|r| *r > now)
    }

    /// Folder the note belongs in, relative to the repository root.
    pub fn placement_dir(&self) -> Option<String> {
        match self.bucket().reserved_dir() {
            Some(dir) => Some(dir.to_string()),
            None => self.notebook_name.clone(),
        }
    }

    pub fn placement_folder(&self, root: &Path) -> PathBuf {
        match self.placement_dir() {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }

    /// Adds the tag when absent, removes it when present.
    pub fn toggle_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() {
            return;
        }
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(pos);
        } else {
            self.tags.push(tag.to_string());
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if !tag.is_empty() && !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }
}

/// Single-line excerpt from the start of a body.
pub fn make_preview(body: &str, max_chars: usize) -> String {
    let prefix: String = body.chars().take(max_chars).collect();
    prefix
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// File stem used for a title: trimmed, separators replaced.
pub fn file_stem_for_title(title: &str) -> String {
    // Dot files are skipped by the scanner.
    let trimmed = title.trim().trim_start_matches('.').trim_start();
    if trimmed.is_empty() {
        return UNTITLED_FILE_STEM.to_string();
    }
    trimmed.replace(['/', '\\'], "-")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub count: usize,
}

/// Named subsets of the index used for counts and list views.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum NoteFilter {
    All,
    Favorites,
    Archived,
    Trash,
    Hidden,
    Reminders,
    Notebook(String),
    Tag(String),
}

impl NoteFilter {
    pub fn label(&self) -> String {
        match self {
            NoteFilter::All => "All Notes".to_string(),
            NoteFilter::Favorites => "Favorites".to_string(),
            NoteFilter::Archived => "Archived".to_string(),
            NoteFilter::Trash => "Trash".to_string(),
            NoteFilter::Hidden => "Hidden".to_string(),
            NoteFilter::Reminders => "Reminders".to_string(),
            NoteFilter::Notebook(name) => name.clone(),
            NoteFilter::Tag(name) => format!("#{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOption {
    #[default]
    UpdatedDesc,
    UpdatedAsc,
    CreatedDesc,
    CreatedAsc,
    TitleAsc,
    TitleDesc,
}
