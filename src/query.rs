//! Filtering, sorting and date grouping for note lists.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Bucket, Note, NoteFilter, SortOption};

impl NoteFilter {
    pub fn matches(&self, note: &Note, now: DateTime<Utc>) -> bool {
        let bucket = note.bucket();
        match self {
            NoteFilter::All => bucket == Bucket::Visible,
            NoteFilter::Favorites => bucket == Bucket::Visible && note.pinned,
            NoteFilter::Archived => note.flags.archived && !note.flags.deleted,
            NoteFilter::Trash => note.flags.deleted,
            NoteFilter::Hidden => note.flags.hidden && !note.flags.deleted,
            NoteFilter::Reminders => !note.flags.deleted && note.has_upcoming_reminder(now),
            NoteFilter::Notebook(name) => {
                bucket == Bucket::Visible && note.notebook_name.as_deref() == Some(name.as_str())
            }
            NoteFilter::Tag(name) => bucket == Bucket::Visible && note.tags.iter().any(|t| t == name),
        }
    }
}

impl SortOption {
    pub fn sort(&self, notes: &mut [Note]) {
        match self {
            SortOption::UpdatedDesc => notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
            SortOption::UpdatedAsc => notes.sort_by(|a, b| a.updated_at.cmp(&b.updated_at)),
            SortOption::CreatedDesc => notes.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOption::CreatedAsc => notes.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortOption::TitleAsc => notes.sort_by_cached_key(|n| n.title.to_lowercase()),
            SortOption::TitleDesc => {
                notes.sort_by_cached_key(|n| n.title.to_lowercase());
                notes.reverse();
            }
        }
    }
}

/// Notes matching `filter`, narrowed by a text query, then sorted.
///
/// When `deep_results` is given (ids from a body search) it decides
/// membership. Otherwise a non-empty `text` matches title or preview,
/// case-insensitively.
pub fn filter_notes(
    notes: &[Note],
    filter: &NoteFilter,
    text: &str,
    deep_results: Option<&[Uuid]>,
    sort: SortOption,
    now: DateTime<Utc>,
) -> Vec<Note> {
    let deep: Option<HashSet<Uuid>> = deep_results.map(|ids| ids.iter().copied().collect());
    let needle = text.trim().to_lowercase();

    let mut result: Vec<Note> = notes
        .iter()
        .filter(|n| filter.matches(n, now))
        .filter(|n| match &deep {
            Some(ids) => ids.contains(&n.id),
            None if needle.is_empty() => true,
            None => {
                n.title.to_lowercase().contains(&needle) || n.preview.to_lowercase().contains(&needle)
            }
        })
        .cloned()
        .collect();

    sort.sort(&mut result);
    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateCategory {
    Today,
    Yesterday,
    Previous7Days,
    Previous30Days,
    Older,
}

impl DateCategory {
    pub const ORDER: [DateCategory; 5] = [
        DateCategory::Today,
        DateCategory::Yesterday,
        DateCategory::Previous7Days,
        DateCategory::Previous30Days,
        DateCategory::Older,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DateCategory::Today => "Today",
            DateCategory::Yesterday => "Yesterday",
            DateCategory::Previous7Days => "Previous 7 Days",
            DateCategory::Previous30Days => "Previous 30 Days",
            DateCategory::Older => "Older",
        }
    }

    /// Category of `date` as seen on the local calendar day `today`.
    pub fn for_day(date: NaiveDate, today: NaiveDate) -> Self {
        if date >= today {
            DateCategory::Today
        } else if date == today - Duration::days(1) {
            DateCategory::Yesterday
        } else if date >= today - Duration::days(7) {
            DateCategory::Previous7Days
        } else if date >= today - Duration::days(30) {
            DateCategory::Previous30Days
        } else {
            DateCategory::Older
        }
    }
}

/// Group already-sorted notes by `updated_at` on the local calendar. Empty
/// groups are left out; order inside a group is preserved.
pub fn group_by_date(notes: &[Note], now: DateTime<Utc>) -> Vec<(DateCategory, Vec<Note>)> {
    let today = now.with_timezone(&Local).date_naive();
    let mut groups: Vec<(DateCategory, Vec<Note>)> =
        DateCategory::ORDER.iter().map(|c| (*c, Vec::new())).collect();

    for note in notes {
        let day = note.updated_at.with_timezone(&Local).date_naive();
        let category = DateCategory::for_day(day, today);
        if let Some((_, bucket)) = groups.iter_mut().find(|(c, _)| *c == category) {
            bucket.push(note.clone());
        }
    }

    groups.retain(|(_, notes)| !notes.is_empty());
    groups
}
