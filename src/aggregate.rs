use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{Bucket, Note, NoteFilter, Notebook, Tag};

/// Counts and projections derived from the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataSummary {
    pub counts: BTreeMap<NoteFilter, usize>,
    pub notebooks: Vec<Notebook>,
    pub tags: Vec<Tag>,
    /// Notebook folders present on disk, including empty ones.
    pub notebook_folders: Vec<String>,
}

impl MetadataSummary {
    pub fn count(&self, filter: &NoteFilter) -> usize {
        self.counts.get(filter).copied().unwrap_or(0)
    }

    /// Display label and count for every filter, in filter order.
    pub fn labelled_counts(&self) -> Vec<(String, usize)> {
        self.counts.iter().map(|(f, n)| (f.label(), *n)).collect()
    }
}

/// Recompute every aggregate in one pass. Pure: the same notes, folders and
/// `now` always give the same summary.
pub fn recompute(notes: &[Note], notebook_folders: &[String], now: DateTime<Utc>) -> MetadataSummary {
    let mut counts: BTreeMap<NoteFilter, usize> = [
        NoteFilter::All,
        NoteFilter::Favorites,
        NoteFilter::Archived,
        NoteFilter::Trash,
        NoteFilter::Hidden,
        NoteFilter::Reminders,
    ]
    .into_iter()
    .map(|f| (f, 0))
    .collect();

    let mut notebook_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut tag_counts: BTreeMap<String, usize> = BTreeMap::new();

    for note in notes {
        let bucket = note.bucket();
        if bucket == Bucket::Trash {
            *counts.entry(NoteFilter::Trash).or_default() += 1;
            continue;
        }

        if note.has_upcoming_reminder(now) {
            *counts.entry(NoteFilter::Reminders).or_default() += 1;
        }

        match bucket {
            Bucket::Archive => *counts.entry(NoteFilter::Archived).or_default() += 1,
            Bucket::Hidden => *counts.entry(NoteFilter::Hidden).or_default() += 1,
            Bucket::Visible => {
                *counts.entry(NoteFilter::All).or_default() += 1;
                if note.pinned {
                    *counts.entry(NoteFilter::Favorites).or_default() += 1;
                }
                if let Some(name) = &note.notebook_name {
                    *notebook_counts.entry(name.clone()).or_default() += 1;
                }
                for tag in &note.tags {
                    *tag_counts.entry(tag.clone()).or_default() += 1;
                }
            }
            Bucket::Trash => {}
        }
    }

    for (name, count) in &notebook_counts {
        counts.insert(NoteFilter::Notebook(name.clone()), *count);
    }
    for (name, count) in &tag_counts {
        counts.insert(NoteFilter::Tag(name.clone()), *count);
    }

    let mut folders = notebook_folders.to_vec();
    folders.sort();
    folders.dedup();

    MetadataSummary {
        counts,
        notebooks: notebook_counts
            .into_iter()
            .map(|(name, count)| Notebook { name, count })
            .collect(),
        tags: tag_counts
            .into_iter()
            .map(|(name, count)| Tag { name, count })
            .collect(),
        notebook_folders: folders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn note(title: &str) -> Note {
        Note::new(title, None)
    }

    #[test]
    fn test_each_note_lands_in_one_bucket() {
        let mut trashed = note("t");
        trashed.flags.deleted = true;
        trashed.flags.archived = true;
        let mut archived = note("a");
        archived.flags.archived = true;
        archived.flags.hidden = true;
        let mut hidden = note("h");
        hidden.flags.hidden = true;
        let visible = note("v");

        let summary = recompute(&[trashed, archived, hidden, visible], &[], Utc::now());
        assert_eq!(summary.count(&NoteFilter::Trash), 1);
        assert_eq!(summary.count(&NoteFilter::Archived), 1);
        assert_eq!(summary.count(&NoteFilter::Hidden), 1);
        assert_eq!(summary.count(&NoteFilter::All), 1);
    }

    #[test]
    fn test_only_visible_notes_feed_projections() {
        let mut work = note("w");
        work.notebook_name = Some("Work".to_string());
        work.tags = vec!["x".to_string(), "y".to_string()];
        work.pinned = true;

        let mut archived_work = note("aw");
        archived_work.notebook_name = Some("Work".to_string());
        archived_work.tags = vec!["x".to_string()];
        archived_work.flags.archived = true;
        archived_work.pinned = true;

        let mut home = note("h");
        home.notebook_name = Some("Home".to_string());
        home.tags = vec!["x".to_string()];

        let summary = recompute(&[work, archived_work, home], &[], Utc::now());
        assert_eq!(summary.count(&NoteFilter::Favorites), 1);
        assert_eq!(
            summary.notebooks,
            vec![
                Notebook { name: "Home".to_string(), count: 1 },
                Notebook { name: "Work".to_string(), count: 1 },
            ]
        );
        assert_eq!(
            summary.tags,
            vec![
                Tag { name: "x".to_string(), count: 2 },
                Tag { name: "y".to_string(), count: 1 },
            ]
        );
        assert_eq!(summary.count(&NoteFilter::Notebook("Work".to_string())), 1);
        assert_eq!(summary.count(&NoteFilter::Tag("x".to_string())), 2);
    }

    #[test]
    fn test_upcoming_reminders_counted_outside_trash() {
        let now = Utc::now();
        let mut upcoming = note("u");
        upcoming.reminders = vec![now + Duration::hours(1)];
        let mut archived_upcoming = note("au");
        archived_upcoming.flags.archived = true;
        archived_upcoming.reminders = vec![now + Duration::hours(1)];
        let mut trashed_upcoming = note("tu");
        trashed_upcoming.flags.deleted = true;
        trashed_upcoming.reminders = vec![now + Duration::hours(1)];
        let mut past = note("p");
        past.reminders = vec![now - Duration::hours(1)];

        let summary = recompute(&[upcoming, archived_upcoming, trashed_upcoming, past], &[], now);
        assert_eq!(summary.count(&NoteFilter::Reminders), 2);
    }

    #[test]
    fn test_recompute_is_pure() {
        let now = Utc::now();
        let mut a = note("a");
        a.tags = vec!["t".to_string()];
        a.notebook_name = Some("N".to_string());
        let notes = vec![a, note("b")];
        let folders = vec!["N".to_string(), "Empty".to_string()];

        let first = recompute(&notes, &folders, now);
        let second = recompute(&notes, &folders, now);
        assert_eq!(first, second);
        assert_eq!(first.notebook_folders, vec!["Empty", "N"]);
    }

    #[test]
    fn test_empty_index_has_zero_counts() {
        let summary = recompute(&[], &[], Utc::now());
        assert_eq!(summary.count(&NoteFilter::All), 0);
        assert!(summary.notebooks.is_empty());
        assert!(summary.tags.is_empty());
    }
}
