//! End-to-end checks of the note repository against a real folder.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use quillpad_lib::capability::{Capability, ScopedAccess};
use quillpad_lib::models::{Note, NoteFilter};
use quillpad_lib::repository::{NoteRepository, RepositoryEvent, RepositoryOptions};
use quillpad_lib::search::{SearchEntry, SearchSink};
use quillpad_lib::RepositoryError;

fn open(dir: &TempDir) -> NoteRepository {
    NoteRepository::open(RepositoryOptions::new(dir.path())).unwrap()
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn find_by_title(repo: &NoteRepository, title: &str) -> Note {
    repo.notes()
        .into_iter()
        .find(|n| n.title == title)
        .unwrap_or_else(|| panic!("no note titled {:?}", title))
}

#[derive(Default)]
struct RecordingSink {
    indexed: Mutex<Vec<Uuid>>,
    removed: Mutex<Vec<Uuid>>,
}

impl SearchSink for RecordingSink {
    fn index(&self, entries: &[SearchEntry]) -> Result<(), String> {
        self.indexed.lock().unwrap().extend(entries.iter().map(|e| e.id));
        Ok(())
    }

    fn remove(&self, ids: &[Uuid]) -> Result<(), String> {
        self.removed.lock().unwrap().extend_from_slice(ids);
        Ok(())
    }
}

// =========================================================================
// Save
// =========================================================================

#[tokio::test]
async fn test_save_new_note_writes_header_and_counts() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    assert_eq!(repo.load_metadata().await.unwrap(), 0);

    let mut note = Note::new("My Notes", None);
    note.tags = vec!["work".to_string(), "urgent".to_string()];
    let saved = repo.save(note.clone()).unwrap();

    let path = dir.path().join("My Notes.md");
    assert_eq!(saved.location.as_deref(), Some(path.as_path()));
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("---\n"));
    assert!(content.contains(&format!("uid: {}", note.id.to_string().to_uppercase())));
    assert!(content.contains("tags: [work, urgent]"));
    assert!(content.ends_with("---\n"), "body is empty: {:?}", content);

    assert_eq!(repo.summary().count(&NoteFilter::All), 1);

    repo.load_metadata().await.unwrap();
    let reloaded = repo.note(note.id).expect("explicit uid survives a rescan");
    assert_eq!(reloaded.tags, vec!["work", "urgent"]);
}

#[tokio::test]
async fn test_archive_moves_file_and_keeps_identity() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let saved = repo.save(Note::new("Plan", None)).unwrap();
    assert_eq!(repo.summary().count(&NoteFilter::All), 1);

    let archived = repo.set_archived(saved.id, true).unwrap();

    assert_eq!(archived.id, saved.id);
    assert!(!dir.path().join("Plan.md").exists());
    assert!(dir.path().join(".archive").join("Plan.md").exists());
    let summary = repo.summary();
    assert_eq!(summary.count(&NoteFilter::Archived), 1);
    assert_eq!(summary.count(&NoteFilter::All), 0);

    repo.load_metadata().await.unwrap();
    let reloaded = repo.note(saved.id).unwrap();
    assert!(reloaded.flags.archived);
}

#[tokio::test]
async fn test_all_flags_resolve_to_trash() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let mut note = Note::new("Everything", Some("Work".to_string()));
    note.flags.archived = true;
    note.flags.deleted = true;
    note.flags.hidden = true;

    let saved = repo.save(note).unwrap();
    assert_eq!(
        saved.location.as_deref(),
        Some(dir.path().join(".trash").join("Everything.md").as_path())
    );
    assert_eq!(saved.notebook_name, None);
    assert_eq!(repo.summary().count(&NoteFilter::Trash), 1);
}

#[tokio::test]
async fn test_title_collision_gets_counter() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let first = repo.save(Note::new("Plan", None)).unwrap();
    let second = repo.save(Note::new("Plan", None)).unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(second.title, "Plan 2");
    assert!(dir.path().join("Plan.md").exists());
    assert!(dir.path().join("Plan 2.md").exists());
}

#[tokio::test]
async fn test_rename_moves_file() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let mut note = Note::new("Draft", None);
    note.body = Some("contents".to_string());
    let saved = repo.save(note).unwrap();

    let renamed = repo.rename(saved.id, "Final").unwrap();
    assert_eq!(renamed.title, "Final");
    assert!(!dir.path().join("Draft.md").exists());
    let content = fs::read_to_string(dir.path().join("Final.md")).unwrap();
    assert!(content.ends_with("contents"));
}

#[tokio::test]
async fn test_rename_to_dot_title_survives_reload() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let id = repo.add_note(None).unwrap();

    let renamed = repo.rename(id, ".plan").unwrap();
    assert_eq!(renamed.title, "plan");
    assert!(!dir.path().join(".plan.md").exists());
    assert!(dir.path().join("plan.md").exists());

    repo.load_metadata().await.unwrap();
    assert!(repo.note(id).is_some(), "note must still be indexed after a rescan");

    repo.rename(id, "..").unwrap();
    repo.load_metadata().await.unwrap();
    assert_eq!(repo.note(id).unwrap().title, "Untitled");
}

#[tokio::test]
async fn test_rename_to_conflict_shaped_title_survives_reload() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let mut events = repo.subscribe();
    let id = repo.add_note(None).unwrap();

    let renamed = repo.rename(id, "Plan (my conflicted copy)").unwrap();
    assert_eq!(renamed.title, "Plan_(my conflicted copy)");
    repo.load_metadata().await.unwrap();
    assert!(repo.note(id).is_some());

    repo.rename(id, "notes.sync-conflict-20240115-093000-ABCDEFG").unwrap();
    repo.load_metadata().await.unwrap();
    assert_eq!(
        repo.note(id).unwrap().title,
        "notes_sync-conflict-20240115-093000-ABCDEFG"
    );

    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, RepositoryEvent::SyncConflict { .. }),
            "a saved note must not be reported as a conflict copy"
        );
    }
}

#[tokio::test]
async fn test_flag_change_on_unloaded_note_keeps_body() {
    let dir = TempDir::new().unwrap();
    let body = format!("start {} end", "x".repeat(5_000));
    write(&dir.path().join("Long.md"), &body);
    let repo = open(&dir);
    repo.load_metadata().await.unwrap();

    let note = find_by_title(&repo, "Long");
    assert!(!note.is_loaded());
    repo.set_pinned(note.id, true).unwrap();

    let content = fs::read_to_string(dir.path().join("Long.md")).unwrap();
    assert!(content.contains("pinned: true"));
    assert!(content.ends_with(&body), "body must survive a metadata-only save");
}

#[tokio::test]
async fn test_txt_note_keeps_extension() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("Todo.txt"), "milk");
    let repo = open(&dir);
    repo.load_metadata().await.unwrap();

    let note = find_by_title(&repo, "Todo");
    let saved = repo.set_pinned(note.id, true).unwrap();
    assert_eq!(saved.location.as_deref(), Some(dir.path().join("Todo.txt").as_path()));
    assert!(!dir.path().join("Todo.md").exists());
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_trash_and_restore() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let id = repo.add_note(Some("Work")).unwrap();
    let created = repo.note(id).unwrap();
    assert_eq!(
        created.location.as_deref(),
        Some(dir.path().join("Work").join("Untitled Note.md").as_path())
    );

    let trashed = repo.move_to_trash(id).unwrap();
    assert!(trashed.flags.deleted);
    assert!(dir.path().join(".trash").join("Untitled Note.md").exists());

    let restored = repo.restore(id).unwrap();
    assert!(!restored.flags.deleted);
    assert_eq!(
        restored.location.as_deref(),
        Some(dir.path().join("Untitled Note.md").as_path()),
        "notebook is cleared when a note enters the trash"
    );
}

#[tokio::test]
async fn test_hidden_notes_excluded_from_all() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let id = repo.add_note(None).unwrap();
    repo.set_hidden(id, true).unwrap();

    let summary = repo.summary();
    assert_eq!(summary.count(&NoteFilter::All), 0);
    assert_eq!(summary.count(&NoteFilter::Hidden), 1);

    repo.set_hidden(id, false).unwrap();
    assert_eq!(repo.summary().count(&NoteFilter::All), 1);
}

#[tokio::test]
async fn test_delete_removes_attachments_and_stays_deleted() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let mut note = Note::new("Voice memo", None);
    note.attachments = vec!["clip.m4a".to_string()];
    let saved = repo.save(note).unwrap();
    write(&dir.path().join("clip.m4a"), "audio");

    repo.delete(saved.id).unwrap();

    assert!(!dir.path().join("Voice memo.md").exists());
    assert!(!dir.path().join("clip.m4a").exists());
    assert!(repo.note(saved.id).is_none());

    repo.load_metadata().await.unwrap();
    assert!(repo.note(saved.id).is_none(), "a rescan must not resurrect it");
}

#[tokio::test]
async fn test_delete_keeps_shared_attachment() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let mut a = Note::new("A", None);
    a.attachments = vec!["shared.png".to_string()];
    let mut b = Note::new("B", None);
    b.attachments = vec!["shared.png".to_string()];
    let a = repo.save(a).unwrap();
    repo.save(b).unwrap();
    write(&dir.path().join("shared.png"), "img");

    repo.delete(a.id).unwrap();
    assert!(dir.path().join("shared.png").exists());
}

#[tokio::test]
async fn test_delete_unknown_note_is_not_found() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    assert!(matches!(
        repo.delete(Uuid::new_v4()),
        Err(RepositoryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_empty_trash() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let keep = repo.save(Note::new("Keep", None)).unwrap();
    let gone = repo.save(Note::new("Gone", None)).unwrap();
    repo.move_to_trash(gone.id).unwrap();

    assert_eq!(repo.empty_trash().unwrap(), 1);
    assert!(repo.note(gone.id).is_none());
    assert!(repo.note(keep.id).is_some());
    assert!(!dir.path().join(".trash").join("Gone.md").exists());
}

#[tokio::test]
async fn test_move_to_notebook_moves_attachments() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let saved = repo.save(Note::new("Trip", None)).unwrap();
    let photo = dir.path().join("beach.jpg");
    write(&photo, "jpeg");

    let stored = repo.import_attachment(saved.id, &photo).unwrap();
    assert_eq!(stored, "beach_1.jpg", "the source already sits in the folder");

    let moved = repo.move_to_notebook(saved.id, Some("Travel")).unwrap();
    assert_eq!(moved.notebook_name.as_deref(), Some("Travel"));
    assert!(dir.path().join("Travel").join("Trip.md").exists());
    assert!(dir.path().join("Travel").join("beach_1.jpg").exists());
    assert!(!dir.path().join("beach_1.jpg").exists());
}

#[tokio::test]
async fn test_invalid_notebook_name_rejected() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let id = repo.add_note(None).unwrap();
    assert!(matches!(
        repo.move_to_notebook(id, Some("../escape")),
        Err(RepositoryError::InvalidName(_))
    ));
    assert!(matches!(
        repo.add_notebook(".trash").await,
        Err(RepositoryError::InvalidName(_))
    ));
}

#[tokio::test]
async fn test_reminders_and_tags() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let id = repo.add_note(None).unwrap();

    repo.add_reminder(id, Utc::now() + ChronoDuration::days(1)).unwrap();
    repo.toggle_tag(id, "home").unwrap();

    let summary = repo.summary();
    assert_eq!(summary.count(&NoteFilter::Reminders), 1);
    assert_eq!(summary.count(&NoteFilter::Tag("home".to_string())), 1);

    repo.load_metadata().await.unwrap();
    let note = repo.note(id).unwrap();
    assert_eq!(note.reminders.len(), 1);
    assert_eq!(note.tags, vec!["home"]);
}

#[tokio::test]
async fn test_duplicate_tags_in_header_count_once() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("Dup.md"), "---\ntags: [a, a, b, a]\n---\nbody");
    let repo = open(&dir);
    repo.load_metadata().await.unwrap();

    let note = find_by_title(&repo, "Dup");
    assert_eq!(note.tags, vec!["a", "b"]);
    let summary = repo.summary();
    assert_eq!(summary.count(&NoteFilter::Tag("a".to_string())), 1);
    let tag = summary.tags.iter().find(|t| t.name == "a").unwrap();
    assert_eq!(tag.count, 1);
}

// =========================================================================
// Loading and merge
// =========================================================================

#[tokio::test]
async fn test_reload_preserves_loaded_body() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("Ideas.md"), "alpha");
    let repo = open(&dir);
    repo.load_metadata().await.unwrap();

    let id = find_by_title(&repo, "Ideas").id;
    assert!(repo.load_body(id).await);
    assert_eq!(repo.note(id).unwrap().body.as_deref(), Some("alpha"));

    repo.load_metadata().await.unwrap();
    let note = repo.note(id).unwrap();
    assert!(note.is_loaded());
    assert_eq!(note.body.as_deref(), Some("alpha"));
}

#[tokio::test]
async fn test_headerless_file_has_stable_derived_id() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("Work").join("Loose.md"), "no header here");
    let repo = open(&dir);
    repo.load_metadata().await.unwrap();
    let first = find_by_title(&repo, "Loose");
    assert_eq!(first.notebook_name.as_deref(), Some("Work"));

    repo.load_metadata().await.unwrap();
    assert_eq!(find_by_title(&repo, "Loose").id, first.id);
}

#[tokio::test]
async fn test_external_delete_disappears_on_reload() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let saved = repo.save(Note::new("Ephemeral", None)).unwrap();
    fs::remove_file(dir.path().join("Ephemeral.md")).unwrap();

    repo.load_metadata().await.unwrap();
    assert!(repo.note(saved.id).is_none());
    assert_eq!(repo.summary().count(&NoteFilter::All), 0);
}

#[tokio::test]
async fn test_load_body_of_unknown_note_is_false() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    assert!(!repo.load_body(Uuid::new_v4()).await);
}

#[tokio::test]
async fn test_duplicate_copies_body() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("Recipe.md"), "---\ntags: [food]\n---\nflour, water");
    let repo = open(&dir);
    repo.load_metadata().await.unwrap();
    let source = find_by_title(&repo, "Recipe");

    let copy_id = repo.duplicate(source.id).await.unwrap();
    let copy = repo.note(copy_id).unwrap();
    assert_ne!(copy_id, source.id);
    assert_eq!(copy.title, "Recipe Copy");
    assert_eq!(copy.tags, vec!["food"]);
    assert_eq!(copy.body.as_deref(), Some("flour, water"));
    assert!(dir.path().join("Recipe Copy.md").exists());
}

// =========================================================================
// Notebooks
// =========================================================================

#[tokio::test]
async fn test_add_and_delete_notebook() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);

    repo.add_notebook("Projects").await.unwrap();
    assert!(dir.path().join("Projects").is_dir());
    assert_eq!(repo.summary().notebook_folders, vec!["Projects"]);

    let id = repo.add_note(Some("Projects")).unwrap();
    assert_eq!(repo.summary().count(&NoteFilter::Notebook("Projects".to_string())), 1);

    repo.delete_notebook("Projects").await.unwrap();
    assert!(!dir.path().join("Projects").exists());
    assert!(repo.note(id).is_none());
    assert!(repo.summary().notebook_folders.is_empty());
}

#[tokio::test]
async fn test_delete_missing_notebook_is_not_found() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    assert!(matches!(
        repo.delete_notebook("Nope").await,
        Err(RepositoryError::NotFound(_))
    ));
}

struct CountingCapability {
    root: std::path::PathBuf,
    started: AtomicUsize,
}

impl Capability for CountingCapability {
    fn root(&self) -> &Path {
        &self.root
    }
    fn start_access(&self) -> bool {
        self.started.fetch_add(1, Ordering::SeqCst);
        true
    }
    fn stop_access(&self) {}
}

#[tokio::test]
async fn test_notebook_lookup_runs_inside_access_scope() {
    let dir = TempDir::new().unwrap();
    let cap = Arc::new(CountingCapability {
        root: dir.path().to_path_buf(),
        started: AtomicUsize::new(0),
    });
    let scope = ScopedAccess::new(Some(cap.clone() as Arc<dyn Capability>));
    let repo = NoteRepository::open(RepositoryOptions::new(dir.path()).with_scope(scope)).unwrap();

    let before = cap.started.load(Ordering::SeqCst);
    assert!(matches!(
        repo.delete_notebook("Nope").await,
        Err(RepositoryError::NotFound(_))
    ));
    assert_eq!(
        cap.started.load(Ordering::SeqCst),
        before + 1,
        "the folder check must enter the access scope"
    );
}

// =========================================================================
// Deep search
// =========================================================================

#[tokio::test]
async fn test_deep_search_reads_unloaded_bodies() {
    let dir = TempDir::new().unwrap();
    let body = format!("{}\nthe hidden needle is here", "filler ".repeat(1_000));
    write(&dir.path().join("Haystack.md"), &body);
    write(&dir.path().join("Other.md"), "nothing to see");
    let repo = open(&dir);
    repo.load_metadata().await.unwrap();
    let haystack = find_by_title(&repo, "Haystack");
    assert!(!haystack.preview.contains("needle"));

    let hits = repo.deep_search("NEEDLE").await.unwrap();
    assert_eq!(hits, vec![haystack.id]);
    assert!(!repo.note(haystack.id).unwrap().is_loaded(), "search does not cache bodies");
}

#[tokio::test]
async fn test_deep_search_matches_title_and_ignores_empty_query() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let saved = repo.save(Note::new("Quarterly Plan", None)).unwrap();

    assert_eq!(repo.deep_search("quarterly").await.unwrap(), vec![saved.id]);
    assert!(repo.deep_search("").await.unwrap().is_empty());

    // Whitespace is a literal needle, not an empty query.
    assert_eq!(repo.deep_search(" ").await.unwrap(), vec![saved.id]);
    assert!(repo.deep_search("  ").await.unwrap().is_empty());
}

// =========================================================================
// Sink and events
// =========================================================================

#[tokio::test]
async fn test_search_sink_receives_updates() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let repo = NoteRepository::open(
        RepositoryOptions::new(dir.path()).with_sink(sink.clone() as Arc<dyn SearchSink>),
    )
    .unwrap();

    let saved = repo.save(Note::new("Indexed", None)).unwrap();
    repo.delete(saved.id).unwrap();
    assert!(repo.flush_search_sink(Duration::from_secs(5)));

    assert_eq!(*sink.indexed.lock().unwrap(), vec![saved.id]);
    assert_eq!(*sink.removed.lock().unwrap(), vec![saved.id]);
}

#[tokio::test]
async fn test_events_are_broadcast() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);
    let mut events = repo.subscribe();

    let saved = repo.save(Note::new("Observed", None)).unwrap();
    repo.load_metadata().await.unwrap();
    repo.delete(saved.id).unwrap();

    assert_eq!(events.recv().await.unwrap(), RepositoryEvent::NoteSaved { id: saved.id });
    assert_eq!(
        events.recv().await.unwrap(),
        RepositoryEvent::IndexReloaded { note_count: 1 }
    );
    assert_eq!(events.recv().await.unwrap(), RepositoryEvent::NoteDeleted { id: saved.id });
}

#[tokio::test]
async fn test_conflict_copy_reported_on_reload() {
    let dir = TempDir::new().unwrap();
    write(&dir.path().join("memo.md"), "mine");
    write(&dir.path().join("memo (SynologyDrive Conflict).md"), "theirs");
    let repo = open(&dir);
    let mut events = repo.subscribe();

    assert_eq!(repo.load_metadata().await.unwrap(), 1);
    assert_eq!(
        events.recv().await.unwrap(),
        RepositoryEvent::SyncConflict {
            conflict_path: dir.path().join("memo (SynologyDrive Conflict).md"),
            original_path: dir.path().join("memo.md"),
        }
    );
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_and_reloads() {
    let dir = TempDir::new().unwrap();
    let repo = open(&dir);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let repo = repo.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let mut note = Note::new(format!("Note {}", i), None);
            note.body = Some(format!("body {}", i));
            repo.save(note).unwrap().id
        }));
    }
    let reload = {
        let repo = repo.clone();
        tokio::spawn(async move { repo.load_metadata().await })
    };

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    match reload.await.unwrap() {
        Ok(_) | Err(RepositoryError::Cancelled) => {}
        Err(e) => panic!("reload failed: {}", e),
    }

    repo.load_metadata().await.unwrap();
    for id in ids {
        assert!(repo.note(id).is_some(), "saved note {} missing after reload", id);
    }
    assert_eq!(repo.notes().len(), 8);
}
