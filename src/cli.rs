//! `quillpad` command line.
//!
//! ```bash
//! quillpad list --view archived
//! quillpad new --notebook Work --title "Standup" --body "- ship it"
//! quillpad search "quarterly plan"
//! quillpad trash <id>
//! quillpad watch --json
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::config::{self, Config};
use crate::error::{RepoResult, RepositoryError};
use crate::models::{Note, NoteFilter, SortOption};
use crate::query::{filter_notes, group_by_date};
use crate::repository::{NoteRepository, RepositoryOptions};
use crate::search::TantivySink;
use crate::watcher::{ChangeReconciler, ReconcilerOptions};

/// Quillpad - notes as plain files in a folder you sync yourself
#[derive(Parser)]
#[command(name = "quillpad")]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to the per-user data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Notes folder, overriding the configured one
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List notes in a view
    List {
        #[arg(long, value_enum, default_value_t = View::All)]
        view: View,
        /// Only notes in this notebook
        #[arg(long)]
        notebook: Option<String>,
        /// Only notes with this tag
        #[arg(long)]
        tag: Option<String>,
        #[arg(long, value_enum)]
        sort: Option<Sort>,
        /// Group by last modification date
        #[arg(long)]
        group: bool,
    },
    /// Print one note with its body
    Show { id: Uuid },
    /// Create a note
    New {
        #[arg(long)]
        notebook: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
    },
    /// Search titles, previews and bodies
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = View::All)]
        view: View,
    },
    /// Note counts per view, notebook and tag
    Counts,
    /// Notebooks with note counts, including empty folders
    Notebooks,
    /// Tags with note counts
    Tags,
    Archive { id: Uuid },
    Unarchive { id: Uuid },
    Hide { id: Uuid },
    Unhide { id: Uuid },
    /// Move a note to the trash
    Trash { id: Uuid },
    /// Bring a note back from the trash
    Restore { id: Uuid },
    /// Permanently delete a note and its attachments
    Delete { id: Uuid },
    Duplicate { id: Uuid },
    AddNotebook { name: String },
    /// Delete a notebook folder and every note in it
    DeleteNotebook { name: String },
    /// Permanently delete every note in the trash
    EmptyTrash,
    /// Keep the index in sync with the folder and print events
    Watch,
    /// Query the full-text search index
    IndexSearch {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum View {
    All,
    Favorites,
    Archived,
    Trash,
    Hidden,
    Reminders,
}

impl From<View> for NoteFilter {
    fn from(view: View) -> Self {
        match view {
            View::All => NoteFilter::All,
            View::Favorites => NoteFilter::Favorites,
            View::Archived => NoteFilter::Archived,
            View::Trash => NoteFilter::Trash,
            View::Hidden => NoteFilter::Hidden,
            View::Reminders => NoteFilter::Reminders,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Sort {
    Updated,
    UpdatedAsc,
    Created,
    CreatedAsc,
    Title,
    TitleDesc,
}

impl From<Sort> for SortOption {
    fn from(sort: Sort) -> Self {
        match sort {
            Sort::Updated => SortOption::UpdatedDesc,
            Sort::UpdatedAsc => SortOption::UpdatedAsc,
            Sort::Created => SortOption::CreatedDesc,
            Sort::CreatedAsc => SortOption::CreatedAsc,
            Sort::Title => SortOption::TitleAsc,
            Sort::TitleDesc => SortOption::TitleDesc,
        }
    }
}

struct Session {
    config: Config,
    repo: NoteRepository,
    index: Option<Arc<TantivySink>>,
    json: bool,
}

fn open_session(cli: &Cli) -> RepoResult<Session> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path)?;

    // An explicit --root is used as given; a configured root goes through
    // the capability check and may fall back to the default folder.
    let mut options = match &cli.root {
        Some(root) => RepositoryOptions::new(root).with_scan_options(config.scan_options()),
        None => RepositoryOptions::from_config(&config, None),
    };

    let mut index = None;
    if config.search_index {
        let index_dir = config
            .index_dir
            .clone()
            .unwrap_or_else(|| TantivySink::index_dir_for(&options.root));
        match TantivySink::open(&index_dir, &options.root) {
            Ok(sink) => {
                let sink = Arc::new(sink);
                options = options.with_sink(sink.clone());
                index = Some(sink);
            }
            Err(e) => log::warn!("[cli] Search index unavailable: {}", e),
        }
    }

    let repo = NoteRepository::open(options)?;
    Ok(Session {
        config,
        repo,
        index,
        json: cli.json,
    })
}

pub async fn execute(cli: Cli) -> RepoResult<()> {
    let session = open_session(&cli)?;
    session.repo.load_metadata().await?;

    let result = dispatch(&session, cli.command).await;
    session.repo.shutdown();
    result
}

async fn dispatch(session: &Session, command: Commands) -> RepoResult<()> {
    let repo = &session.repo;
    match command {
        Commands::List {
            view,
            notebook,
            tag,
            sort,
            group,
        } => {
            let filter = match (notebook, tag) {
                (Some(name), _) => NoteFilter::Notebook(name),
                (None, Some(name)) => NoteFilter::Tag(name),
                (None, None) => view.into(),
            };
            let sort = sort.map(SortOption::from).unwrap_or(session.config.sort);
            let notes = filter_notes(&repo.notes(), &filter, "", None, sort, Utc::now());
            if group && !session.json {
                for (category, notes) in group_by_date(&notes, Utc::now()) {
                    println!("{}", category.label());
                    for note in &notes {
                        println!("  {}", note_line(note));
                    }
                }
                Ok(())
            } else {
                print_notes(session, &notes)
            }
        }
        Commands::Show { id } => {
            if !repo.load_body(id).await {
                return Err(RepositoryError::NotFound(id.to_string()));
            }
            let note = repo
                .note(id)
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
            if session.json {
                print_json(&note)
            } else {
                println!("{}", note.title);
                if !note.tags.is_empty() {
                    println!("tags: {}", note.tags.join(", "));
                }
                println!();
                println!("{}", note.body.as_deref().unwrap_or(""));
                Ok(())
            }
        }
        Commands::New { notebook, title, body } => {
            let notebook = notebook.or_else(|| session.config.default_notebook.clone());
            let id = repo.add_note(notebook.as_deref())?;
            if title.is_some() || body.is_some() {
                let mut note = repo
                    .note(id)
                    .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
                if let Some(title) = title {
                    note.title = title;
                }
                if let Some(body) = body {
                    note.body = Some(body);
                }
                repo.save(note)?;
            }
            print_id(session, id)
        }
        Commands::Search { query, view } => {
            let ids = repo.deep_search(&query).await?;
            let notes = filter_notes(
                &repo.notes(),
                &view.into(),
                &query,
                Some(ids.as_slice()),
                session.config.sort,
                Utc::now(),
            );
            print_notes(session, &notes)
        }
        Commands::Counts => {
            let counts = repo.summary().labelled_counts();
            if session.json {
                print_json(&counts)
            } else {
                for (label, count) in counts {
                    println!("{:>6}  {}", count, label);
                }
                Ok(())
            }
        }
        Commands::Notebooks => {
            let summary = repo.summary();
            if session.json {
                return print_json(&summary.notebooks);
            }
            for folder in &summary.notebook_folders {
                let count = summary
                    .notebooks
                    .iter()
                    .find(|n| &n.name == folder)
                    .map_or(0, |n| n.count);
                println!("{:>6}  {}", count, folder);
            }
            Ok(())
        }
        Commands::Tags => {
            let tags = repo.summary().tags;
            if session.json {
                return print_json(&tags);
            }
            for tag in tags {
                println!("{:>6}  #{}", tag.count, tag.name);
            }
            Ok(())
        }
        Commands::Archive { id } => print_note(session, &repo.set_archived(id, true)?),
        Commands::Unarchive { id } => print_note(session, &repo.set_archived(id, false)?),
        Commands::Hide { id } => print_note(session, &repo.set_hidden(id, true)?),
        Commands::Unhide { id } => print_note(session, &repo.set_hidden(id, false)?),
        Commands::Trash { id } => print_note(session, &repo.move_to_trash(id)?),
        Commands::Restore { id } => print_note(session, &repo.restore(id)?),
        Commands::Delete { id } => {
            repo.delete(id)?;
            print_id(session, id)
        }
        Commands::Duplicate { id } => {
            let copy = repo.duplicate(id).await?;
            print_id(session, copy)
        }
        Commands::AddNotebook { name } => repo.add_notebook(&name).await,
        Commands::DeleteNotebook { name } => repo.delete_notebook(&name).await,
        Commands::EmptyTrash => {
            let removed = repo.empty_trash()?;
            if session.json {
                print_json(&serde_json::json!({ "removed": removed }))
            } else {
                println!("Removed {} notes", removed);
                Ok(())
            }
        }
        Commands::Watch => watch(session).await,
        Commands::IndexSearch { query, limit } => {
            let Some(index) = &session.index else {
                return Err(RepositoryError::Config("search index is disabled".to_string()));
            };
            if !repo.flush_search_sink(Duration::from_secs(30)) {
                log::warn!("[cli] Search index is still catching up");
            }
            let hits = index.search(&query, limit).map_err(RepositoryError::Io)?;
            if session.json {
                return print_json(&hits);
            }
            for hit in hits {
                println!("{}  {:.2}  {}", hit.id, hit.score, hit.title);
                if !hit.snippet.is_empty() {
                    println!("    {}", hit.snippet);
                }
            }
            Ok(())
        }
    }
}

async fn watch(session: &Session) -> RepoResult<()> {
    let mut events = session.repo.subscribe();
    let _reconciler = ChangeReconciler::start(
        session.repo.clone(),
        ReconcilerOptions::from_config(&session.config),
    )?;
    log::info!("[cli] Watching {:?}, press Ctrl-C to stop", session.repo.root());

    loop {
        match events.recv().await {
            Ok(event) => {
                if session.json {
                    print_json(&event)?;
                } else {
                    println!("{:?}", event);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("[cli] Dropped {} events", skipped);
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

fn note_line(note: &Note) -> String {
    let mut line = format!("{}  {}", note.id, note.title);
    if let Some(notebook) = &note.notebook_name {
        line.push_str(&format!("  [{}]", notebook));
    }
    if note.pinned {
        line.push_str("  *");
    }
    line
}

fn print_notes(session: &Session, notes: &[Note]) -> RepoResult<()> {
    if session.json {
        return print_json(&notes);
    }
    for note in notes {
        println!("{}", note_line(note));
    }
    Ok(())
}

fn print_note(session: &Session, note: &Note) -> RepoResult<()> {
    if session.json {
        print_json(note)
    } else {
        println!("{}", note_line(note));
        Ok(())
    }
}

fn print_id(session: &Session, id: Uuid) -> RepoResult<()> {
    if session.json {
        print_json(&serde_json::json!({ "id": id }))
    } else {
        println!("{}", id);
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> RepoResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
