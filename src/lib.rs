pub mod aggregate;
pub mod capability;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod identity;
pub mod models;
pub mod query;
pub mod repository;
pub mod scanner;
pub mod search;
pub mod watcher;
mod cli;


use std::fs;
use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;

pub use error::{RepoResult, RepositoryError};
pub use models::{Note, NoteFilter, SortOption};
pub use repository::{NoteRepository, RepositoryEvent, RepositoryOptions};
pub use watcher::{ChangeReconciler, ReconcilerOptions};

/// Atomic file write: write to a temp file in the same directory, sync, then
/// rename over the target. A sync client or watcher never sees a truncated
/// or half-written note.
pub fn atomic_write_file(path: &Path, content: &[u8]) -> Result<(), String> {
    use std::io::Write;

    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!("{}{}", file_name, watcher::TEMP_SUFFIX));

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| format!("Failed to create temp file {:?}: {}", temp_path, e))?;
    file.write_all(content)
        .map_err(|e| format!("Failed to write temp file {:?}: {}", temp_path, e))?;
    file.sync_all()
        .map_err(|e| format!("Failed to sync temp file {:?}: {}", temp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(format!("Failed to rename {:?} -> {:?}: {}", temp_path, path, e));
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() {
    init_logging();
    let args = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: could not start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(cli::execute(args)) {
        log::error!("[quillpad] {}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
