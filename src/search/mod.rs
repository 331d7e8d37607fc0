pub mod index;
pub mod tokenizer;

use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Note;

pub use index::{SearchHit, TantivySink};

/// What the repository hands to an external search index for one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub id: Uuid,
    pub title: String,
    pub snippet: String,
    pub last_modified: DateTime<Utc>,
    /// Tags plus the notebook name.
    pub keywords: Vec<String>,
}

impl SearchEntry {
    pub fn from_note(note: &Note) -> Self {
        let mut keywords = note.tags.clone();
        if let Some(notebook) = &note.notebook_name {
            keywords.push(notebook.clone());
        }
        SearchEntry {
            id: note.id,
            title: note.title.clone(),
            snippet: note.preview.clone(),
            last_modified: note.updated_at,
            keywords,
        }
    }
}

/// External search index. Calls arrive from a single background thread in
/// submission order.
pub trait SearchSink: Send + Sync {
    fn index(&self, entries: &[SearchEntry]) -> Result<(), String>;
    fn remove(&self, ids: &[Uuid]) -> Result<(), String>;
}

enum SinkCommand {
    Index(Vec<SearchEntry>),
    Remove(Vec<Uuid>),
    Flush(mpsc::Sender<()>),
}

/// Fire-and-forget front of a [`SearchSink`]. Failures are logged on the
/// worker thread and never reach the caller.
pub struct SinkDispatcher {
    tx: Mutex<Option<mpsc::Sender<SinkCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SinkDispatcher {
    pub fn new(sink: Option<Arc<dyn SearchSink>>) -> Self {
        let Some(sink) = sink else {
            return SinkDispatcher {
                tx: Mutex::new(None),
                worker: Mutex::new(None),
            };
        };

        let (tx, rx) = mpsc::channel::<SinkCommand>();
        let worker = thread::Builder::new()
            .name("quillpad-search-sink".to_string())
            .spawn(move || {
                for command in rx {
                    match command {
                        SinkCommand::Index(entries) => {
                            if let Err(e) = sink.index(&entries) {
                                log::warn!("[SearchSink] Failed to index {} notes: {}", entries.len(), e);
                            }
                        }
                        SinkCommand::Remove(ids) => {
                            if let Err(e) = sink.remove(&ids) {
                                log::warn!("[SearchSink] Failed to remove {} notes: {}", ids.len(), e);
                            }
                        }
                        SinkCommand::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                log::debug!("[SearchSink] Dispatcher stopped");
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("[SearchSink] Could not start dispatcher thread: {}", e);
                None
            }
        };
        let tx = worker.as_ref().map(|_| tx);

        SinkDispatcher {
            tx: Mutex::new(tx),
            worker: Mutex::new(worker),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn send(&self, command: SinkCommand) {
        if let Some(tx) = self.tx.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            if tx.send(command).is_err() {
                log::warn!("[SearchSink] Dispatcher is gone, dropping update");
            }
        }
    }

    pub fn index(&self, entries: Vec<SearchEntry>) {
        if !entries.is_empty() {
            self.send(SinkCommand::Index(entries));
        }
    }

    pub fn remove(&self, ids: Vec<Uuid>) {
        if !ids.is_empty() {
            self.send(SinkCommand::Remove(ids));
        }
    }

    /// Wait until every update submitted so far has been handed to the sink.
    pub fn flush(&self, timeout: Duration) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let (done_tx, done_rx) = mpsc::channel();
        self.send(SinkCommand::Flush(done_tx));
        done_rx.recv_timeout(timeout).is_ok()
    }

    pub fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(tx);
        if let Some(handle) = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if handle.join().is_err() {
                log::error!("[SearchSink] Dispatcher thread panicked");
            }
        }
    }
}

impl Drop for SinkDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
