//! Local full-text index fed by the repository through [`SearchSink`].
//!
//! The index lives outside the synced notes folder. Sync clients that copy
//! index segments or writer locks between devices corrupt it, so the
//! directory is keyed by a hash of the root path under the per-user data
//! directory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use uuid::Uuid;

use super::tokenizer::{extract_snippet, CjkTokenizer, CJK_TOKENIZER};
use super::{SearchEntry, SearchSink};

/// Bump when the field layout changes; older indexes are rebuilt.
const SCHEMA_VERSION: u32 = 1;
const METADATA_FILE: &str = "quillpad_meta.json";
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Serialize, Deserialize, Clone)]
struct IndexMetadata {
    app_version: String,
    schema_version: u32,
    root_path: String,
    created_at: String,
}

impl IndexMetadata {
    fn new(root: &Path) -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: SCHEMA_VERSION,
            root_path: root.to_string_lossy().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub title: String,
    pub snippet: String,
    pub score: f32,
}

pub struct TantivySink {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    f_id: Field,
    f_title: Field,
    f_snippet: Field,
    f_keywords: Field,
    f_modified: Field,
}

impl TantivySink {
    /// Per-user index directory for a notes root, outside any synced folder.
    pub fn index_dir_for(root: &Path) -> PathBuf {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        root.to_string_lossy().to_lowercase().hash(&mut hasher);
        let root_hash = format!("{:016x}", hasher.finish());

        crate::config::data_dir().join("indices").join(root_hash)
    }

    pub fn open(index_dir: &Path, root: &Path) -> Result<Self, String> {
        log::info!("[SearchIndex] Using index directory {:?} for root {:?}", index_dir, root);

        if Self::needs_regeneration(index_dir, root) {
            log::warn!("[SearchIndex] Index is stale or from another root, rebuilding");
            if let Err(e) = fs::remove_dir_all(index_dir) {
                log::warn!("[SearchIndex] Failed to remove old index: {}", e);
            }
        }
        fs::create_dir_all(index_dir).map_err(|e| e.to_string())?;
        Self::cleanup_stale_locks(index_dir);

        let mut builder = Schema::builder();
        let text_options = TextOptions::default()
            .set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer(CJK_TOKENIZER)
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions),
            )
            .set_stored();

        let f_id = builder.add_text_field("id", STRING | STORED);
        let f_title = builder.add_text_field("title", text_options.clone());
        let f_snippet = builder.add_text_field("snippet", text_options);
        let f_keywords = builder.add_text_field("keywords", STRING | STORED);
        let f_modified = builder.add_i64_field("modified", INDEXED | STORED);
        let schema = builder.build();

        let index = match Self::open_or_create(index_dir, &schema) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("[SearchIndex] Open failed ({}), recreating index", e);
                let _ = fs::remove_dir_all(index_dir);
                fs::create_dir_all(index_dir).map_err(|e| e.to_string())?;
                Index::create_in_dir(index_dir, schema.clone()).map_err(|e| e.to_string())?
            }
        };
        index.tokenizers().register(CJK_TOKENIZER, CjkTokenizer);

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e: tantivy::TantivyError| e.to_string())?;
        let writer = index.writer(WRITER_HEAP_BYTES).map_err(|e| e.to_string())?;

        if let Err(e) = Self::write_metadata(index_dir, &IndexMetadata::new(root)) {
            log::warn!("[SearchIndex] Failed to write metadata (non-fatal): {}", e);
        }

        Ok(TantivySink {
            index,
            reader,
            writer: Mutex::new(writer),
            f_id,
            f_title,
            f_snippet,
            f_keywords,
            f_modified,
        })
    }

    fn open_or_create(index_dir: &Path, schema: &Schema) -> Result<Index, String> {
        if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir).map_err(|e| e.to_string())
        } else {
            Index::create_in_dir(index_dir, schema.clone()).map_err(|e| e.to_string())
        }
    }

    /// Writer locks copied in from another device would block the writer.
    fn cleanup_stale_locks(index_dir: &Path) {
        let Ok(entries) = fs::read_dir(index_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "lock") {
                log::warn!("[SearchIndex] Removing stale lock file: {:?}", path);
                if let Err(e) = fs::remove_file(&path) {
                    log::error!("[SearchIndex] Failed to remove lock file: {}", e);
                }
            }
        }
    }

    fn read_metadata(index_dir: &Path) -> Option<IndexMetadata> {
        let content = fs::read_to_string(index_dir.join(METADATA_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_metadata(index_dir: &Path, metadata: &IndexMetadata) -> Result<(), String> {
        let content = serde_json::to_string_pretty(metadata)
            .map_err(|e| format!("Failed to serialize metadata: {}", e))?;
        let mut file = fs::File::create(index_dir.join(METADATA_FILE))
            .map_err(|e| format!("Failed to create metadata file: {}", e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| format!("Failed to write metadata: {}", e))?;
        file.sync_all()
            .map_err(|e| format!("Failed to sync metadata: {}", e))
    }

    fn needs_regeneration(index_dir: &Path, root: &Path) -> bool {
        if !index_dir.exists() {
            return false;
        }
        match Self::read_metadata(index_dir) {
            Some(meta) => {
                meta.schema_version != SCHEMA_VERSION
                    || meta.root_path.to_lowercase() != root.to_string_lossy().to_lowercase()
            }
            None => true,
        }
    }

    fn write_batch(&self, f: impl FnOnce(&mut IndexWriter) -> Result<(), String>) -> Result<(), String> {
        let mut writer = self.writer.lock().map_err(|e| e.to_string())?;
        f(&mut writer)?;
        writer.commit().map_err(|e| e.to_string())?;
        drop(writer);
        self.reader.reload().map_err(|e| e.to_string())
    }

    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<SearchHit>, String> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.f_title, self.f_snippet, self.f_keywords]);
        let (query, errors) = parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            log::debug!("[SearchIndex] Lenient parse of {:?}: {} issues", query_str, errors.len());
        }

        let top_docs = searcher
            .search(&*query, &TopDocs::with_limit(limit))
            .map_err(|e| e.to_string())?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address).map_err(|e| e.to_string())?;
            let text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            let Ok(id) = Uuid::parse_str(&text(self.f_id)) else {
                continue;
            };
            hits.push(SearchHit {
                id,
                title: text(self.f_title),
                snippet: extract_snippet(&text(self.f_snippet), query_str, 150),
                score,
            });
        }
        Ok(hits)
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

impl SearchSink for TantivySink {
    fn index(&self, entries: &[SearchEntry]) -> Result<(), String> {
        self.write_batch(|writer| {
            for entry in entries {
                let id = entry.id.to_string();
                writer.delete_term(Term::from_field_text(self.f_id, &id));

                let mut doc = TantivyDocument::default();
                doc.add_text(self.f_id, &id);
                doc.add_text(self.f_title, &entry.title);
                doc.add_text(self.f_snippet, &entry.snippet);
                for keyword in &entry.keywords {
                    doc.add_text(self.f_keywords, keyword);
                }
                doc.add_i64(self.f_modified, entry.last_modified.timestamp());
                writer.add_document(doc).map_err(|e| e.to_string())?;
            }
            Ok(())
        })
    }

    fn remove(&self, ids: &[Uuid]) -> Result<(), String> {
        self.write_batch(|writer| {
            for id in ids {
                writer.delete_term(Term::from_field_text(self.f_id, &id.to_string()));
            }
            Ok(())
        })
    }
}
