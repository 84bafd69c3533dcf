//! Pipeline orchestration: chunk, embed, store, and keep the bookkeeping
//! that makes repeated runs incremental.
//!
//! The manager owns a content-hash map (`document id → SHA-256 of its text`)
//! persisted in `metadata.json` next to the store artifacts. A config hash
//! over the embedding/chunking/store settings invalidates the whole index
//! when the pipeline definition changes.
//!
//! Locking is the caller's job: at most one mutating call may be in flight
//! per instance. `search` is safe to call concurrently with itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunker::DocumentChunker;
use crate::config::Config;
use crate::embedder::{Embedder, EmbedderError, create_embedder};
use crate::store::{Filter, SearchHit, StoreError, VectorStore, create_store};

const METADATA_FILE: &str = "metadata.json";

/// File extensions picked up by the bulk indexing path.
const INDEXABLE_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("manager is not initialized; call initialize() first")]
    NotInitialized,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("persistence error: {0}")]
    Persistence(String),
}

/// A document handed to the manager for indexing.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl Document {
    #[must_use]
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Map::new(),
        }
    }
}

/// Outcome of an add/delete/update call. Per-document problems land in
/// `errors`; counters report what actually happened.
#[derive(Debug, Default, Serialize)]
pub struct MutationReport {
    pub processed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub chunks: usize,
    pub errors: Vec<String>,
}

impl MutationReport {
    fn merge(&mut self, other: MutationReport) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.chunks += other.chunks;
        self.errors.extend(other.errors);
    }
}

/// Outcome of a bulk file-tree indexing run.
#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_deleted: usize,
    pub chunks_indexed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub kb_id: String,
    pub indexed_documents: usize,
    pub total_chunks: usize,
    pub config_hash: String,
    pub embedding_model: String,
    pub store_backend: String,
}

/// On-disk sidecar tracking what the index contains and under which
/// pipeline configuration it was built.
#[derive(Debug, Serialize, Deserialize)]
struct IndexMetadata {
    kb_id: String,
    config_hash: String,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
    indexed_documents: BTreeMap<String, String>,
}

/// Everything that only exists after a successful `initialize()`.
struct ManagerState {
    store: Arc<dyn VectorStore>,
    config_hash: String,
    /// document id → content hash of the indexed text
    indexed: BTreeMap<String, String>,
}

pub struct VectorSearchManager {
    config: Config,
    chunker: DocumentChunker,
    embedder: Arc<dyn Embedder>,
    state: Option<ManagerState>,
}

/// SHA-256 hex digest of a document's raw text.
fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

impl VectorSearchManager {
    /// Build a manager from validated configuration. No I/O happens here;
    /// call [`Self::initialize`] before anything else.
    pub fn new(config: Config) -> Result<Self, ManagerError> {
        config
            .validate()
            .map_err(|e| ManagerError::Config(e.to_string()))?;
        let embedder = create_embedder(&config.embedding)?;
        let chunker = DocumentChunker::new(&config.chunking);
        Ok(Self {
            config,
            chunker,
            embedder,
            state: None,
        })
    }

    fn index_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.index_dir)
    }

    /// Digest of everything that shapes the vectors: embedder identity and
    /// dimension, store backend, and the chunking settings. Any change here
    /// makes an existing index unusable.
    fn compute_config_hash(&self, dimension: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.embedder.model_hash().as_bytes());
        hasher.update(dimension.to_le_bytes());
        hasher.update(self.config.store.backend.name().as_bytes());
        hasher.update(self.config.chunking.strategy.name().as_bytes());
        hasher.update(self.config.chunking.chunk_size.to_le_bytes());
        hasher.update(self.config.chunking.chunk_overlap.to_le_bytes());
        hasher.update([u8::from(self.config.chunking.respect_headers)]);
        format!("{:x}", hasher.finalize())
    }

    fn state(&self) -> Result<&ManagerState, ManagerError> {
        self.state.as_ref().ok_or(ManagerError::NotInitialized)
    }

    fn state_mut(&mut self) -> Result<&mut ManagerState, ManagerError> {
        self.state.as_mut().ok_or(ManagerError::NotInitialized)
    }

    /// Resolve the embedding dimension, build the store, and reattach to the
    /// persisted index when its `kb_id` and config hash match the current
    /// configuration. On any mismatch, unreadable metadata, or unreadable
    /// store artifacts, the store is cleared and the index starts empty.
    pub async fn initialize(&mut self) -> Result<(), ManagerError> {
        let dimension = self.embedder.dimension().await?;
        let store = create_store(&self.config.store, dimension)?;
        let config_hash = self.compute_config_hash(dimension);
        let index_dir = self.index_dir();

        let mut indexed = BTreeMap::new();
        match read_metadata(&index_dir) {
            Ok(Some(meta))
                if meta.kb_id == self.config.kb_id && meta.config_hash == config_hash =>
            {
                match store.load(&index_dir).await {
                    Ok(()) => {
                        info!(
                            kb_id = %meta.kb_id,
                            documents = meta.indexed_documents.len(),
                            "reusing existing index"
                        );
                        indexed = meta.indexed_documents;
                    }
                    Err(e) => {
                        warn!("failed to load store artifacts, rebuilding: {e}");
                        store.clear().await?;
                    }
                }
            }
            Ok(Some(meta)) => {
                warn!(
                    kb_id = %meta.kb_id,
                    "index configuration changed, discarding existing index"
                );
                store.clear().await?;
            }
            Ok(None) => {
                info!(dir = %index_dir.display(), "no existing index, starting empty");
                store.clear().await?;
            }
            Err(e) => {
                warn!("unreadable index metadata, rebuilding: {e}");
                store.clear().await?;
            }
        }

        self.state = Some(ManagerState {
            store,
            config_hash,
            indexed,
        });
        Ok(())
    }

    /// Chunk, embed, and store a batch of documents.
    ///
    /// Unchanged documents (same id + content hash) are skipped, so re-adding
    /// never duplicates vectors. Changed documents are re-indexed when the
    /// store can delete their old chunks; otherwise the change is reported as
    /// an error and the document is left as-is. The batch is embedded and
    /// stored in one call each; on a pipeline failure nothing is persisted,
    /// so a retry redoes the same work.
    pub async fn add_documents(
        &mut self,
        docs: &[Document],
    ) -> Result<MutationReport, ManagerError> {
        let kb_id = self.config.kb_id.clone();
        let backend = self.config.store.backend.name();
        let chunker = self.chunker.clone();
        let embedder = Arc::clone(&self.embedder);
        let state = self.state_mut()?;

        let mut report = MutationReport::default();
        let mut to_index: Vec<(&Document, String)> = Vec::new();

        for doc in docs {
            if doc.id.is_empty() || doc.content.trim().is_empty() {
                report
                    .errors
                    .push(format!("invalid document '{}': empty id or content", doc.id));
                continue;
            }
            let hash = content_hash(&doc.content);
            match state.indexed.get(&doc.id) {
                Some(existing) if *existing == hash => {
                    report.skipped += 1;
                }
                Some(_) => {
                    if state.store.supports_delete_by_filter() {
                        match delete_document_vectors(&*state.store, &kb_id, &doc.id).await {
                            Ok(_) => to_index.push((doc, hash)),
                            Err(e) => report
                                .errors
                                .push(format!("failed to replace '{}': {e}", doc.id)),
                        }
                    } else {
                        report.errors.push(format!(
                            "document '{}' changed but store '{backend}' cannot delete old \
                             vectors; clear and rebuild the index",
                            doc.id,
                        ));
                    }
                }
                None => to_index.push((doc, hash)),
            }
        }

        if to_index.is_empty() {
            return Ok(report);
        }

        // One embed call and one store call for the whole batch
        let mut texts = Vec::new();
        let mut payloads = Vec::new();
        let mut ids = Vec::new();
        let mut per_doc_chunks: Vec<(String, String)> = Vec::new();

        for (doc, hash) in &to_index {
            let chunks = chunker.chunk(&doc.content, &doc.metadata, &doc.id);
            for chunk in &chunks {
                texts.push(chunk.text.clone());
                payloads.push(chunk_payload(&kb_id, &doc.id, chunk));
                ids.push(format!("{}::{}", doc.id, chunk.chunk_index));
            }
            per_doc_chunks.push((doc.id.clone(), hash.clone()));
        }

        let vectors = match embedder.embed_texts(&texts).await {
            Ok(v) => v,
            Err(e) => {
                report.errors.push(format!("embedding failed: {e}"));
                return Ok(report);
            }
        };
        if let Err(e) = state
            .store
            .add_documents(&vectors, &payloads, Some(&ids))
            .await
        {
            report.errors.push(format!("store write failed: {e}"));
            return Ok(report);
        }

        for (doc_id, hash) in per_doc_chunks {
            state.indexed.insert(doc_id, hash);
        }
        report.processed = to_index.len();
        report.chunks = texts.len();

        debug!(
            processed = report.processed,
            skipped = report.skipped,
            chunks = report.chunks,
            "documents added"
        );
        self.persist_into(&mut report.errors).await;
        Ok(report)
    }

    /// Delete documents by id.
    ///
    /// Returns an error immediately when the store cannot delete, leaving all
    /// state untouched. Unknown ids are counted as skipped.
    pub async fn delete_documents(&mut self, ids: &[String]) -> Result<MutationReport, ManagerError> {
        let kb_id = self.config.kb_id.clone();
        let state = self.state_mut()?;

        if !state.store.supports_delete_by_filter() {
            return Err(ManagerError::Store(StoreError::Unsupported(
                "delete_by_filter",
            )));
        }

        let mut report = MutationReport::default();
        for id in ids {
            if !state.indexed.contains_key(id) {
                report.skipped += 1;
                continue;
            }
            match delete_document_vectors(&*state.store, &kb_id, id).await {
                Ok(_) => {
                    state.indexed.remove(id);
                    report.deleted += 1;
                }
                Err(e) => report.errors.push(format!("failed to delete '{id}': {e}")),
            }
        }

        if report.deleted > 0 {
            self.persist_into(&mut report.errors).await;
        }
        Ok(report)
    }

    /// Replace documents: delete existing vectors where the store supports
    /// it, then add. On a deletion-less store this degrades to
    /// [`Self::add_documents`], whose change detection reports conflicts.
    pub async fn update_documents(
        &mut self,
        docs: &[Document],
    ) -> Result<MutationReport, ManagerError> {
        let mut combined = MutationReport::default();

        if self.state()?.store.supports_delete_by_filter() {
            let existing: Vec<String> = {
                let state = self.state()?;
                docs.iter()
                    .filter(|d| state.indexed.contains_key(&d.id))
                    .map(|d| d.id.clone())
                    .collect()
            };
            if !existing.is_empty() {
                combined.merge(self.delete_documents(&existing).await?);
            }
        }

        combined.merge(self.add_documents(docs).await?);
        Ok(combined)
    }

    /// Bulk-index a file tree, keyed by forward-slash relative paths.
    ///
    /// Per-file content hashes detect new, changed, and deleted files; the
    /// incremental-vs-rebuild choice is made once per run. `force`, or any
    /// deletion/change on a store that cannot delete, turns the run into a
    /// full clear and rebuild. Metadata persists only after an error-free
    /// run; deletion-only and no-op runs persist immediately.
    pub async fn index_knowledge_base(
        &mut self,
        force: bool,
        root: &Path,
    ) -> Result<IndexReport, ManagerError> {
        let kb_id = self.config.kb_id.clone();
        let chunker = self.chunker.clone();
        let embedder = Arc::clone(&self.embedder);
        let index_dir = self.index_dir();
        let mut state = self.state.take().ok_or(ManagerError::NotInitialized)?;

        let mut report = IndexReport::default();
        let current = collect_indexable_files(root, &mut report.errors);

        let deleted: Vec<String> = state
            .indexed
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();
        let mut changed = Vec::new();
        let mut added = Vec::new();
        for (rel, (_, hash)) in &current {
            match state.indexed.get(rel) {
                Some(existing) if existing == hash => {}
                Some(_) => changed.push(rel.clone()),
                None => added.push(rel.clone()),
            }
        }

        let supports_delete = state.store.supports_delete_by_filter();
        let rebuild =
            force || (!supports_delete && (!deleted.is_empty() || !changed.is_empty()));

        let mut cleared = false;
        let to_index: Vec<String>;

        if rebuild {
            info!(kb_id = %kb_id, files = current.len(), "full index rebuild");
            if let Err(e) = state.store.clear().await {
                report.errors.push(format!("failed to clear store: {e}"));
                self.state = Some(state);
                return Ok(report);
            }
            cleared = true;
            report.files_deleted = deleted.len();
            state.indexed.clear();
            to_index = current.keys().cloned().collect();
        } else {
            for id in &deleted {
                match delete_document_vectors(&*state.store, &kb_id, id).await {
                    Ok(_) => {
                        state.indexed.remove(id);
                        report.files_deleted += 1;
                    }
                    Err(e) => report.errors.push(format!("failed to delete '{id}': {e}")),
                }
            }
            for id in &changed {
                match delete_document_vectors(&*state.store, &kb_id, id).await {
                    Ok(_) => {}
                    Err(e) => report
                        .errors
                        .push(format!("failed to replace '{id}': {e}")),
                }
            }
            report.files_skipped = current.len() - changed.len() - added.len();
            to_index = changed.into_iter().chain(added).collect();
        }

        // One embed call and one store call for the whole run
        let mut texts = Vec::new();
        let mut payloads = Vec::new();
        let mut ids = Vec::new();
        let mut processed: Vec<(String, String)> = Vec::new();

        for rel in &to_index {
            let (path, hash) = &current[rel];
            let text = match std::fs::read_to_string(path) {
                Ok(t) => t,
                Err(e) => {
                    report.errors.push(format!("failed to read '{rel}': {e}"));
                    continue;
                }
            };
            for chunk in chunker.chunk(&text, &Map::new(), rel) {
                texts.push(chunk.text.clone());
                payloads.push(chunk_payload(&kb_id, rel, &chunk));
                ids.push(format!("{rel}::{}", chunk.chunk_index));
            }
            processed.push((rel.clone(), hash.clone()));
        }

        let mut pipeline_failed = false;
        if !texts.is_empty() {
            match embedder.embed_texts(&texts).await {
                Ok(vectors) => {
                    if let Err(e) = state
                        .store
                        .add_documents(&vectors, &payloads, Some(&ids))
                        .await
                    {
                        report.errors.push(format!("store write failed: {e}"));
                        pipeline_failed = true;
                    }
                }
                Err(e) => {
                    report.errors.push(format!("embedding failed: {e}"));
                    pipeline_failed = true;
                }
            }
        }

        if pipeline_failed {
            if cleared {
                // The store was wiped in place but nothing replaced it. There
                // is no in-memory rollback: the manager drops to the
                // uninitialized state and a fresh initialize() reattaches to
                // the last-good on-disk metadata or rebuilds.
                warn!("index rebuild failed after clearing the store; re-initialization required");
                return Ok(report);
            }
            self.state = Some(state);
            return Ok(report);
        }

        for (rel, hash) in processed {
            state.indexed.insert(rel, hash);
            report.files_processed += 1;
        }
        report.chunks_indexed = texts.len();

        info!(
            processed = report.files_processed,
            skipped = report.files_skipped,
            deleted = report.files_deleted,
            chunks = report.chunks_indexed,
            "knowledge base indexed"
        );

        if report.errors.is_empty() {
            persist_state(&index_dir, &kb_id, &state, &mut report.errors).await;
        }
        self.state = Some(state);
        Ok(report)
    }

    /// Embed the query and delegate to the store. Ranking is store-defined;
    /// no re-ranking happens here.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchHit>, ManagerError> {
        let state = self.state()?;
        let top_k = top_k.unwrap_or(self.config.search_top_k);
        let vector = self.embedder.embed_query(query).await?;
        let hits = state.store.search(&vector, top_k, filter).await?;
        debug!(query_len = query.len(), hits = hits.len(), "search complete");
        Ok(hits)
    }

    pub async fn get_stats(&self) -> Result<IndexStats, ManagerError> {
        let state = self.state()?;
        Ok(IndexStats {
            kb_id: self.config.kb_id.clone(),
            indexed_documents: state.indexed.len(),
            total_chunks: state.store.count().await?,
            config_hash: state.config_hash.clone(),
            embedding_model: self.config.embedding.model.clone(),
            store_backend: self.config.store.backend.name().to_string(),
        })
    }

    /// Wipe the store and bookkeeping and persist the empty record.
    pub async fn clear_index(&mut self) -> Result<(), ManagerError> {
        let kb_id = self.config.kb_id.clone();
        let index_dir = self.index_dir();
        let state = self.state_mut()?;

        state.store.clear().await?;
        state.indexed.clear();
        info!(kb_id = %kb_id, "index cleared");

        let mut errors = Vec::new();
        persist_state(&index_dir, &kb_id, state, &mut errors).await;
        if let Some(e) = errors.into_iter().next() {
            return Err(ManagerError::Persistence(e));
        }
        Ok(())
    }

    /// Persist store + metadata, recording failures instead of raising so
    /// mutating operations still return their report.
    async fn persist_into(&mut self, errors: &mut Vec<String>) {
        let kb_id = self.config.kb_id.clone();
        let index_dir = self.index_dir();
        if let Some(state) = self.state.as_ref() {
            persist_state(&index_dir, &kb_id, state, errors).await;
        }
    }
}

/// Merged vector payload for one chunk.
fn chunk_payload(kb_id: &str, document_id: &str, chunk: &crate::chunker::DocumentChunk) -> Map<String, Value> {
    let mut payload = chunk.metadata.clone();
    payload.insert("document_id".to_string(), Value::String(document_id.to_string()));
    payload.insert("kb_id".to_string(), Value::String(kb_id.to_string()));
    payload.insert("text".to_string(), Value::String(chunk.text.clone()));
    payload.insert("chunk_index".to_string(), Value::from(chunk.chunk_index));
    payload
}

/// Delete every vector belonging to one document in this knowledge base.
async fn delete_document_vectors(
    store: &dyn VectorStore,
    kb_id: &str,
    document_id: &str,
) -> Result<usize, StoreError> {
    let mut filter = Filter::new();
    filter.insert("document_id".to_string(), Value::String(document_id.to_string()));
    filter.insert("kb_id".to_string(), Value::String(kb_id.to_string()));
    store.delete_by_filter(&filter).await
}

async fn persist_state(
    index_dir: &Path,
    kb_id: &str,
    state: &ManagerState,
    errors: &mut Vec<String>,
) {
    if let Err(e) = std::fs::create_dir_all(index_dir) {
        errors.push(format!("failed to create index dir: {e}"));
        return;
    }
    if let Err(e) = state.store.save(index_dir).await {
        errors.push(format!("failed to save store: {e}"));
        return;
    }

    let metadata = IndexMetadata {
        kb_id: kb_id.to_string(),
        config_hash: state.config_hash.clone(),
        updated_at: Utc::now(),
        indexed_documents: state.indexed.clone(),
    };
    let json = match serde_json::to_string_pretty(&metadata) {
        Ok(j) => j,
        Err(e) => {
            errors.push(format!("failed to serialize metadata: {e}"));
            return;
        }
    };
    if let Err(e) = std::fs::write(index_dir.join(METADATA_FILE), json) {
        errors.push(format!("failed to write metadata: {e}"));
    }
}

fn read_metadata(index_dir: &Path) -> Result<Option<IndexMetadata>, ManagerError> {
    let path = index_dir.join(METADATA_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(&path)
        .map_err(|e| ManagerError::Persistence(format!("failed to read metadata: {e}")))?;
    let metadata = serde_json::from_str(&data)
        .map_err(|e| ManagerError::Persistence(format!("invalid metadata JSON: {e}")))?;
    Ok(Some(metadata))
}

/// Walk `root` and collect indexable files as
/// `relative forward-slash path → (absolute path, content hash)`.
fn collect_indexable_files(
    root: &Path,
    errors: &mut Vec<String>,
) -> BTreeMap<String, (PathBuf, String)> {
    let mut files = BTreeMap::new();

    for entry in WalkBuilder::new(root).build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                errors.push(format!("walk error: {e}"));
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let has_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| INDEXABLE_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if !has_ext {
            continue;
        }

        let rel = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match std::fs::read_to_string(path) {
            Ok(text) => {
                files.insert(rel, (path.to_path_buf(), content_hash(&text)));
            }
            Err(e) => errors.push(format!("failed to read '{rel}': {e}")),
        }
    }

    files
}
