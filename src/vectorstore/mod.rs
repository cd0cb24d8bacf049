//! Vector collection reconciliation: keeps a vector store's contents in
//! sync with the catalog by adding chunks for new/changed resources and
//! removing chunks for resources no longer in the catalog.

pub mod chunk_cache;
pub mod loader;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::CatalogService;
use crate::config::{Config, SUPPORTED_DISTANCE_METRICS};
use chunk_cache::{CachedChunk, ChunkCache};

/// A single chunked-and-embedded unit handed to a [`VectorCollection`].
#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

/// A retrieved document and its similarity score (lower distance or higher
/// similarity depending on `distance_metric`; retrievers treat it opaquely).
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub score: f64,
}

/// The minimal surface a vector backend (local or HTTP Chroma-compatible
/// store) must provide. Generalizes the teacher's single-backend client
/// into a trait so tests can swap in an in-memory fake.
pub trait VectorCollection: Send + Sync {
    fn get_ids(&self) -> Result<BTreeSet<String>>;
    fn add(&self, documents: Vec<VectorDocument>) -> Result<()>;
    /// Delete every entry whose id has the given resource `hash` as a
    /// prefix (i.e. all chunks for that resource).
    fn delete_by_hash(&self, hash: &str) -> Result<()>;
    fn count(&self) -> Result<usize>;
    fn similarity_search_with_score(&self, query_embedding: &[f32], k: usize) -> Result<Vec<ScoredDocument>>;
    fn get_all_documents(&self) -> Result<Vec<ScoredDocument>>;
}

/// Embeds text into vectors. Implemented by [`crate::embedding`] providers.
pub trait Embedder: Send + Sync {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

fn chunk_id(hash: &str, index: usize) -> String {
    format!("{hash}-{index:06}")
}

/// Split `text` into overlapping chunks of at most `chunk_size` characters,
/// breaking on paragraph boundaries where possible.
pub fn chunk_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let paragraphs: Vec<&str> = text.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
    let mut chunks = Vec::new();
    let mut current = String::new();

    for para in paragraphs {
        if current.len() + para.len() + 2 > chunk_size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            if chunk_overlap > 0 {
                let tail_start = current_tail_start(&chunks, chunk_overlap);
                if let Some(tail) = tail_start {
                    current = tail;
                }
            }
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);

        while current.len() > chunk_size {
            let split_at = floor_char_boundary(&current, chunk_size);
            let (head, rest) = current.split_at(split_at);
            chunks.push(head.to_string());
            current = rest.to_string();
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn current_tail_start(chunks: &[String], overlap: usize) -> Option<String> {
    let last = chunks.last()?;
    let start = last.len().saturating_sub(overlap);
    let start = floor_char_boundary(last, start);
    Some(last[start..].to_string())
}

/// Resolve the worker-pool size: an explicit config value, or
/// `min(64, cpu_count + 4)`.
pub fn resolve_parallel_workers(configured: Option<usize>) -> usize {
    configured.unwrap_or_else(|| {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        (cpus + 4).min(64)
    })
}

/// Minimal Porter-stemmer pass: strips a handful of common English suffixes.
/// Good enough to normalize BM25 term frequencies; not a full implementation
/// of the algorithm's step chain.
pub fn porter_stem(word: &str) -> String {
    let lower = word.to_lowercase();
    for suffix in ["ational", "ization", "fulness", "iveness", "ingly", "edly", "ing", "ed", "ly", "es", "s"] {
        if lower.len() > suffix.len() + 2 && lower.ends_with(suffix) {
            return lower[..lower.len() - suffix.len()].to_string();
        }
    }
    lower
}

/// Orchestrates chunking, embedding, and reconciling a catalog against a
/// vector collection.
pub struct VectorStoreManager {
    catalog: Arc<CatalogService>,
    collection: Arc<dyn VectorCollection>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    chunk_overlap: usize,
    stemming_enabled: bool,
    parallel_workers: usize,
    chunk_cache: Option<ChunkCache>,
}

#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub added: usize,
    pub removed: usize,
    pub failed: Vec<(String, String)>,
}

impl VectorStoreManager {
    pub fn new(
        config: &Config,
        catalog: Arc<CatalogService>,
        collection: Arc<dyn VectorCollection>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if !SUPPORTED_DISTANCE_METRICS.contains(&config.data_manager.distance_metric.as_str()) {
            anyhow::bail!(
                "unsupported distance metric '{}'",
                config.data_manager.distance_metric
            );
        }
        let chunk_cache = config
            .data_manager
            .chunk_cache_dir
            .clone()
            .map(ChunkCache::new)
            .transpose()?;
        Ok(Self {
            catalog,
            collection,
            embedder,
            chunk_size: config.data_manager.chunk_size,
            chunk_overlap: config.data_manager.chunk_overlap,
            stemming_enabled: config.data_manager.stemming.enabled,
            parallel_workers: resolve_parallel_workers(config.data_manager.parallel_workers),
            chunk_cache,
        })
    }

    /// The collection name a client should request: `{name}_with_{embedding}`,
    /// so switching embedding models doesn't silently mix incompatible vectors.
    pub fn collection_name(collection_name: &str, embedding_name: &str) -> String {
        format!("{collection_name}_with_{embedding_name}")
    }

    /// Diff the catalog's hash set against the vector collection's and
    /// reconcile: add chunks for new/changed resources, remove chunks for
    /// resources no longer cataloged.
    pub async fn update_vectorstore(&self) -> Result<ReconciliationReport> {
        let catalog_files = self.catalog.iter_files();
        let catalog_hashes: BTreeSet<String> = catalog_files.keys().cloned().collect();

        let existing_ids = self.collection.get_ids()?;
        let existing_hashes: BTreeSet<String> = existing_ids
            .iter()
            .filter_map(|id| id.rsplit_once('-').map(|(h, _)| h.to_string()))
            .collect();

        let to_remove: Vec<String> = existing_hashes.difference(&catalog_hashes).cloned().collect();
        let to_add: Vec<String> = catalog_hashes.difference(&existing_hashes).cloned().collect();

        let mut report = ReconciliationReport::default();

        for hash in &to_remove {
            self.collection.delete_by_hash(hash)?;
            if let Some(cache) = &self.chunk_cache {
                let _ = cache.remove(hash);
            }
            report.removed += 1;
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.parallel_workers));
        let mut handles = Vec::new();
        for hash in to_add {
            let Some(path) = catalog_files.get(&hash).cloned() else { continue };
            let permit = semaphore.clone();
            let catalog = self.catalog.clone();
            let stemming = self.stemming_enabled;
            let chunk_size = self.chunk_size;
            let chunk_overlap = self.chunk_overlap;
            handles.push(tokio::task::spawn(async move {
                let _permit = permit.acquire_owned().await.unwrap();
                tokio::task::spawn_blocking(move || {
                    build_chunks_for_hash(&catalog, &hash, &path, chunk_size, chunk_overlap, stemming)
                })
                .await
                .context("chunking task panicked")?
            }));
        }

        let mut to_embed: Vec<(String, Vec<VectorDocument>)> = Vec::new();
        for handle in handles {
            match handle.await.context("reconciliation task panicked")? {
                Ok(Some((hash, chunks))) => to_embed.push((hash, chunks)),
                Ok(None) => {}
                Err(e) => report.failed.push((String::new(), e.to_string())),
            }
        }

        for (hash, mut docs) in to_embed {
            let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
            match self.embedder.embed_documents(&texts) {
                Ok(embeddings) => {
                    for (doc, embedding) in docs.iter_mut().zip(embeddings) {
                        doc.embedding = embedding;
                    }
                    if let Some(cache) = &self.chunk_cache {
                        let cached: Vec<CachedChunk> = docs
                            .iter()
                            .map(|d| CachedChunk {
                                id: d.id.clone(),
                                text: d.text.clone(),
                            })
                            .collect();
                        let _ = cache.upsert(&hash, &cached);
                    }
                    self.collection.add(docs)?;
                    report.added += 1;
                }
                Err(e) => report.failed.push((hash, e.to_string())),
            }
        }

        Ok(report)
    }

    /// Drop and recreate the collection's contents, used when
    /// `reset_collection` is set.
    pub fn delete_existing_collection_if_reset(&self, reset: bool) -> Result<()> {
        if !reset {
            return Ok(());
        }
        for hash in self.catalog.iter_files().keys() {
            self.collection.delete_by_hash(hash)?;
        }
        if let Some(cache) = &self.chunk_cache {
            cache.reset()?;
        }
        Ok(())
    }
}

fn build_chunks_for_hash(
    catalog: &CatalogService,
    hash: &str,
    path: &PathBuf,
    chunk_size: usize,
    chunk_overlap: usize,
    stemming: bool,
) -> Result<Option<(String, Vec<VectorDocument>)>> {
    let text = match loader::load_text(path) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(hash, error = %e, "failed to load resource for chunking");
            return Ok(None);
        }
    };
    let metadata = catalog.get_metadata_for_hash(hash).as_dict();
    let pieces = chunk_text(&text, chunk_size, chunk_overlap);
    let documents = pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let text = if stemming {
                piece.split_whitespace().map(porter_stem).collect::<Vec<_>>().join(" ")
            } else {
                piece
            };
            VectorDocument {
                id: chunk_id(hash, i),
                text,
                embedding: Vec::new(),
                metadata: metadata.clone(),
            }
        })
        .collect();
    Ok(Some((hash.to_string(), documents)))
}
