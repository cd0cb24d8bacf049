//! Optional on-disk cache of chunked documents, keyed by resource hash.
//!
//! Kept off the critical reconciliation path: [`VectorStoreManager`] only
//! consults it as an optimization, never as the source of truth for what's
//! in the vector collection. A cache miss or corrupt entry always falls back
//! to re-chunking from the catalog.
//!
//! [`VectorStoreManager`]: crate::vectorstore::VectorStoreManager

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedChunk {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    /// hash -> chunk-file relative path
    entries: BTreeMap<String, String>,
}

pub struct ChunkCache {
    cache_dir: PathBuf,
    manifest: RwLock<Manifest>,
}

impl ChunkCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create chunk cache dir {}", cache_dir.display()))?;
        let manifest = Self::load_manifest(&cache_dir);
        Ok(Self {
            cache_dir,
            manifest: RwLock::new(manifest),
        })
    }

    fn manifest_path(cache_dir: &Path) -> PathBuf {
        cache_dir.join(MANIFEST_FILENAME)
    }

    fn load_manifest(cache_dir: &Path) -> Manifest {
        let path = Self::manifest_path(cache_dir);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn write_manifest(&self) -> Result<()> {
        let manifest = self.manifest.read().unwrap();
        let content = serde_json::to_string_pretty(&*manifest)?;
        std::fs::write(Self::manifest_path(&self.cache_dir), content)?;
        Ok(())
    }

    /// Store (or replace) the chunk set for `hash`. Best-effort: cache
    /// write failures are never fatal to reconciliation.
    pub fn upsert(&self, hash: &str, chunks: &[CachedChunk]) -> Result<()> {
        let rel_path = format!("{hash}.json");
        let content = serde_json::to_string(chunks)?;
        std::fs::write(self.cache_dir.join(&rel_path), content)?;
        self.manifest.write().unwrap().entries.insert(hash.to_string(), rel_path);
        self.write_manifest()
    }

    /// Load cached chunks for `hash`, if present and parseable.
    pub fn get(&self, hash: &str) -> Option<Vec<CachedChunk>> {
        let rel_path = self.manifest.read().unwrap().entries.get(hash).cloned()?;
        let content = std::fs::read_to_string(self.cache_dir.join(rel_path)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Remove a hash's cached entry, if any. Idempotent.
    pub fn remove(&self, hash: &str) -> Result<()> {
        let rel_path = self.manifest.write().unwrap().entries.remove(hash);
        if let Some(rel_path) = rel_path {
            let _ = std::fs::remove_file(self.cache_dir.join(rel_path));
            self.write_manifest()?;
        }
        Ok(())
    }

    /// Drop cache entries for hashes no longer in `live_hashes`.
    pub fn prune(&self, live_hashes: &std::collections::BTreeSet<String>) -> Result<()> {
        let stale: Vec<String> = {
            let manifest = self.manifest.read().unwrap();
            manifest
                .entries
                .keys()
                .filter(|h| !live_hashes.contains(*h))
                .cloned()
                .collect()
        };
        for hash in stale {
            self.remove(&hash)?;
        }
        Ok(())
    }

    /// Wipe the cache entirely.
    pub fn reset(&self) -> Result<()> {
        let hashes: Vec<String> = self.manifest.read().unwrap().entries.keys().cloned().collect();
        for hash in hashes {
            self.remove(&hash)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> CachedChunk {
        CachedChunk {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(dir.path().to_path_buf()).unwrap();
        cache.upsert("h1", &[chunk("h1-000000", "hello")]).unwrap();

        let cache2 = ChunkCache::new(dir.path().to_path_buf()).unwrap();
        let chunks = cache2.get("h1").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello");
    }

    #[test]
    fn missing_entry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(dir.path().to_path_buf()).unwrap();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn prune_removes_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(dir.path().to_path_buf()).unwrap();
        cache.upsert("h1", &[chunk("h1-000000", "a")]).unwrap();
        cache.upsert("h2", &[chunk("h2-000000", "b")]).unwrap();

        let live: std::collections::BTreeSet<String> = ["h1".to_string()].into_iter().collect();
        cache.prune(&live).unwrap();

        assert!(cache.get("h1").is_some());
        assert!(cache.get("h2").is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ChunkCache::new(dir.path().to_path_buf()).unwrap();
        cache.upsert("h1", &[chunk("h1-000000", "a")]).unwrap();
        cache.reset().unwrap();
        assert!(cache.get("h1").is_none());
    }
}
