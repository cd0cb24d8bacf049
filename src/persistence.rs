//! `PersistenceService`: owns the data-path directory, writes content +
//! sidecar + index entries atomically, and serializes concurrent writers to
//! the same hash.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::catalog::{self, sidecar_path};
use crate::resource::Resource;

/// Owns `data_path` and is the only writer of `index.yaml` and resource
/// files/sidecars. Safe to share across collectors via `Arc`.
pub struct PersistenceService {
    data_path: PathBuf,
    index: Mutex<BTreeMap<String, String>>,
    per_hash_locks: Mutex<std::collections::HashMap<String, Arc<Mutex<()>>>>,
}

impl PersistenceService {
    pub fn new(data_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_path)
            .with_context(|| format!("failed to create data path {}", data_path.display()))?;
        let index = catalog::load_index(&data_path);
        Ok(Self {
            data_path,
            index: Mutex::new(index),
            per_hash_locks: Mutex::new(std::collections::HashMap::new()),
        })
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    fn lock_for_hash(&self, hash: &str) -> Arc<Mutex<()>> {
        let mut locks = self.per_hash_locks.lock().unwrap();
        locks
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write `resource`'s content and sidecar under `target_dir` (relative
    /// to `data_path`), then commit an index entry. With `overwrite=false`
    /// and an existing entry, returns the existing path unchanged.
    ///
    /// The index is only updated after content and sidecar are both on
    /// disk, so a failed write never leaves a half-committed entry.
    pub fn persist(
        &self,
        resource: &dyn Resource,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<PathBuf> {
        let hash = resource.hash();
        let hash_lock = self.lock_for_hash(&hash);
        let _guard = hash_lock.lock().unwrap();

        let relative_path = target_dir.join(resource.filename());
        let absolute_path = self.data_path.join(&relative_path);

        if !overwrite {
            let existing = self.index.lock().unwrap().get(&hash).cloned();
            if let Some(existing_rel) = existing {
                return Ok(self.data_path.join(existing_rel));
            }
        }

        if let Some(parent) = absolute_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir {}", parent.display()))?;
        }

        let write_result = (|| -> Result<()> {
            match resource.content() {
                crate::resource::ResourceContent::Text(text) => {
                    std::fs::write(&absolute_path, text)?;
                }
                crate::resource::ResourceContent::Bytes(bytes) => {
                    std::fs::write(&absolute_path, bytes)?;
                }
            }
            if let Some(metadata) = resource.metadata() {
                let sidecar = sidecar_path(&absolute_path);
                let yaml = serde_yaml::to_string(&metadata)?;
                std::fs::write(&sidecar, yaml)?;
            }
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&absolute_path);
            let _ = std::fs::remove_file(sidecar_path(&absolute_path));
            return Err(e).context("failed to persist resource; partial write cleaned up");
        }

        let rel_str = relative_path.to_string_lossy().to_string();
        self.index.lock().unwrap().insert(hash, rel_str);
        self.flush_index()?;

        Ok(absolute_path)
    }

    /// Remove a resource's file, sidecar, and index entry. Idempotent.
    pub fn delete_resource(&self, hash: &str, flush: bool) -> Result<()> {
        let hash_lock = self.lock_for_hash(hash);
        let _guard = hash_lock.lock().unwrap();

        let relative = self.index.lock().unwrap().get(hash).cloned();
        if let Some(relative) = relative {
            let absolute = self.data_path.join(&relative);
            let _ = std::fs::remove_file(&absolute);
            let _ = std::fs::remove_file(sidecar_path(&absolute));
        }
        self.index.lock().unwrap().remove(hash);

        if flush {
            self.flush_index()?;
        }
        Ok(())
    }

    /// Delete every resource whose metadata sidecar has `key == value`.
    pub fn delete_by_metadata_filter(&self, key: &str, value: &str) -> Result<usize> {
        let hashes: Vec<String> = self.index.lock().unwrap().keys().cloned().collect();
        let mut deleted = 0;
        for hash in hashes {
            let relative = self.index.lock().unwrap().get(&hash).cloned();
            let Some(relative) = relative else { continue };
            let absolute = self.data_path.join(&relative);
            let meta_path = sidecar_path(&absolute);
            let Some(metadata) = catalog::load_metadata_sidecar(&meta_path) else {
                continue;
            };
            let matches = if key == "display_name" {
                metadata.display_name == value
            } else {
                metadata.extra.get(key).map(|v| v == value).unwrap_or(false)
            };
            if matches {
                self.delete_resource(&hash, false)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            self.flush_index()?;
        }
        Ok(deleted)
    }

    /// Atomically rewrite `index.yaml` with sorted keys.
    pub fn flush_index(&self) -> Result<()> {
        let snapshot = self.index.lock().unwrap().clone();
        catalog::write_index(&self.data_path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceContent, ResourceMetadata, ScrapedResource};
    use std::collections::BTreeMap as Map;

    fn sample_resource(url: &str) -> ScrapedResource {
        ScrapedResource {
            url: url.to_string(),
            payload: ResourceContent::Text("hello world".to_string()),
            suffix: "html".to_string(),
            source_type: "web".to_string(),
            extra_metadata: Map::new(),
        }
    }

    #[test]
    fn persist_writes_content_sidecar_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PersistenceService::new(dir.path().to_path_buf()).unwrap();
        let resource = sample_resource("https://example.com/a");

        let path = svc.persist(&resource, Path::new("web"), true).unwrap();
        assert!(path.exists());
        assert!(crate::catalog::sidecar_path(&path).exists());

        let svc2 = PersistenceService::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(svc2.index.lock().unwrap().len(), 1);
    }

    #[test]
    fn persist_twice_same_hash_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PersistenceService::new(dir.path().to_path_buf()).unwrap();
        let resource = sample_resource("https://example.com/a");

        let path1 = svc.persist(&resource, Path::new("web"), true).unwrap();
        let path2 = svc.persist(&resource, Path::new("web"), true).unwrap();
        assert_eq!(path1, path2);
        assert_eq!(svc.index.lock().unwrap().len(), 1);
    }

    #[test]
    fn overwrite_false_keeps_existing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PersistenceService::new(dir.path().to_path_buf()).unwrap();
        let resource = sample_resource("https://example.com/a");
        svc.persist(&resource, Path::new("web"), true).unwrap();

        let resource2 = ScrapedResource {
            payload: ResourceContent::Text("different".to_string()),
            ..sample_resource("https://example.com/a")
        };
        svc.persist(&resource2, Path::new("web"), false).unwrap();
        let path = svc.index.lock().unwrap().get(&resource.hash()).cloned().unwrap();
        let content = std::fs::read_to_string(dir.path().join(path)).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn delete_resource_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PersistenceService::new(dir.path().to_path_buf()).unwrap();
        let resource = sample_resource("https://example.com/a");
        svc.persist(&resource, Path::new("web"), true).unwrap();

        svc.delete_resource(&resource.hash(), true).unwrap();
        assert!(svc.index.lock().unwrap().is_empty());
        svc.delete_resource(&resource.hash(), true).unwrap();
    }

    #[test]
    fn delete_by_metadata_filter_matches_display_name() {
        let dir = tempfile::tempdir().unwrap();
        let svc = PersistenceService::new(dir.path().to_path_buf()).unwrap();
        let mut extra = Map::new();
        extra.insert("display_name".to_string(), "Target".to_string());
        let resource = ScrapedResource {
            extra_metadata: extra,
            ..sample_resource("https://example.com/a")
        };
        svc.persist(&resource, Path::new("web"), true).unwrap();

        let deleted = svc.delete_by_metadata_filter("display_name", "Target").unwrap();
        assert_eq!(deleted, 1);
        assert!(svc.index.lock().unwrap().is_empty());
    }

    #[test]
    fn metadata_rejected_does_not_fail_persist() {
        // A resource whose metadata() returns None (e.g. invalid display
        // name) must still persist content without a sidecar.
        struct NoMeta;
        impl Resource for NoMeta {
            fn hash(&self) -> String {
                "nometa".to_string()
            }
            fn filename(&self) -> String {
                "nometa.txt".to_string()
            }
            fn content(&self) -> ResourceContent {
                ResourceContent::Text("x".to_string())
            }
            fn metadata(&self) -> Option<ResourceMetadata> {
                None
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let svc = PersistenceService::new(dir.path().to_path_buf()).unwrap();
        let path = svc.persist(&NoMeta, Path::new("."), true).unwrap();
        assert!(path.exists());
        assert!(!crate::catalog::sidecar_path(&path).exists());
    }
}
