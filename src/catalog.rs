//! The on-disk unified index and the read-mostly [`CatalogService`] view
//! over it.
//!
//! `index.yaml` lives at the data-path root and maps `hash -> relative
//! path`, sorted by key. Loading tolerates a missing or malformed file
//! (empty map) and coerces any non-string key/value pair instead of
//! rejecting the whole file.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::resource::ResourceMetadata;

pub const INDEX_FILENAME: &str = "index.yaml";
pub const META_SUFFIX: &str = ".meta.yaml";

/// Load `index.yaml` from `data_path`. Missing or malformed files yield an
/// empty map rather than an error.
pub fn load_index(data_path: &Path) -> BTreeMap<String, String> {
    let path = data_path.join(INDEX_FILENAME);
    let Ok(content) = std::fs::read_to_string(&path) else {
        return BTreeMap::new();
    };

    match serde_yaml::from_str::<serde_yaml::Value>(&content) {
        Ok(serde_yaml::Value::Mapping(map)) => {
            let mut sanitized = BTreeMap::new();
            for (k, v) in map {
                match (yaml_to_string(&k), yaml_to_string(&v)) {
                    (Some(key), Some(value)) => {
                        sanitized.insert(key, value);
                    }
                    _ => {
                        tracing::warn!("skipping malformed index.yaml entry");
                    }
                }
            }
            sanitized
        }
        _ => {
            tracing::warn!(path = %path.display(), "index.yaml is malformed; treating as empty");
            BTreeMap::new()
        }
    }
}

fn yaml_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Atomically rewrite `index.yaml` (tempfile + rename), with sorted keys.
pub fn write_index(data_path: &Path, index: &BTreeMap<String, String>) -> Result<()> {
    let path = data_path.join(INDEX_FILENAME);
    let tmp_path = data_path.join(format!(".{INDEX_FILENAME}.tmp"));

    let content = serde_yaml::to_string(index).context("failed to serialize index.yaml")?;
    std::fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write temp index at {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, &path)
        .with_context(|| format!("failed to rename temp index into {}", path.display()))?;
    Ok(())
}

/// Load the `.meta.yaml` sidecar for a resource file, returning an empty
/// map-shaped default when absent or malformed.
pub fn load_metadata_sidecar(meta_path: &Path) -> Option<ResourceMetadata> {
    let content = std::fs::read_to_string(meta_path).ok()?;
    serde_yaml::from_str(&content).ok()
}

/// Process-wide view of persisted resources: `hash -> file path` and
/// `hash -> metadata-sidecar path`, both loaded from disk.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub file_index: BTreeMap<String, PathBuf>,
    pub metadata_index: BTreeMap<String, PathBuf>,
}

/// Read-mostly catalog service backed by the data-path's `index.yaml` and
/// `.meta.yaml` sidecars.
pub struct CatalogService {
    data_path: PathBuf,
    catalog: std::sync::RwLock<Catalog>,
}

impl CatalogService {
    pub fn new(data_path: PathBuf) -> Self {
        let service = Self {
            data_path,
            catalog: std::sync::RwLock::new(Catalog::default()),
        };
        service.refresh();
        service
    }

    /// Reload both maps from disk. Cheap: YAML parse only, no file reads.
    pub fn refresh(&self) {
        let index = load_index(&self.data_path);
        let mut file_index = BTreeMap::new();
        let mut metadata_index = BTreeMap::new();
        for (hash, relative_path) in index {
            let abs_path = self.data_path.join(&relative_path);
            let meta_path = sidecar_path(&abs_path);
            file_index.insert(hash.clone(), abs_path);
            if meta_path.exists() {
                metadata_index.insert(hash, meta_path);
            }
        }
        *self.catalog.write().unwrap() = Catalog {
            file_index,
            metadata_index,
        };
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Snapshot of `hash -> absolute path` for all currently indexed files.
    pub fn iter_files(&self) -> BTreeMap<String, PathBuf> {
        self.catalog.read().unwrap().file_index.clone()
    }

    pub fn get_path_for_hash(&self, hash: &str) -> Option<PathBuf> {
        self.catalog.read().unwrap().file_index.get(hash).cloned()
    }

    /// Load a typed document's raw text for a hash using the appropriate
    /// loader for the file's suffix. See [`crate::vectorstore::loader`].
    pub fn get_document_for_hash(&self, hash: &str) -> Result<Option<String>> {
        let Some(path) = self.get_path_for_hash(hash) else {
            return Ok(None);
        };
        crate::vectorstore::loader::load_text(&path).map(Some)
    }

    /// Parse the YAML sidecar for a hash, returning an empty metadata
    /// record when absent or malformed (never an error).
    pub fn get_metadata_for_hash(&self, hash: &str) -> ResourceMetadata {
        let meta_path = self.catalog.read().unwrap().metadata_index.get(hash).cloned();
        meta_path
            .and_then(|p| load_metadata_sidecar(&p))
            .unwrap_or_else(|| ResourceMetadata {
                display_name: String::new(),
                extra: Default::default(),
            })
    }

    /// Return `(hash, metadata)` pairs whose extras contain `key == value`.
    pub fn get_metadata_by_filter(&self, key: &str, value: &str) -> Vec<(String, ResourceMetadata)> {
        let hashes: Vec<String> = self.catalog.read().unwrap().metadata_index.keys().cloned().collect();
        hashes
            .into_iter()
            .filter_map(|hash| {
                let meta = self.get_metadata_for_hash(&hash);
                let matches = if key == "display_name" {
                    meta.display_name == value
                } else {
                    meta.extra.get(key).map(|v| v == value).unwrap_or(false)
                };
                matches.then_some((hash, meta))
            })
            .collect()
    }
}

pub fn sidecar_path(file_path: &Path) -> PathBuf {
    let mut s = file_path.as_os_str().to_os_string();
    s.push(META_SUFFIX);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_index(dir.path()).is_empty());
    }

    #[test]
    fn malformed_index_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILENAME), "not: [valid yaml: map").unwrap();
        assert!(load_index(dir.path()).is_empty());
    }

    #[test]
    fn write_then_load_roundtrips_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = BTreeMap::new();
        index.insert("zzz".to_string(), "zzz.txt".to_string());
        index.insert("aaa".to_string(), "aaa.txt".to_string());
        write_index(dir.path(), &index).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(INDEX_FILENAME)).unwrap();
        let aaa_pos = raw.find("aaa").unwrap();
        let zzz_pos = raw.find("zzz").unwrap();
        assert!(aaa_pos < zzz_pos);

        let loaded = load_index(dir.path());
        assert_eq!(loaded, index);
    }

    #[test]
    fn refresh_skips_missing_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let mut index = BTreeMap::new();
        index.insert("h1".to_string(), "a.txt".to_string());
        write_index(dir.path(), &index).unwrap();

        let service = CatalogService::new(dir.path().to_path_buf());
        assert_eq!(service.iter_files().len(), 1);
        assert_eq!(service.get_metadata_for_hash("h1").display_name, "");
    }
}
