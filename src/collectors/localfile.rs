//! Local file staging: walks a staging directory and persists every file it
//! finds as a [`LocalFileResource`], plus a single-file upload entry point.

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};

use crate::collectors::{Collector, CollectorReport};
use crate::persistence::PersistenceService;
use crate::resource::LocalFileResource;

const DEFAULT_PATTERNS: &[&str] = &["*.md", "*.txt", "*.pdf", "*.html", "*.htm"];

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        } else {
            tracing::warn!(pattern, "ignoring invalid staging-file glob pattern");
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

pub struct LocalFileManager {
    name: String,
    staging_dir: PathBuf,
    include: GlobSet,
}

impl LocalFileManager {
    pub fn new(name: impl Into<String>, staging_dir: PathBuf) -> Self {
        let patterns: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();
        Self::with_patterns(name, staging_dir, &patterns)
    }

    /// Restrict the staging walk to files matching any of `patterns`
    /// (glob syntax, e.g. `"*.md"`). Files that match none are skipped.
    pub fn with_patterns(name: impl Into<String>, staging_dir: PathBuf, patterns: &[String]) -> Self {
        Self {
            name: name.into(),
            staging_dir,
            include: build_globset(patterns),
        }
    }

    /// Persist a single file outside of a scheduled walk, e.g. from an
    /// interactive upload endpoint.
    pub fn upload_file(&self, persistence: &PersistenceService, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        let resource = LocalFileResource {
            file_name,
            source_path: path.to_path_buf(),
            bytes,
            base_dir: Some(self.staging_dir.clone()),
        };
        persistence.persist(&resource, Path::new("local"), true)?;
        Ok(())
    }

    fn walk_files(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(&self.staging_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| p.file_name().map(|n| self.include.is_match(n)).unwrap_or(false))
            .collect()
    }
}

#[async_trait]
impl Collector for LocalFileManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, persistence: &PersistenceService) -> Result<CollectorReport> {
        let mut report = CollectorReport::new(self.name.clone());
        if !self.staging_dir.exists() {
            return Ok(report);
        }
        for path in self.walk_files() {
            match self.upload_file(persistence, &path) {
                Ok(_) => report.persisted += 1,
                Err(e) => report.failed.push((path.display().to_string(), e.to_string())),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceService;

    #[test]
    fn upload_file_persists_resource() {
        let data_dir = tempfile::tempdir().unwrap();
        let staging_dir = tempfile::tempdir().unwrap();
        std::fs::write(staging_dir.path().join("notes.md"), "hello").unwrap();

        let persistence = PersistenceService::new(data_dir.path().to_path_buf()).unwrap();
        let manager = LocalFileManager::new("local", staging_dir.path().to_path_buf());
        manager
            .upload_file(&persistence, &staging_dir.path().join("notes.md"))
            .unwrap();
        assert_eq!(persistence.flush_index().is_ok(), true);
    }

    #[tokio::test]
    async fn collect_walks_staging_dir() {
        let data_dir = tempfile::tempdir().unwrap();
        let staging_dir = tempfile::tempdir().unwrap();
        std::fs::write(staging_dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(staging_dir.path().join("b.txt"), "b").unwrap();

        let persistence = PersistenceService::new(data_dir.path().to_path_buf()).unwrap();
        let manager = LocalFileManager::new("local", staging_dir.path().to_path_buf());
        let report = manager.collect(&persistence).await.unwrap();
        assert_eq!(report.persisted, 2);
    }

    #[tokio::test]
    async fn collect_skips_files_not_matching_patterns() {
        let data_dir = tempfile::tempdir().unwrap();
        let staging_dir = tempfile::tempdir().unwrap();
        std::fs::write(staging_dir.path().join("notes.md"), "a").unwrap();
        std::fs::write(staging_dir.path().join("binary.exe"), "b").unwrap();

        let persistence = PersistenceService::new(data_dir.path().to_path_buf()).unwrap();
        let manager = LocalFileManager::with_patterns("local", staging_dir.path().to_path_buf(), &["*.md".to_string()]);
        let report = manager.collect(&persistence).await.unwrap();
        assert_eq!(report.persisted, 1);
    }
}
