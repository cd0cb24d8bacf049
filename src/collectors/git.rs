//! Git scraping: clone a repository, parse its `mkdocs.yml` navigation (if
//! present) to find documentation pages, and persist one resource per file
//! along with per-file commit metadata.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use crate::collectors::{Collector, CollectorReport};
use crate::persistence::PersistenceService;
use crate::resource::{ResourceContent, ScrapedResource};

pub struct GitScraper {
    name: String,
    repo_url: String,
}

impl GitScraper {
    pub fn new(name: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo_url: repo_url.into(),
        }
    }

    /// Clone into a scratch temp dir, walk doc files (parsing `mkdocs.yml`
    /// navigation when present to scope which files count as docs), and
    /// persist each one. The clone is always removed, even on error.
    pub fn collect_sync(&self, persistence: &PersistenceService) -> Result<CollectorReport> {
        let mut report = CollectorReport::new(self.name.clone());
        let tmp = tempfile::tempdir().context("failed to create scratch dir for git clone")?;

        let clone_result = Command::new("git")
            .args(["clone", "--depth", "1", &self.repo_url, "repo"])
            .current_dir(tmp.path())
            .output();

        let repo_dir = tmp.path().join("repo");
        let clone_ok = matches!(&clone_result, Ok(out) if out.status.success());
        if !clone_ok {
            let reason = match clone_result {
                Ok(out) => String::from_utf8_lossy(&out.stderr).to_string(),
                Err(e) => e.to_string(),
            };
            report.failed.push((self.repo_url.clone(), reason));
            return Ok(report);
        }

        let doc_paths = select_doc_paths(&repo_dir);
        for rel_path in doc_paths {
            let abs_path = repo_dir.join(&rel_path);
            let content = match std::fs::read_to_string(&abs_path) {
                Ok(c) => c,
                Err(e) => {
                    report.failed.push((rel_path.display().to_string(), e.to_string()));
                    continue;
                }
            };
            let commit_info = last_commit_metadata(&repo_dir, &rel_path);
            let url = format!("{}/blob/main/{}", self.repo_url.trim_end_matches(".git"), rel_path.display());
            let suffix = rel_path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_else(|| "txt".to_string());

            let resource = ScrapedResource {
                url: url.clone(),
                payload: ResourceContent::Text(content),
                suffix,
                source_type: "git".to_string(),
                extra_metadata: commit_info,
            };
            match persistence.persist(&resource, Path::new("git"), true) {
                Ok(_) => report.persisted += 1,
                Err(e) => report.failed.push((url, e.to_string())),
            }
        }

        Ok(report)
    }
}

/// Files referenced under `mkdocs.yml`'s `nav:` section, or (when absent) a
/// flat walk of every markdown file in the repository.
fn select_doc_paths(repo_dir: &Path) -> Vec<std::path::PathBuf> {
    let mkdocs_path = repo_dir.join("mkdocs.yml");
    if let Ok(content) = std::fs::read_to_string(&mkdocs_path) {
        if let Ok(value) = serde_yaml::from_str::<serde_yaml::Value>(&content) {
            let mut paths = Vec::new();
            collect_nav_paths(&value, &mut paths);
            if !paths.is_empty() {
                return paths.into_iter().map(std::path::PathBuf::from).collect();
            }
        }
    }

    walkdir::WalkDir::new(repo_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|x| x == "md").unwrap_or(false))
        .filter_map(|e| e.path().strip_prefix(repo_dir).ok().map(|p| p.to_path_buf()))
        .collect()
}

fn collect_nav_paths(value: &serde_yaml::Value, out: &mut Vec<String>) {
    match value {
        serde_yaml::Value::String(s) if s.ends_with(".md") => out.push(s.clone()),
        serde_yaml::Value::Sequence(seq) => seq.iter().for_each(|v| collect_nav_paths(v, out)),
        serde_yaml::Value::Mapping(map) => map.values().for_each(|v| collect_nav_paths(v, out)),
        _ => {}
    }
}

fn last_commit_metadata(repo_dir: &Path, rel_path: &Path) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();
    let output = Command::new("git")
        .args(["log", "-1", "--format=%H%n%an%n%aI", "--", &rel_path.to_string_lossy()])
        .current_dir(repo_dir)
        .output();
    if let Ok(output) = output {
        let text = String::from_utf8_lossy(&output.stdout);
        let mut lines = text.lines();
        if let Some(hash) = lines.next() {
            metadata.insert("commit_hash".to_string(), hash.to_string());
        }
        if let Some(author) = lines.next() {
            metadata.insert("commit_author".to_string(), author.to_string());
        }
        if let Some(date) = lines.next() {
            metadata.insert("commit_date".to_string(), date.to_string());
        }
    }
    metadata
}

#[async_trait]
impl Collector for GitScraper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, persistence: &PersistenceService) -> Result<CollectorReport> {
        self.collect_sync(persistence)
    }
}
