//! Configuration parsing and validation.
//!
//! A2rchi is configured via a single TOML file (default: `config/a2rchi.toml`).
//! It defines the on-disk data path, the collector definitions and their cron
//! schedules, retriever tuning, the pipeline map, and the HTTP server bind
//! address.
//!
//! Secrets (API keys, ticket-system credentials) are never stored inline.
//! Each secret field is resolved from the environment variable named
//! `{FIELD}_FILE`, which must point at a file containing the secret; a
//! missing env var resolves to an empty string, and dependent collectors
//! disable themselves at construction rather than erroring (§6).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub data_manager: DataManagerConfig,
    #[serde(default)]
    pub a2rchi: A2rchiConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataManagerConfig {
    /// Root directory owned by the PersistenceService / CatalogService.
    pub data_path: PathBuf,
    pub collection_name: String,
    pub embedding_name: String,
    #[serde(default = "default_distance_metric")]
    pub distance_metric: String,
    pub chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub reset_collection: bool,
    #[serde(default)]
    pub parallel_workers: Option<usize>,
    #[serde(default)]
    pub stemming: StemmingConfig,
    #[serde(default)]
    pub retrievers: RetrieversConfig,
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
    #[serde(default)]
    pub chunk_cache_dir: Option<PathBuf>,
}

fn default_distance_metric() -> String {
    "cosine".to_string()
}

pub const SUPPORTED_DISTANCE_METRICS: &[&str] = &["l2", "cosine", "ip"];

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StemmingConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetrieversConfig {
    #[serde(default)]
    pub semantic_retriever: SemanticRetrieverConfig,
    #[serde(default)]
    pub bm25_retriever: Bm25RetrieverConfig,
    #[serde(default)]
    pub hybrid_retriever: HybridRetrieverConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SemanticRetrieverConfig {
    #[serde(default = "default_k")]
    pub num_documents_to_retrieve: usize,
}

impl Default for SemanticRetrieverConfig {
    fn default() -> Self {
        Self {
            num_documents_to_retrieve: default_k(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Bm25RetrieverConfig {
    #[serde(default = "default_k")]
    pub num_documents_to_retrieve: usize,
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

impl Default for Bm25RetrieverConfig {
    fn default() -> Self {
        Self {
            num_documents_to_retrieve: default_k(),
            k1: default_k1(),
            b: default_b(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HybridRetrieverConfig {
    #[serde(default = "default_k")]
    pub num_documents_to_retrieve: usize,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_b")]
    pub bm25_b: f64,
}

impl Default for HybridRetrieverConfig {
    fn default() -> Self {
        Self {
            num_documents_to_retrieve: default_k(),
            bm25_weight: default_bm25_weight(),
            semantic_weight: default_semantic_weight(),
            bm25_k1: default_k1(),
            bm25_b: default_b(),
        }
    }
}

fn default_k() -> usize {
    3
}
fn default_k1() -> f64 {
    1.5
}
fn default_b() -> f64 {
    0.75
}
fn default_bm25_weight() -> f64 {
    0.6
}
fn default_semantic_weight() -> f64 {
    0.4
}

/// One entry under `data_manager.sources.<name>`: a collector binding plus
/// its cron schedule.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub kind: CollectorKind,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub input_lists: Vec<PathBuf>,
    #[serde(default)]
    pub filesystem: Option<LocalFileConfig>,
    #[serde(default)]
    pub jira: Option<JiraConfig>,
    #[serde(default)]
    pub redmine: Option<RedmineConfig>,
    #[serde(default)]
    pub git: Option<GitSourceConfig>,
    #[serde(default)]
    pub sso: Option<SsoSourceConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    Scraper,
    Tickets,
    LocalFile,
    Git,
    Sso,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitSourceConfig {
    pub repo_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SsoSourceConfig {
    pub seed_urls: Vec<String>,
    pub secret_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalFileConfig {
    pub staging_dir: PathBuf,
    #[serde(default)]
    pub include_patterns: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JiraConfig {
    pub jira_url: String,
    pub projects: Vec<String>,
    #[serde(default)]
    pub anonymize: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedmineConfig {
    pub redmine_url: String,
    pub project: String,
    pub answer_tag: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct A2rchiConfig {
    #[serde(default)]
    pub pipeline_map: HashMap<String, PipelineConfig>,
    #[serde(default)]
    pub model_class_map: HashMap<String, ModelClassConfig>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub max_tokens: usize,
    #[serde(default)]
    pub prompts: HashMap<String, String>,
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub unprunable_input_variables: Vec<String>,
    #[serde(default = "default_min_history_messages")]
    pub min_history_messages: usize,
    #[serde(default = "default_min_docs")]
    pub min_docs: usize,
    #[serde(default = "default_large_msg_fraction")]
    pub large_msg_fraction: f64,
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,
}

fn default_min_history_messages() -> usize {
    1
}
fn default_min_docs() -> usize {
    1
}
fn default_large_msg_fraction() -> f64 {
    0.5
}
fn default_reserved_tokens() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelClassConfig {
    pub class: String,
    #[serde(default)]
    pub kwargs: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub chromadb: ChromaConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChromaConfig {
    #[serde(default)]
    pub use_http_client: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub local_vstore_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_scheduler_poll_secs")]
    pub scheduler_poll_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            scheduler_poll_secs: default_scheduler_poll_secs(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:7861".to_string()
}
fn default_scheduler_poll_secs() -> u64 {
    1
}

/// Resolve a secret from the `{name}_FILE` environment variable convention.
/// Returns an empty string (never an error) when the variable is unset or
/// the file cannot be read, so dependent collectors can disable themselves.
pub fn resolve_secret(name: &str) -> String {
    let var = format!("{}_FILE", name);
    match std::env::var(&var) {
        Ok(path) => std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
        Err(_) => String::new(),
    }
}

pub fn load_config(path: &std::path::Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| "failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.data_manager.chunk_size == 0 {
        anyhow::bail!("data_manager.chunk_size must be > 0");
    }
    if !SUPPORTED_DISTANCE_METRICS.contains(&config.data_manager.distance_metric.as_str()) {
        anyhow::bail!(
            "data_manager.distance_metric '{}' is not supported; must be one of {:?}",
            config.data_manager.distance_metric,
            SUPPORTED_DISTANCE_METRICS
        );
    }
    let hybrid = &config.data_manager.retrievers.hybrid_retriever;
    if !(0.0..=1.0).contains(&hybrid.bm25_weight) || !(0.0..=1.0).contains(&hybrid.semantic_weight)
    {
        anyhow::bail!("hybrid_retriever weights must be in [0.0, 1.0]");
    }
    for (name, pipeline) in &config.a2rchi.pipeline_map {
        if pipeline.max_tokens == 0 {
            anyhow::bail!("pipeline_map.{name}.max_tokens must be > 0");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_secret_missing_is_empty() {
        std::env::remove_var("TESTSECRET_FILE");
        assert_eq!(resolve_secret("TESTSECRET"), "");
    }

    #[test]
    fn resolve_secret_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.txt");
        std::fs::write(&path, "s3cr3t\n").unwrap();
        std::env::set_var("A2RCHI_TEST_SECRET_FILE", path.to_str().unwrap());
        assert_eq!(resolve_secret("A2RCHI_TEST_SECRET"), "s3cr3t");
        std::env::remove_var("A2RCHI_TEST_SECRET_FILE");
    }

    #[test]
    fn distance_metric_validated() {
        let toml_str = r#"
            [data_manager]
            data_path = "/tmp/a2rchi-data"
            collection_name = "main"
            embedding_name = "stub"
            distance_metric = "manhattan"
            chunk_size = 512
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
