//! # A2rchi
//!
//! Ingestion, storage, and retrieval substrate for a retrieval-augmented QA
//! platform: collectors pull source material into a content-addressed
//! catalog, a vectorstore manager reconciles that catalog against an
//! embedding index, and pipelines answer questions against it.
//!
//! ## Architecture
//!
//! ```text
//! Collectors → PersistenceService/CatalogService → VectorStoreManager → Retrievers → Pipelines → CLI / HTTP server
//! ```

use a2rchi_core::catalog::CatalogService;
use a2rchi_core::collectors::localfile::LocalFileManager;
use a2rchi_core::collectors::tickets::{JiraClient, RedmineClient, TicketManager};
use a2rchi_core::collectors::web::WebScraper;
use a2rchi_core::collectors::{git::GitScraper, sso::SsoCollector, Collector};
use a2rchi_core::config::{self, CollectorKind, Config};
use a2rchi_core::embedding::HashingEmbedder;
use a2rchi_core::llm::EchoAdapter;
use a2rchi_core::persistence::PersistenceService;
use a2rchi_core::pipelines::qa::{QaPipeline, QaPipelineConfig};
use a2rchi_core::pipelines::BasePipeline;
use a2rchi_core::prompt::ValidatedPromptTemplate;
use a2rchi_core::vectorstore::{Embedder, VectorStoreManager};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "a2rchi", about = "Retrieval-augmented QA platform substrate", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/a2rchi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured collector once and persist what they find.
    Ingest {
        /// Run only this source by name, instead of every configured source.
        source: Option<String>,
    },

    /// Reconcile the vectorstore against the current catalog.
    Sync,

    /// Start the scheduler and HTTP server.
    Serve,

    /// Ask a single question against the configured pipeline and print the answer.
    Ask {
        question: String,
    },
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "a2rchi_core=info,a2rchi=info,tower_http=info".into());
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    tracing_subscriber::registry().with(env_filter).with(stdout_layer).init();
}

fn build_persistence(config: &Config) -> Result<PersistenceService> {
    PersistenceService::new(config.data_manager.data_path.clone())
}

fn build_collector(name: &str, config: &Config) -> Result<Box<dyn Collector>> {
    let source = config
        .data_manager
        .sources
        .get(name)
        .with_context(|| format!("unknown source '{name}'"))?;
    match source.kind {
        CollectorKind::Scraper => {
            let seeds: Vec<String> = source
                .input_lists
                .iter()
                .filter_map(|p| std::fs::read_to_string(p).ok())
                .flat_map(|s| s.lines().map(|l| l.trim().to_string()).collect::<Vec<_>>())
                .filter(|l| !l.is_empty())
                .collect();
            Ok(Box::new(WebScraper::new(name.to_string(), seeds)))
        }
        CollectorKind::Tickets => {
            if let Some(jira) = &source.jira {
                let client = JiraClient::new(jira.jira_url.clone(), jira.projects.clone());
                Ok(Box::new(TicketManager::jira(name.to_string(), client, jira.anonymize)))
            } else if let Some(redmine) = &source.redmine {
                let client = RedmineClient::new(redmine.redmine_url.clone(), redmine.project.clone(), redmine.answer_tag.clone());
                Ok(Box::new(TicketManager::redmine(name.to_string(), client)))
            } else {
                bail!("source '{name}' declares kind = tickets but no jira/redmine block")
            }
        }
        CollectorKind::LocalFile => {
            let local = source
                .filesystem
                .as_ref()
                .with_context(|| format!("source '{name}' declares kind = local_file but no filesystem block"))?;
            Ok(Box::new(LocalFileManager::with_patterns(
                name.to_string(),
                local.staging_dir.clone(),
                &local.include_patterns,
            )))
        }
        CollectorKind::Git => {
            let git = source
                .git
                .as_ref()
                .with_context(|| format!("source '{name}' declares kind = git but no git block"))?;
            Ok(Box::new(GitScraper::new(name.to_string(), git.repo_url.clone())))
        }
        CollectorKind::Sso => {
            let sso = source
                .sso
                .as_ref()
                .with_context(|| format!("source '{name}' declares kind = sso but no sso block"))?;
            Ok(Box::new(SsoCollector::new(name.to_string(), sso.seed_urls.clone(), &sso.secret_name)))
        }
    }
}

async fn run_ingest(config: &Config, only: Option<&str>) -> Result<()> {
    let persistence = build_persistence(config)?;
    let names: Vec<String> = match only {
        Some(name) => vec![name.to_string()],
        None => config.data_manager.sources.keys().cloned().collect(),
    };
    for name in names {
        let collector = build_collector(&name, config)?;
        let report = collector.collect(&persistence).await?;
        tracing::info!(source = %name, persisted = report.persisted, failed = report.failed.len(), "collector finished");
        for (item, reason) in &report.failed {
            tracing::warn!(source = %name, item, reason, "collector item failed");
        }
    }
    Ok(())
}

struct NullCollection;
impl a2rchi_core::vectorstore::VectorCollection for NullCollection {
    fn get_ids(&self) -> Result<std::collections::BTreeSet<String>> {
        Ok(Default::default())
    }
    fn add(&self, _: Vec<a2rchi_core::vectorstore::VectorDocument>) -> Result<()> {
        Ok(())
    }
    fn delete_by_hash(&self, _: &str) -> Result<()> {
        Ok(())
    }
    fn count(&self) -> Result<usize> {
        Ok(0)
    }
    fn similarity_search_with_score(&self, _: &[f32], _: usize) -> Result<Vec<a2rchi_core::vectorstore::ScoredDocument>> {
        Ok(Vec::new())
    }
    fn get_all_documents(&self) -> Result<Vec<a2rchi_core::vectorstore::ScoredDocument>> {
        Ok(Vec::new())
    }
}

async fn run_sync(config: &Config) -> Result<()> {
    let catalog = Arc::new(CatalogService::new(config.data_manager.data_path.clone()));
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
    let collection = Arc::new(NullCollection);
    let manager = VectorStoreManager::new(config, catalog, collection, embedder)?;
    manager.delete_existing_collection_if_reset(config.data_manager.reset_collection)?;
    let report = manager.update_vectorstore().await?;
    tracing::info!(added = report.added, removed = report.removed, failed = report.failed.len(), "vectorstore reconciled");
    Ok(())
}

fn build_default_pipeline() -> QaPipeline {
    let condense_template = ValidatedPromptTemplate::new(
        "condense",
        "Given the conversation so far: {full_history}\nRephrase the latest question as a standalone question: {question}",
        None,
    )
    .expect("built-in condense template is valid");
    let chat_template = ValidatedPromptTemplate::new(
        "chat",
        "Context:\n{retriever_output}\n\nQuestion: {condensed_output}",
        None,
    )
    .expect("built-in chat template is valid");
    let config = QaPipelineConfig {
        condense_template,
        chat_template,
        embedding_name: "hashing".to_string(),
        instructions: None,
        num_documents: 3,
        bm25_weight: 0.5,
        semantic_weight: 0.5,
        bm25_k1: 1.5,
        bm25_b: 0.75,
        max_tokens: 4000,
        reserved_tokens: 256,
        min_history_messages: 1,
        min_docs: 1,
        large_msg_fraction: 0.5,
        unprunable_input_variables: Vec::new(),
    };
    QaPipeline::new(Arc::new(EchoAdapter), Arc::new(EchoAdapter), Arc::new(HashingEmbedder::new(64)), config)
}

async fn run_ask(question: &str) -> Result<()> {
    let mut pipeline = build_default_pipeline();
    pipeline.update_retriever(Arc::new(NullCollection));
    let output = pipeline.invoke(question, &[]).await?;
    println!("{}", output.answer);
    Ok(())
}

/// Register one scheduler job per source that declares a `schedule`. Each
/// job runs that source's collector, then reconciles the vectorstore against
/// the updated catalog; the scheduler's own ingestion lock (`CronScheduler::tick`)
/// already serializes this against every other scheduled job, so collectors
/// never race each other to write the catalog.
async fn register_collector_jobs(scheduler: &Arc<a2rchi_core::scheduler::CronScheduler>, config: &Config) -> Result<()> {
    for (name, source) in &config.data_manager.sources {
        let Some(cron_expr) = source.schedule.clone() else {
            continue;
        };
        let job_name = name.clone();
        let job_config = config.clone();
        scheduler
            .register(
                job_name.clone(),
                &cron_expr,
                Arc::new(move || {
                    let job_name = job_name.clone();
                    let job_config = job_config.clone();
                    Box::pin(async move {
                        run_ingest(&job_config, Some(&job_name)).await?;
                        run_sync(&job_config).await
                    })
                }),
            )
            .await
            .with_context(|| format!("failed to register scheduled job for source '{name}'"))?;
    }
    Ok(())
}

async fn run_serve(config: &Config) -> Result<()> {
    let mut pipelines: HashMap<String, Box<dyn BasePipeline>> = HashMap::new();
    let mut default_pipeline = build_default_pipeline();
    default_pipeline.update_retriever(Arc::new(NullCollection));
    pipelines.insert("qa".to_string(), Box::new(default_pipeline));

    struct StaticConnector;
    impl a2rchi_core::facade::VectorstoreConnector for StaticConnector {
        fn connect(&self) -> Result<Arc<dyn a2rchi_core::vectorstore::VectorCollection>> {
            Ok(Arc::new(NullCollection))
        }
    }

    let a2rchi = Arc::new(a2rchi_core::facade::A2rchi::new(pipelines, Arc::new(StaticConnector), "qa"));
    let state = a2rchi_core::server::AppState {
        a2rchi,
        conversation_owners: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
    };
    let router = a2rchi_core::server::build_router(state);

    let scheduler = a2rchi_core::scheduler::CronScheduler::new(std::time::Duration::from_secs(config.server.scheduler_poll_secs));
    register_collector_jobs(&scheduler, config).await?;
    scheduler.start();

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "a2rchi server listening");
    axum::serve(listener, router).await.context("server loop failed")?;
    scheduler.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { source } => run_ingest(&config, source.as_deref()).await,
        Commands::Sync => run_sync(&config).await,
        Commands::Serve => run_serve(&config).await,
        Commands::Ask { question } => run_ask(&question).await,
    }
}
