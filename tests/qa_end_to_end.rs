//! QA-with-one-source: ingest a single local file, reconcile it into a
//! vector collection, then ask a question and confirm the pipeline answers
//! using material pulled from that file.

use a2rchi_core::catalog::CatalogService;
use a2rchi_core::collectors::localfile::LocalFileManager;
use a2rchi_core::collectors::Collector;
use a2rchi_core::config::{Config, DataManagerConfig};
use a2rchi_core::embedding::HashingEmbedder;
use a2rchi_core::llm::EchoAdapter;
use a2rchi_core::persistence::PersistenceService;
use a2rchi_core::pipelines::qa::{QaPipeline, QaPipelineConfig};
use a2rchi_core::pipelines::BasePipeline;
use a2rchi_core::prompt::ValidatedPromptTemplate;
use a2rchi_core::vectorstore::{Embedder, ScoredDocument, VectorCollection, VectorDocument, VectorStoreManager};
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

struct InMemoryCollection {
    documents: RwLock<Vec<VectorDocument>>,
}

impl InMemoryCollection {
    fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)) as f64
    }
}

impl VectorCollection for InMemoryCollection {
    fn get_ids(&self) -> Result<BTreeSet<String>> {
        Ok(self.documents.read().unwrap().iter().map(|d| d.id.clone()).collect())
    }

    fn add(&self, documents: Vec<VectorDocument>) -> Result<()> {
        self.documents.write().unwrap().extend(documents);
        Ok(())
    }

    fn delete_by_hash(&self, hash: &str) -> Result<()> {
        self.documents.write().unwrap().retain(|d| !d.id.starts_with(hash));
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.documents.read().unwrap().len())
    }

    fn similarity_search_with_score(&self, query_embedding: &[f32], k: usize) -> Result<Vec<ScoredDocument>> {
        let docs = self.documents.read().unwrap();
        let mut scored: Vec<ScoredDocument> = docs
            .iter()
            .map(|d| ScoredDocument {
                id: d.id.clone(),
                text: d.text.clone(),
                metadata: d.metadata.clone(),
                score: cosine(query_embedding, &d.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        scored.truncate(k);
        Ok(scored)
    }

    fn get_all_documents(&self) -> Result<Vec<ScoredDocument>> {
        Ok(self
            .documents
            .read()
            .unwrap()
            .iter()
            .map(|d| ScoredDocument {
                id: d.id.clone(),
                text: d.text.clone(),
                metadata: d.metadata.clone(),
                score: 0.0,
            })
            .collect())
    }
}

fn make_config(data_path: std::path::PathBuf) -> Config {
    Config {
        data_manager: DataManagerConfig {
            data_path,
            collection_name: "main".to_string(),
            embedding_name: "hashing".to_string(),
            distance_metric: "cosine".to_string(),
            chunk_size: 256,
            chunk_overlap: 0,
            reset_collection: false,
            parallel_workers: Some(2),
            stemming: Default::default(),
            retrievers: Default::default(),
            sources: Default::default(),
            chunk_cache_dir: None,
        },
        a2rchi: Default::default(),
        services: Default::default(),
        server: Default::default(),
    }
}

fn make_pipeline(embedder: Arc<dyn Embedder>) -> QaPipeline {
    let condense_template = ValidatedPromptTemplate::new("condense", "History: {history}\nQ: {question}", None).unwrap();
    let chat_template =
        ValidatedPromptTemplate::new("chat", "Docs: {retriever_output}\nQ: {condensed_output}", None).unwrap();
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
        reserved_tokens: 100,
        min_history_messages: 1,
        min_docs: 1,
        large_msg_fraction: 0.9,
        unprunable_input_variables: Vec::new(),
    };
    QaPipeline::new(Arc::new(EchoAdapter), Arc::new(EchoAdapter), embedder, config)
}

#[tokio::test]
async fn ingests_one_source_and_answers_from_it() {
    let data_dir = tempfile::tempdir().unwrap();
    let staging_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        staging_dir.path().join("runbook.md"),
        "The cluster restart procedure requires draining queues before a rolling restart.",
    )
    .unwrap();

    let persistence = PersistenceService::new(data_dir.path().to_path_buf()).unwrap();
    let manager = LocalFileManager::new("local", staging_dir.path().to_path_buf());
    let report = manager.collect(&persistence).await.unwrap();
    assert_eq!(report.persisted, 1);

    let catalog = Arc::new(CatalogService::new(data_dir.path().to_path_buf()));
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(32));
    let collection = Arc::new(InMemoryCollection::new());
    let config = make_config(data_dir.path().to_path_buf());

    let vectorstore_manager = VectorStoreManager::new(&config, catalog, collection.clone(), embedder.clone()).unwrap();
    let reconciliation = vectorstore_manager.update_vectorstore().await.unwrap();
    assert_eq!(reconciliation.added, 1);
    assert!(reconciliation.failed.is_empty());
    assert!(collection.count().unwrap() > 0);

    let mut pipeline = make_pipeline(embedder);
    pipeline.update_retriever(collection);
    let output = pipeline.invoke("how do I restart the cluster?", &[]).await.unwrap();

    assert!(output.answer.starts_with("echo:"));
    assert!(output.answer.contains("restart"));
    assert_eq!(output.metadata.get("question").unwrap(), "how do I restart the cluster?");
}
