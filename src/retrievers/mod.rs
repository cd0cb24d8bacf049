//! Retrieval strategies over a vector collection: dense semantic search,
//! sparse BM25, a hybrid combination of the two, and a plain grading
//! variant used only by the grading pipeline.

pub mod bm25;
pub mod hybrid;
pub mod semantic;

use anyhow::Result;
use async_trait::async_trait;

use crate::vectorstore::ScoredDocument;

/// Anything that can answer "these are the top-k documents for this query".
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>>;
}

/// Embedding models known to support instruction-prefixed queries. Queries
/// sent to these models are rewritten with [`make_instruction_query`]
/// before embedding; all other models are queried verbatim.
pub const INSTRUCTION_AWARE_MODELS: &[&str] = &[
    "Qwen/Qwen3-Embedding-0.6B",
    "Qwen/Qwen3-Embedding-4B",
    "Qwen/Qwen3-Embedding-8B",
];

pub fn supports_instructions(embedding_name: &str) -> bool {
    INSTRUCTION_AWARE_MODELS.contains(&embedding_name)
}

pub fn make_instruction_query(instructions: &str, query: &str) -> String {
    format!("Instruct: {instructions}\nQuery:{query}")
}

/// Plain similarity-search wrapper used by the grading pipeline, which
/// needs raw top-k context without instruction rewriting or hybrid scoring.
pub struct GradingRetriever {
    collection: std::sync::Arc<dyn crate::vectorstore::VectorCollection>,
    embedder: std::sync::Arc<dyn crate::vectorstore::Embedder>,
    k: usize,
}

impl GradingRetriever {
    pub fn new(
        collection: std::sync::Arc<dyn crate::vectorstore::VectorCollection>,
        embedder: std::sync::Arc<dyn crate::vectorstore::Embedder>,
        k: usize,
    ) -> Self {
        Self { collection, embedder, k }
    }
}

#[async_trait]
impl Retriever for GradingRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>> {
        let embedding = self.embedder.embed_documents(&[query.to_string()])?;
        let query_embedding = embedding.into_iter().next().unwrap_or_default();
        self.collection.similarity_search_with_score(&query_embedding, self.k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_aware_models_are_recognized() {
        assert!(supports_instructions("Qwen/Qwen3-Embedding-0.6B"));
        assert!(!supports_instructions("text-embedding-3-small"));
    }

    #[test]
    fn make_instruction_query_formats_exactly() {
        assert_eq!(
            make_instruction_query("Find the answer", "what is X?"),
            "Instruct: Find the answer\nQuery:what is X?"
        );
    }
}
