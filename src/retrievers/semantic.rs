//! Dense retrieval: embeds the query (optionally instruction-rewritten) and
//! runs similarity search against the vector collection.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::retrievers::{make_instruction_query, supports_instructions, Retriever};
use crate::vectorstore::{Embedder, ScoredDocument, VectorCollection};

pub struct SemanticRetriever {
    collection: Arc<dyn VectorCollection>,
    embedder: Arc<dyn Embedder>,
    embedding_name: String,
    k: usize,
    instructions: Option<String>,
}

impl SemanticRetriever {
    pub fn new(
        collection: Arc<dyn VectorCollection>,
        embedder: Arc<dyn Embedder>,
        embedding_name: impl Into<String>,
        k: usize,
        instructions: Option<String>,
    ) -> Self {
        Self {
            collection,
            embedder,
            embedding_name: embedding_name.into(),
            k,
            instructions,
        }
    }

    fn effective_query(&self, query: &str) -> String {
        if supports_instructions(&self.embedding_name) {
            if let Some(instructions) = &self.instructions {
                return make_instruction_query(instructions, query);
            }
        }
        query.to_string()
    }
}

#[async_trait]
impl Retriever for SemanticRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>> {
        let effective = self.effective_query(query);
        let embeddings = self.embedder.embed_documents(&[effective])?;
        let query_embedding = embeddings.into_iter().next().unwrap_or_default();
        self.collection.similarity_search_with_score(&query_embedding, self.k)
    }
}
