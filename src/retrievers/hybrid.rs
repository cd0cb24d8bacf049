//! Linear combination of dense and sparse retrieval. Falls back to
//! semantic-only when the BM25 corpus is empty (nothing has been indexed
//! yet, or the collection was just reset).

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::retrievers::bm25::Bm25LexicalRetriever;
use crate::retrievers::semantic::SemanticRetriever;
use crate::retrievers::Retriever;
use crate::vectorstore::ScoredDocument;

pub struct HybridRetriever {
    semantic: SemanticRetriever,
    bm25: Bm25LexicalRetriever,
    bm25_weight: f64,
    semantic_weight: f64,
    k: usize,
}

impl HybridRetriever {
    pub fn new(
        semantic: SemanticRetriever,
        bm25: Bm25LexicalRetriever,
        bm25_weight: f64,
        semantic_weight: f64,
        k: usize,
    ) -> Self {
        Self {
            semantic,
            bm25,
            bm25_weight,
            semantic_weight,
            k,
        }
    }

    /// Combine per-retriever rankings into one ranking per document id.
    ///
    /// The weighted sum of the two differently-scaled retrieval scores
    /// (dense similarity vs. BM25) decides ordering only; every returned
    /// document's `score` field is overwritten with a fixed `-1.0`
    /// placeholder, since the combined value is not a calibrated score a
    /// caller could compare across queries or display as confidence.
    /// Documents seen by only one retriever seed their rank at `-1.0`
    /// before adding their one-sided contribution, so they still surface
    /// but always rank below anything found by both.
    fn compute_hybrid_scores(
        &self,
        semantic_results: &[ScoredDocument],
        bm25_results: &[ScoredDocument],
    ) -> Vec<ScoredDocument> {
        let mut combined: HashMap<String, ScoredDocument> = HashMap::new();
        let mut ranks: HashMap<String, f64> = HashMap::new();

        for doc in semantic_results {
            ranks.insert(doc.id.clone(), self.semantic_weight * doc.score);
            combined.insert(doc.id.clone(), doc.clone());
        }
        for doc in bm25_results {
            let entry = ranks.entry(doc.id.clone()).or_insert(-1.0);
            *entry += self.bm25_weight * doc.score;
            combined.entry(doc.id.clone()).or_insert_with(|| doc.clone());
        }

        let mut ranked: Vec<(f64, ScoredDocument)> = combined
            .into_iter()
            .map(|(id, doc)| (*ranks.get(&id).unwrap_or(&-1.0), doc))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .map(|(_, mut doc)| {
                doc.score = -1.0;
                doc
            })
            .collect()
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>> {
        let semantic_results = self.semantic.retrieve(query).await?;
        if !self.bm25.ready() {
            return Ok(semantic_results.into_iter().take(self.k).collect());
        }
        let bm25_results = self.bm25.retrieve(query).await?;
        let combined = self.compute_hybrid_scores(&semantic_results, &bm25_results);
        Ok(combined.into_iter().take(self.k).collect())
    }
}
