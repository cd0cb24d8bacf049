//! Sparse lexical retrieval: a hand-rolled BM25 index built from every
//! document currently in the vector collection.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::retrievers::Retriever;
use crate::vectorstore::{ScoredDocument, VectorCollection};

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

struct IndexedDocument {
    doc: ScoredDocument,
    term_counts: HashMap<String, usize>,
    length: usize,
}

struct Bm25Index {
    documents: Vec<IndexedDocument>,
    document_frequency: HashMap<String, usize>,
    average_length: f64,
}

impl Bm25Index {
    fn build(documents: Vec<ScoredDocument>) -> Self {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut indexed = Vec::with_capacity(documents.len());
        let mut total_length = 0usize;

        for doc in documents {
            let tokens = tokenize(&doc.text);
            let mut term_counts: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *term_counts.entry(token.clone()).or_insert(0) += 1;
            }
            for term in term_counts.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            total_length += tokens.len();
            indexed.push(IndexedDocument {
                doc,
                term_counts,
                length: tokens.len(),
            });
        }

        let average_length = if indexed.is_empty() {
            0.0
        } else {
            total_length as f64 / indexed.len() as f64
        };

        Self {
            documents: indexed,
            document_frequency,
            average_length,
        }
    }

    fn score(&self, query_terms: &[String], k1: f64, b: f64) -> Vec<(usize, f64)> {
        let n = self.documents.len() as f64;
        let mut scores = vec![0.0; self.documents.len()];

        for term in query_terms {
            let Some(&df) = self.document_frequency.get(term) else {
                continue;
            };
            let idf = ((n - df as f64 + 0.5) / (df as f64 + 0.5) + 1.0).ln();
            for (i, doc) in self.documents.iter().enumerate() {
                let Some(&tf) = doc.term_counts.get(term) else {
                    continue;
                };
                let tf = tf as f64;
                let norm = 1.0 - b + b * (doc.length as f64 / self.average_length.max(1.0));
                scores[i] += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
    }
}

/// BM25 retriever built from a snapshot of the vector collection's
/// documents. [`ready`] reports whether the corpus was non-empty at build
/// time; callers fall back to semantic-only retrieval when it isn't.
pub struct Bm25LexicalRetriever {
    index: RwLock<Bm25Index>,
    k: usize,
    k1: f64,
    b: f64,
}

impl Bm25LexicalRetriever {
    pub fn build(collection: &Arc<dyn VectorCollection>, k: usize, k1: f64, b: f64) -> Result<Self> {
        let documents = collection.get_all_documents()?;
        Ok(Self {
            index: RwLock::new(Bm25Index::build(documents)),
            k,
            k1,
            b,
        })
    }

    pub fn ready(&self) -> bool {
        !self.index.read().unwrap().documents.is_empty()
    }

    pub fn refresh(&self, collection: &Arc<dyn VectorCollection>) -> Result<()> {
        let documents = collection.get_all_documents()?;
        *self.index.write().unwrap() = Bm25Index::build(documents);
        Ok(())
    }
}

#[async_trait]
impl Retriever for Bm25LexicalRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<ScoredDocument>> {
        let query_terms = tokenize(query);
        let index = self.index.read().unwrap();
        let ranked = index.score(&query_terms, self.k1, self.b);
        Ok(ranked
            .into_iter()
            .take(self.k)
            .map(|(i, score)| {
                let mut doc = index.documents[i].doc.clone();
                doc.score = score;
                doc
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use crate::vectorstore::VectorDocument;

    struct FakeCollection {
        docs: Vec<ScoredDocument>,
    }
    impl VectorCollection for FakeCollection {
        fn get_ids(&self) -> Result<BTreeSet<String>> {
            Ok(BTreeSet::new())
        }
        fn add(&self, _: Vec<VectorDocument>) -> Result<()> {
            Ok(())
        }
        fn delete_by_hash(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn count(&self) -> Result<usize> {
            Ok(self.docs.len())
        }
        fn similarity_search_with_score(&self, _: &[f32], _: usize) -> Result<Vec<ScoredDocument>> {
            Ok(vec![])
        }
        fn get_all_documents(&self) -> Result<Vec<ScoredDocument>> {
            Ok(self.docs.clone())
        }
    }

    fn doc(id: &str, text: &str) -> ScoredDocument {
        ScoredDocument {
            id: id.to_string(),
            text: text.to_string(),
            metadata: BTreeMap::new(),
            score: 0.0,
        }
    }

    #[tokio::test]
    async fn ranks_matching_document_above_unrelated() {
        let collection: Arc<dyn VectorCollection> = Arc::new(FakeCollection {
            docs: vec![
                doc("a", "the quick brown fox jumps over the lazy dog"),
                doc("b", "completely unrelated text about finance"),
            ],
        });
        let retriever = Bm25LexicalRetriever::build(&collection, 2, 1.5, 0.75).unwrap();
        assert!(retriever.ready());

        let results = retriever.retrieve("quick fox").await.unwrap();
        assert_eq!(results[0].id, "a");
    }

    #[test]
    fn empty_corpus_is_not_ready() {
        let collection: Arc<dyn VectorCollection> = Arc::new(FakeCollection { docs: vec![] });
        let retriever = Bm25LexicalRetriever::build(&collection, 2, 1.5, 0.75).unwrap();
        assert!(!retriever.ready());
    }
}
