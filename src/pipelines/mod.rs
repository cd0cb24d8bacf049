//! Pipelines: the end-to-end request handlers the façade dispatches to.

pub mod agent;
pub mod grading;
pub mod image;
pub mod qa;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::vectorstore::{ScoredDocument, VectorCollection};

/// The result of a single pipeline invocation, returned to the façade.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub answer: String,
    pub source_documents: Vec<ScoredDocument>,
    pub metadata: BTreeMap<String, String>,
}

impl PipelineOutput {
    pub fn simple(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            source_documents: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A single turn in a conversation, as handed to a pipeline.
pub type HistoryTurn = (String, String);

/// Shared contract for every pipeline the façade can dispatch to.
/// `update_retriever` is called once per request with a freshly materialized
/// collection handle, since pipelines are long-lived but collections are
/// not (see [`crate::facade::A2rchi`]).
#[async_trait]
pub trait BasePipeline: Send + Sync {
    fn update_retriever(&mut self, collection: std::sync::Arc<dyn VectorCollection>);

    async fn invoke(&self, question: &str, history: &[HistoryTurn]) -> Result<PipelineOutput>;
}

/// Split a flat history list into `(question, history, full_history)`: the
/// latest turn's question, the history preceding it, and the full list
/// including it.
pub fn split_history(history: &[HistoryTurn]) -> (String, Vec<HistoryTurn>, Vec<HistoryTurn>) {
    let full_history = history.to_vec();
    match history.split_last() {
        Some((last, rest)) => (last.0.clone(), rest.to_vec(), full_history),
        None => (String::new(), Vec::new(), full_history),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_history_separates_latest_question() {
        let history = vec![
            ("what is A?".to_string(), "A is...".to_string()),
            ("what is B?".to_string(), String::new()),
        ];
        let (question, prior, full) = split_history(&history);
        assert_eq!(question, "what is B?");
        assert_eq!(prior.len(), 1);
        assert_eq!(full.len(), 2);
    }

    #[test]
    fn split_history_handles_empty_input() {
        let (question, prior, full) = split_history(&[]);
        assert_eq!(question, "");
        assert!(prior.is_empty());
        assert!(full.is_empty());
    }
}
