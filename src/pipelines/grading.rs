//! Summary → analysis → final grade, with an optional vectorstore-backed
//! context lookup in between.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::llm::{ChatMessage, LlmAdapter};
use crate::pipelines::{BasePipeline, HistoryTurn, PipelineOutput};
use crate::prompt::ValidatedPromptTemplate;
use crate::retrievers::GradingRetriever;
use crate::retrievers::Retriever;
use crate::vectorstore::{Embedder, VectorCollection};

pub struct GradingPipelineConfig {
    pub summary_template: Option<ValidatedPromptTemplate>,
    pub analysis_template: Option<ValidatedPromptTemplate>,
    pub final_grade_template: ValidatedPromptTemplate,
    pub rubric: String,
    pub num_context_documents: usize,
}

pub struct GradingPipeline {
    llm: Arc<dyn LlmAdapter>,
    embedder: Arc<dyn Embedder>,
    config: GradingPipelineConfig,
    collection: Option<Arc<dyn VectorCollection>>,
}

impl GradingPipeline {
    pub fn new(llm: Arc<dyn LlmAdapter>, embedder: Arc<dyn Embedder>, config: GradingPipelineConfig) -> Self {
        Self {
            llm,
            embedder,
            config,
            collection: None,
        }
    }

    fn run_step(&self, template: &ValidatedPromptTemplate, values: &HashMap<String, String>) -> Result<String> {
        let filled = template.fill(values);
        self.llm.invoke(&[ChatMessage::new("user", filled)]).context("grading chain step failed")
    }

    /// Run the grading chain over `submission_text`, optionally pulling
    /// supporting context from the collection set via `update_retriever`.
    pub async fn grade(&self, submission_text: &str) -> Result<PipelineOutput> {
        let mut values = HashMap::new();
        values.insert("question".to_string(), submission_text.to_string());

        let context_documents = match &self.collection {
            Some(collection) => {
                let retriever = GradingRetriever::new(collection.clone(), self.embedder.clone(), self.config.num_context_documents);
                retriever.retrieve(submission_text).await.unwrap_or_default()
            }
            None => Vec::new(),
        };
        let context_text = context_documents.iter().map(|d| d.text.clone()).collect::<Vec<_>>().join("\n\n");
        values.insert("retriever_output".to_string(), context_text);

        let summary = match &self.config.summary_template {
            Some(template) => Some(self.run_step(template, &values)?),
            None => None,
        };
        if let Some(summary) = &summary {
            values.insert("condensed_output".to_string(), summary.clone());
        }

        let analysis = match &self.config.analysis_template {
            Some(template) => Some(self.run_step(template, &values)?),
            None => None,
        };
        if let Some(analysis) = &analysis {
            values.insert("full_history".to_string(), analysis.clone());
        }

        values.insert("history".to_string(), self.config.rubric.clone());
        let grade = self.run_step(&self.config.final_grade_template, &values)?;

        let mut metadata = BTreeMap::new();
        if let Some(summary) = summary {
            metadata.insert("summary".to_string(), summary);
        }
        if let Some(analysis) = analysis {
            metadata.insert("analysis".to_string(), analysis);
        }

        Ok(PipelineOutput {
            answer: grade,
            source_documents: context_documents,
            metadata,
        })
    }
}

#[async_trait]
impl BasePipeline for GradingPipeline {
    fn update_retriever(&mut self, collection: Arc<dyn VectorCollection>) {
        self.collection = Some(collection);
    }

    async fn invoke(&self, question: &str, _history: &[HistoryTurn]) -> Result<PipelineOutput> {
        self.grade(question).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::llm::EchoAdapter;

    fn make_pipeline() -> GradingPipeline {
        let final_grade_template = ValidatedPromptTemplate::new("grade", "Rubric: {history}\nSubmission: {question}", None).unwrap();
        let config = GradingPipelineConfig {
            summary_template: Some(ValidatedPromptTemplate::new("summary", "Summarize: {question}", None).unwrap()),
            analysis_template: None,
            final_grade_template,
            rubric: "award partial credit".to_string(),
            num_context_documents: 3,
        };
        GradingPipeline::new(Arc::new(EchoAdapter), Arc::new(HashingEmbedder::new(8)), config)
    }

    #[tokio::test]
    async fn grade_without_collection_skips_context() {
        let pipeline = make_pipeline();
        let output = pipeline.grade("student answer text").await.unwrap();
        assert!(output.source_documents.is_empty());
        assert!(output.metadata.contains_key("summary"));
    }
}
