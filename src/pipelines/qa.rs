//! Condense → hybrid-retrieve → chat, the primary chat pipeline.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::llm::{ChatMessage, LlmAdapter};
use crate::pipelines::{split_history, BasePipeline, HistoryTurn, PipelineOutput};
use crate::prompt::ValidatedPromptTemplate;
use crate::retrievers::bm25::Bm25LexicalRetriever;
use crate::retrievers::hybrid::HybridRetriever;
use crate::retrievers::semantic::SemanticRetriever;
use crate::retrievers::Retriever;
use crate::token_limiter::{effective_budget, ChainInput, ChainWrapper, TokenLimiter};
use crate::vectorstore::{Embedder, VectorCollection};

pub struct QaPipelineConfig {
    pub condense_template: ValidatedPromptTemplate,
    pub chat_template: ValidatedPromptTemplate,
    pub embedding_name: String,
    pub instructions: Option<String>,
    pub num_documents: usize,
    pub bm25_weight: f64,
    pub semantic_weight: f64,
    pub bm25_k1: f64,
    pub bm25_b: f64,
    /// `data_manager.pipeline_map.<name>.max_tokens`: the configured budget
    /// cap fed into `effective_budget` ahead of every chain call.
    pub max_tokens: usize,
    pub reserved_tokens: usize,
    pub min_history_messages: usize,
    pub min_docs: usize,
    pub large_msg_fraction: f64,
    pub unprunable_input_variables: Vec<String>,
}

pub struct QaPipeline {
    condense_llm: Arc<dyn LlmAdapter>,
    chat_llm: Arc<dyn LlmAdapter>,
    embedder: Arc<dyn Embedder>,
    config: QaPipelineConfig,
    collection: Option<Arc<dyn VectorCollection>>,
}

impl QaPipeline {
    pub fn new(
        condense_llm: Arc<dyn LlmAdapter>,
        chat_llm: Arc<dyn LlmAdapter>,
        embedder: Arc<dyn Embedder>,
        config: QaPipelineConfig,
    ) -> Self {
        Self {
            condense_llm,
            chat_llm,
            embedder,
            config,
            collection: None,
        }
    }

    /// Budget-prune `inputs` and fill `template` with the survivors via
    /// `ChainWrapper`, or return the fixed short-circuit message when an
    /// unprunable input alone exceeds budget (§4.7: no LLM call in that case).
    fn prepare_prompt(
        &self,
        llm: &dyn LlmAdapter,
        template: &ValidatedPromptTemplate,
        inputs: Vec<ChainInput>,
        required: Vec<String>,
        unprunable: Vec<String>,
    ) -> Result<Result<String, String>> {
        let template_tokens = llm.get_num_tokens(&template.tagged_template);
        let budget = effective_budget(self.config.max_tokens, usize::MAX, self.config.reserved_tokens, template_tokens);
        let limiter = TokenLimiter::new(
            llm,
            unprunable,
            self.config.min_history_messages,
            self.config.min_docs,
            self.config.large_msg_fraction,
        );
        let wrapper = ChainWrapper::new(limiter, required);
        match wrapper.prepare(HashMap::new(), inputs, budget) {
            Ok(payload) => Ok(Ok(template.fill(&payload))),
            Err(message) => Ok(Err(message)),
        }
    }

    /// `Ok(Ok(condensed))` on a normal condense call, `Ok(Err(message))` when
    /// the question alone already exceeds budget (§4.7 short-circuit: no LLM
    /// call), `Err(_)` on a real chain failure.
    fn condense(&self, question: &str, history: &[HistoryTurn]) -> Result<Result<String, String>> {
        if history.is_empty() {
            return Ok(Ok(question.to_string()));
        }
        let history_messages: Vec<ChatMessage> = history
            .iter()
            .flat_map(|(q, a)| vec![ChatMessage::new("user", q.clone()), ChatMessage::new("assistant", a.clone())])
            .collect();
        let inputs = vec![ChainInput::Question(question.to_string()), ChainInput::History(history_messages)];
        let unprunable = self.config.unprunable_input_variables.clone();
        let filled = match self.prepare_prompt(
            self.condense_llm.as_ref(),
            &self.config.condense_template,
            inputs,
            vec!["question".to_string(), "history".to_string()],
            unprunable,
        )? {
            Ok(filled) => filled,
            Err(message) => return Ok(Err(message)),
        };
        self.condense_llm
            .invoke(&[ChatMessage::new("user", filled)])
            .context("condense chain failed")
            .map(Ok)
    }
}

#[async_trait]
impl BasePipeline for QaPipeline {
    fn update_retriever(&mut self, collection: Arc<dyn VectorCollection>) {
        self.collection = Some(collection);
    }

    async fn invoke(&self, question: &str, history: &[HistoryTurn]) -> Result<PipelineOutput> {
        let collection = self
            .collection
            .clone()
            .context("QaPipeline invoked before update_retriever")?;
        let (_, prior_history, _) = split_history(history);

        let condensed = match self.condense(question, &prior_history)? {
            Ok(condensed) => condensed,
            Err(message) => return Ok(PipelineOutput::simple(message)),
        };

        let semantic = SemanticRetriever::new(
            collection.clone(),
            self.embedder.clone(),
            self.config.embedding_name.clone(),
            self.config.num_documents,
            self.config.instructions.clone(),
        );
        let bm25 = Bm25LexicalRetriever::build(
            &collection,
            self.config.num_documents,
            self.config.bm25_k1,
            self.config.bm25_b,
        )?;
        let retriever = HybridRetriever::new(
            semantic,
            bm25,
            self.config.bm25_weight,
            self.config.semantic_weight,
            self.config.num_documents,
        );
        let documents = retriever.retrieve(&condensed).await?;

        // condensed_output stands in for the question at this stage, so it
        // is always protected from pruning alongside any configured unprunables.
        let mut chat_unprunable = self.config.unprunable_input_variables.clone();
        chat_unprunable.push("condensed_output".to_string());
        let chat_inputs = vec![
            ChainInput::Extra("condensed_output".to_string(), condensed.clone()),
            ChainInput::Documents(documents.clone()),
        ];
        let filled = match self.prepare_prompt(
            self.chat_llm.as_ref(),
            &self.config.chat_template,
            chat_inputs,
            vec!["question".to_string(), "condensed_output".to_string(), "retriever_output".to_string()],
            chat_unprunable,
        )? {
            Ok(filled) => filled,
            Err(message) => return Ok(PipelineOutput::simple(message)),
        };

        let answer = self
            .chat_llm
            .invoke(&[ChatMessage::new("user", filled)])
            .context("chat chain failed")?;

        let mut metadata = BTreeMap::new();
        metadata.insert("condensed_output".to_string(), condensed);
        metadata.insert("question".to_string(), question.to_string());
        metadata.insert(
            "retriever_scores".to_string(),
            documents.iter().map(|d| d.score.to_string()).collect::<Vec<_>>().join(","),
        );

        Ok(PipelineOutput {
            answer,
            source_documents: documents,
            metadata,
        })
    }
}
