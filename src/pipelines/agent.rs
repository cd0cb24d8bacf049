//! ReAct-style agent loop: a chat LLM alternates between emitting tool calls
//! and reading their results until it emits a final answer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use crate::catalog::CatalogService;
use crate::llm::{ChatMessage, LlmAdapter};
use crate::pipelines::{BasePipeline, HistoryTurn, PipelineOutput};
use crate::retrievers::Retriever;
use crate::vectorstore::{ScoredDocument, VectorCollection};

/// A capability the agent can invoke. `run` returns rendered text the
/// model reads back on its next turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, input: &str) -> Result<String>;
}

/// Adapts any [`Retriever`] into a tool that returns a rendered passage
/// list for a query.
pub struct RetrieverTool {
    name: String,
    retriever: Arc<dyn Retriever>,
}

impl RetrieverTool {
    pub fn new(name: impl Into<String>, retriever: Arc<dyn Retriever>) -> Self {
        Self {
            name: name.into(),
            retriever,
        }
    }
}

#[async_trait]
impl Tool for RetrieverTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &str) -> Result<String> {
        let documents = self.retriever.retrieve(input).await?;
        Ok(render_passages(&documents))
    }
}

fn render_passages(documents: &[ScoredDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, d)| format!("[{i}] {}", d.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Keyword-regex search over raw file contents, returning a snippet window
/// around each hit.
pub struct CatalogFileSearchTool {
    catalog: Arc<CatalogService>,
    window: usize,
}

impl CatalogFileSearchTool {
    pub fn new(catalog: Arc<CatalogService>, window: usize) -> Self {
        Self { catalog, window }
    }
}

#[async_trait]
impl Tool for CatalogFileSearchTool {
    fn name(&self) -> &str {
        "catalog_file_search"
    }

    async fn run(&self, input: &str) -> Result<String> {
        let pattern = regex::Regex::new(&regex::escape(input)).context("invalid search pattern")?;
        let mut hits = Vec::new();
        for (hash, path) in self.catalog.iter_files() {
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            if let Some(m) = pattern.find(&content) {
                let start = m.start().saturating_sub(self.window);
                let end = (m.end() + self.window).min(content.len());
                hits.push(format!("{hash}: ...{}...", &content[start..end]));
            }
        }
        Ok(hits.join("\n"))
    }
}

/// Substring match over flattened key/value metadata.
pub struct CatalogMetadataSearchTool {
    catalog: Arc<CatalogService>,
}

impl CatalogMetadataSearchTool {
    pub fn new(catalog: Arc<CatalogService>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for CatalogMetadataSearchTool {
    fn name(&self) -> &str {
        "catalog_metadata_search"
    }

    async fn run(&self, input: &str) -> Result<String> {
        let mut hits = Vec::new();
        for (hash, path) in self.catalog.iter_files() {
            let metadata = self.catalog.get_metadata_for_hash(&hash);
            let flattened = metadata.as_dict();
            if flattened.values().any(|v| v.contains(input)) {
                hits.push(format!("{hash} ({})", path.display()));
            }
        }
        Ok(hits.join("\n"))
    }
}

fn tool_call_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?s)Action:\s*(\w+)\s*Action Input:\s*(.+?)(?:\n|$)").unwrap())
}

/// One completed tool invocation, kept for downstream auditing.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: String,
    pub output: String,
}

/// Shared ReAct loop: repeatedly calls the LLM, parses any `Action:`/
/// `Action Input:` directive out of its response, runs the named tool, and
/// feeds the observation back in, until the model responds without an
/// action or `max_steps` is reached.
pub struct BaseReActAgent {
    llm: Arc<dyn LlmAdapter>,
    tools: Vec<Arc<dyn Tool>>,
    max_steps: usize,
}

impl BaseReActAgent {
    pub fn new(llm: Arc<dyn LlmAdapter>, tools: Vec<Arc<dyn Tool>>, max_steps: usize) -> Self {
        Self { llm, tools, max_steps }
    }

    fn find_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Run the loop to completion, returning the final answer and every
    /// tool call made along the way.
    pub async fn run(&self, question: &str) -> Result<(String, Vec<ToolCallRecord>)> {
        let mut transcript = vec![ChatMessage::new("user", question.to_string())];
        let mut calls = Vec::new();

        for _ in 0..self.max_steps {
            let response = self.llm.invoke(&transcript)?;
            let Some(caps) = tool_call_pattern().captures(&response) else {
                return Ok((response, calls));
            };
            let tool_name = caps[1].to_string();
            let tool_input = caps[2].trim().to_string();

            let Some(tool) = self.find_tool(&tool_name) else {
                transcript.push(ChatMessage::new(
                    "user",
                    format!("Observation: unknown tool '{tool_name}'"),
                ));
                continue;
            };
            let observation = tool.run(&tool_input).await.unwrap_or_else(|e| format!("error: {e}"));
            calls.push(ToolCallRecord {
                tool: tool_name,
                input: tool_input,
                output: observation.clone(),
            });
            transcript.push(ChatMessage::new("assistant", response));
            transcript.push(ChatMessage::new("user", format!("Observation: {observation}")));
        }

        Ok(("Agent reached its step limit without a final answer.".to_string(), calls))
    }
}

/// The CMS computing-operations agent: a [`BaseReActAgent`] with a fixed
/// tool set (retriever, catalog file search, catalog metadata search).
pub struct CmsCompOpsAgent {
    agent: BaseReActAgent,
}

impl CmsCompOpsAgent {
    pub fn new(llm: Arc<dyn LlmAdapter>, retriever: Arc<dyn Retriever>, catalog: Arc<CatalogService>, max_steps: usize) -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(RetrieverTool::new("retriever", retriever)),
            Arc::new(CatalogFileSearchTool::new(catalog.clone(), 80)),
            Arc::new(CatalogMetadataSearchTool::new(catalog)),
        ];
        Self {
            agent: BaseReActAgent::new(llm, tools, max_steps),
        }
    }
}

#[async_trait]
impl BasePipeline for CmsCompOpsAgent {
    fn update_retriever(&mut self, _collection: Arc<dyn VectorCollection>) {
        // the retriever tool is rebuilt by the caller and passed fresh at
        // construction time; the agent itself holds no collection handle
    }

    async fn invoke(&self, question: &str, _history: &[HistoryTurn]) -> Result<PipelineOutput> {
        let (answer, calls) = self.agent.run(question).await?;
        let mut metadata = BTreeMap::new();
        metadata.insert("tool_calls".to_string(), calls.len().to_string());
        for (i, call) in calls.iter().enumerate() {
            metadata.insert(format!("tool_call_{i}"), format!("{}({}) -> {}", call.tool, call.input, call.output));
        }
        Ok(PipelineOutput {
            answer,
            source_documents: Vec::new(),
            metadata,
        })
    }
}
