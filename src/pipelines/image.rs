//! Single-chain wrapper around a multimodal LLM: base64 images plus a
//! prompt in, text out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::{ChatMessage, LlmAdapter};
use crate::pipelines::{BasePipeline, HistoryTurn, PipelineOutput};
use crate::vectorstore::VectorCollection;

/// A multimodal chat adapter accepts images alongside text. Kept separate
/// from [`LlmAdapter`] since most chat models never need it.
pub trait MultimodalLlmAdapter: Send + Sync {
    fn invoke_with_images(&self, prompt: &str, base64_images: &[String]) -> Result<String>;
}

/// Adapts any [`LlmAdapter`] into [`MultimodalLlmAdapter`] by embedding the
/// images as data-URI references inline in the prompt text — a reasonable
/// default for adapters with no native multimodal support.
pub struct TextOnlyMultimodalAdapter {
    inner: Arc<dyn LlmAdapter>,
}

impl TextOnlyMultimodalAdapter {
    pub fn new(inner: Arc<dyn LlmAdapter>) -> Self {
        Self { inner }
    }
}

impl MultimodalLlmAdapter for TextOnlyMultimodalAdapter {
    fn invoke_with_images(&self, prompt: &str, base64_images: &[String]) -> Result<String> {
        use base64::Engine;
        let refs = base64_images
            .iter()
            .enumerate()
            .map(|(i, encoded)| match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => format!("[image {i}, {} bytes]", bytes.len()),
                Err(_) => format!("[image {i}, undecodable]"),
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.inner.invoke(&[ChatMessage::new("user", format!("{prompt}\n{refs}"))])
    }
}

pub struct ImageProcessingPipeline {
    llm: Arc<dyn MultimodalLlmAdapter>,
}

impl ImageProcessingPipeline {
    pub fn new(llm: Arc<dyn MultimodalLlmAdapter>) -> Self {
        Self { llm }
    }

    pub fn process(&self, prompt: &str, base64_images: &[String]) -> Result<PipelineOutput> {
        let answer = self
            .llm
            .invoke_with_images(prompt, base64_images)
            .context("image processing chain failed")?;
        Ok(PipelineOutput::simple(answer))
    }
}

#[async_trait]
impl BasePipeline for ImageProcessingPipeline {
    fn update_retriever(&mut self, _collection: Arc<dyn VectorCollection>) {
        // stateless: image processing never consults the vector collection
    }

    async fn invoke(&self, question: &str, _history: &[HistoryTurn]) -> Result<PipelineOutput> {
        self.process(question, &[])
    }
}
