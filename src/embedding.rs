//! Embedding providers. The registry resolves a named provider from
//! `model_class_map` the way [`crate::llm`] resolves chat models.

use anyhow::{Context, Result};
use std::collections::HashMap;

use crate::vectorstore::Embedder;

/// Deterministic, dependency-free embedding used in tests and as a
/// last-resort fallback: hashes each token into a fixed-width vector. Not
/// semantically meaningful, but stable and cheap.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Embedder for HashingEmbedder {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

impl HashingEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let hash = crc32(token.as_bytes());
            let index = (hash as usize) % self.dims;
            vector[index] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// An OpenAI-compatible embeddings endpoint. Uses the blocking client since
/// [`Embedder::embed_documents`] is a synchronous trait method called from
/// `spawn_blocking` during reconciliation.
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(serde::Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(serde::Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.api_base.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding endpoint returned an error status")?
            .json::<EmbeddingResponse>()
            .context("failed to parse embedding response")?;
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Resolves a named embedding provider at startup, mirroring
/// `a2rchi.model_class_map`'s shape for chat models.
pub struct EmbeddingRegistry {
    providers: HashMap<String, std::sync::Arc<dyn Embedder>>,
}

impl EmbeddingRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: std::sync::Arc<dyn Embedder>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Embedder>> {
        self.providers.get(name).cloned()
    }
}

impl Default for EmbeddingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
