//! Chat model adapters and the registry that resolves
//! `a2rchi.model_class_map` entries into live instances.

use anyhow::{Context, Result};
use std::collections::HashMap;

/// A role-tagged message, the unit [`PromptFormatter`] and [`LlmAdapter`]
/// both operate on.
///
/// [`PromptFormatter`]: crate::prompt::PromptFormatter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Implemented by every chat model backend. `get_num_tokens` is used by
/// [`crate::token_limiter::TokenLimiter`] to decide what to prune before a
/// call, so it must be cheap and not require a network round trip.
pub trait LlmAdapter: Send + Sync {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String>;
    fn get_num_tokens(&self, text: &str) -> usize;
}

/// Whitespace-token counter used by adapters that don't expose an exact
/// tokenizer; conservative enough not to under-count for pruning purposes.
pub fn approximate_token_count(text: &str) -> usize {
    text.split_whitespace().count().max(text.len() / 4)
}

/// Chat completion over an OpenAI-compatible HTTP API.
pub struct OpenAiChatAdapter {
    client: reqwest::blocking::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(serde::Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: WireResponseMessage,
}

#[derive(serde::Deserialize)]
struct WireResponseMessage {
    content: String,
}

impl OpenAiChatAdapter {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

impl LlmAdapter for OpenAiChatAdapter {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        let wire_messages = messages
            .iter()
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: wire_messages,
            })
            .send()
            .context("chat completion request failed")?
            .error_for_status()
            .context("chat completion endpoint returned an error status")?
            .json::<ChatResponse>()
            .context("failed to parse chat completion response")?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("chat completion response had no choices")
    }

    fn get_num_tokens(&self, text: &str) -> usize {
        approximate_token_count(text)
    }
}

/// Deterministic adapter used in tests and as an offline fallback: echoes
/// the last user message content, prefixed, without calling out anywhere.
pub struct EchoAdapter;

impl LlmAdapter for EchoAdapter {
    fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(format!("echo: {last_user}"))
    }

    fn get_num_tokens(&self, text: &str) -> usize {
        approximate_token_count(text)
    }
}

/// Resolves `a2rchi.model_class_map.<name>` entries to live adapters.
pub struct ModelRegistry {
    models: HashMap<String, std::sync::Arc<dyn LlmAdapter>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, adapter: std::sync::Arc<dyn LlmAdapter>) {
        self.models.insert(name.into(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn LlmAdapter>> {
        self.models.get(name).cloned()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_adapter_echoes_last_user_message() {
        let adapter = EchoAdapter;
        let messages = vec![
            ChatMessage::new("system", "you are a bot"),
            ChatMessage::new("user", "hello there"),
        ];
        assert_eq!(adapter.invoke(&messages).unwrap(), "echo: hello there");
    }

    #[test]
    fn approximate_token_count_is_never_zero_for_nonempty_text() {
        assert!(approximate_token_count("a short sentence") > 0);
    }

    #[test]
    fn registry_resolves_registered_model() {
        let mut registry = ModelRegistry::new();
        registry.register("default", std::sync::Arc::new(EchoAdapter));
        assert!(registry.get("default").is_some());
    }
}
