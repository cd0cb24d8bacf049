//! Token budgeting and input pruning applied before every chain call.

use crate::llm::{ChatMessage, LlmAdapter};
use crate::vectorstore::ScoredDocument;
use std::collections::HashMap;

/// Effective budget = `min(configured_max, llm_max) - reserved - template`,
/// floored at 1000 when the computation goes non-positive.
pub fn effective_budget(configured_max: usize, llm_max: usize, reserved_tokens: usize, template_tokens: usize) -> usize {
    let cap = configured_max.min(llm_max);
    let consumed = reserved_tokens + template_tokens;
    if cap <= consumed {
        1000
    } else {
        cap - consumed
    }
}

/// A single input to a chain call: either chat history, a document list, or
/// a plain string extra.
#[derive(Debug, Clone)]
pub enum ChainInput {
    Question(String),
    History(Vec<ChatMessage>),
    Documents(Vec<ScoredDocument>),
    Extra(String, String),
}

pub struct TokenLimiter<'a> {
    llm: &'a dyn LlmAdapter,
    unprunable: Vec<String>,
    min_history_messages: usize,
    min_docs: usize,
    large_msg_fraction: f64,
}

pub enum PruneOutcome {
    Fits(Vec<ChainInput>),
    /// An unprunable input alone exceeds the budget; the caller must return
    /// this message without invoking the LLM.
    UnprunableExceedsBudget(String),
}

impl<'a> TokenLimiter<'a> {
    pub fn new(
        llm: &'a dyn LlmAdapter,
        unprunable: Vec<String>,
        min_history_messages: usize,
        min_docs: usize,
        large_msg_fraction: f64,
    ) -> Self {
        Self {
            llm,
            unprunable,
            min_history_messages,
            min_docs,
            large_msg_fraction,
        }
    }

    fn input_name(input: &ChainInput) -> &str {
        match input {
            ChainInput::Question(_) => "question",
            ChainInput::History(_) => "history",
            ChainInput::Documents(_) => "documents",
            ChainInput::Extra(name, _) => name,
        }
    }

    fn is_unprunable(&self, input: &ChainInput) -> bool {
        matches!(input, ChainInput::Question(_)) || self.unprunable.iter().any(|n| n == Self::input_name(input))
    }

    fn token_count(&self, input: &ChainInput) -> usize {
        match input {
            ChainInput::Question(text) => self.llm.get_num_tokens(text),
            ChainInput::History(messages) => messages.iter().map(|m| self.llm.get_num_tokens(&m.content)).sum(),
            ChainInput::Documents(docs) => docs.iter().map(|d| self.llm.get_num_tokens(&d.text)).sum(),
            ChainInput::Extra(_, text) => self.llm.get_num_tokens(text),
        }
    }

    /// Prune `inputs` in place until the total token count fits `budget`,
    /// following the fixed order: history, then documents, then extras.
    /// `question` and anything in `unprunable` are never touched.
    pub fn prune(&self, mut inputs: Vec<ChainInput>, budget: usize) -> PruneOutcome {
        let unprunable_total: usize = inputs
            .iter()
            .filter(|i| self.is_unprunable(i))
            .map(|i| self.token_count(i))
            .sum();
        if unprunable_total > budget {
            return PruneOutcome::UnprunableExceedsBudget(
                "The input is too large to process within the configured token budget.".to_string(),
            );
        }

        let total = |inputs: &[ChainInput]| -> usize { inputs.iter().map(|i| self.token_count(i)).sum() };

        // Stage 1: history — drop oversized single messages, then pop oldest.
        let max_msg_tokens = (self.large_msg_fraction * budget as f64) as usize;
        for input in inputs.iter_mut() {
            if let ChainInput::History(messages) = input {
                messages.retain(|m| self.llm.get_num_tokens(&m.content) <= max_msg_tokens);
            }
        }
        while total(&inputs) > budget {
            let history_len = inputs.iter().find_map(|i| match i {
                ChainInput::History(m) => Some(m.len()),
                _ => None,
            });
            match history_len {
                Some(len) if len > self.min_history_messages => {
                    for input in inputs.iter_mut() {
                        if let ChainInput::History(messages) = input {
                            messages.remove(0);
                        }
                    }
                }
                _ => break,
            }
        }

        // Stage 2: documents — round-robin pop the tail until min_docs or budget met.
        if total(&inputs) > budget {
            loop {
                if total(&inputs) <= budget {
                    break;
                }
                let mut popped_any = false;
                for idx in 0..inputs.len() {
                    if total(&inputs) <= budget {
                        break;
                    }
                    if let ChainInput::Documents(docs) = &mut inputs[idx] {
                        if docs.len() > self.min_docs {
                            docs.pop();
                            popped_any = true;
                        }
                    }
                }
                if !popped_any {
                    break;
                }
            }
        }

        // Stage 3: extras — drop largest first.
        if total(&inputs) > budget {
            loop {
                if total(&inputs) <= budget {
                    break;
                }
                let largest_extra_index = inputs
                    .iter()
                    .enumerate()
                    .filter(|(_, i)| matches!(i, ChainInput::Extra(_, _)) && !self.is_unprunable(i))
                    .max_by_key(|(_, i)| self.token_count(i))
                    .map(|(idx, _)| idx);
                match largest_extra_index {
                    Some(idx) => {
                        inputs.remove(idx);
                    }
                    None => break,
                }
            }
        }

        PruneOutcome::Fits(inputs)
    }
}

/// Validates required variables are present, prunes via [`TokenLimiter`],
/// fills missing variables with empty strings, invokes the chain, and
/// returns `{"answer": ..., ...payload}`.
pub struct ChainWrapper<'a> {
    limiter: TokenLimiter<'a>,
    required_variables: Vec<String>,
}

impl<'a> ChainWrapper<'a> {
    pub fn new(limiter: TokenLimiter<'a>, required_variables: Vec<String>) -> Self {
        Self {
            limiter,
            required_variables,
        }
    }

    pub fn prepare(&self, mut payload: HashMap<String, String>, inputs: Vec<ChainInput>, budget: usize) -> Result<HashMap<String, String>, String> {
        for variable in &self.required_variables {
            payload.entry(variable.clone()).or_insert_with(String::new);
        }
        match self.limiter.prune(inputs, budget) {
            PruneOutcome::Fits(pruned) => {
                for input in pruned {
                    let (key, value) = match input {
                        ChainInput::Question(text) => ("question".to_string(), text),
                        ChainInput::History(messages) => (
                            "history".to_string(),
                            messages
                                .iter()
                                .map(|m| format!("{}: {}", m.role, m.content))
                                .collect::<Vec<_>>()
                                .join("\n"),
                        ),
                        ChainInput::Documents(docs) => (
                            "retriever_output".to_string(),
                            docs.iter().map(|d| d.text.clone()).collect::<Vec<_>>().join("\n\n"),
                        ),
                        ChainInput::Extra(name, text) => (name, text),
                    };
                    payload.insert(key, value);
                }
                for variable in &self.required_variables {
                    payload.entry(variable.clone()).or_insert_with(String::new);
                }
                Ok(payload)
            }
            PruneOutcome::UnprunableExceedsBudget(message) => Err(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EchoAdapter;

    #[test]
    fn effective_budget_floors_at_1000() {
        assert_eq!(effective_budget(100, 200, 50, 60), 1000);
    }

    #[test]
    fn effective_budget_computes_normally() {
        assert_eq!(effective_budget(4000, 8000, 100, 100), 3800);
    }

    #[test]
    fn question_is_never_pruned_even_when_oversized() {
        let llm = EchoAdapter;
        let limiter = TokenLimiter::new(&llm, vec![], 1, 1, 0.5);
        let huge_question = "word ".repeat(10_000);
        let inputs = vec![ChainInput::Question(huge_question)];
        match limiter.prune(inputs, 10) {
            PruneOutcome::UnprunableExceedsBudget(_) => {}
            PruneOutcome::Fits(_) => panic!("expected unprunable-exceeds-budget"),
        }
    }

    #[test]
    fn prepare_writes_pruned_inputs_back_into_payload() {
        let llm = EchoAdapter;
        let limiter = TokenLimiter::new(&llm, vec![], 1, 1, 0.9);
        let wrapper = ChainWrapper::new(limiter, vec!["question".to_string(), "retriever_output".to_string()]);
        let docs: Vec<ScoredDocument> = (0..5)
            .map(|i| ScoredDocument {
                id: i.to_string(),
                text: "word ".repeat(50),
                metadata: Default::default(),
                score: 0.0,
            })
            .collect();
        let inputs = vec![ChainInput::Question("what broke?".to_string()), ChainInput::Documents(docs)];
        let payload = wrapper.prepare(HashMap::new(), inputs, 20).unwrap();
        assert_eq!(payload.get("question").unwrap(), "what broke?");
        assert!(payload.get("retriever_output").unwrap().split("\n\n").count() <= 1);
    }

    #[test]
    fn documents_are_pruned_to_min_docs() {
        let llm = EchoAdapter;
        let limiter = TokenLimiter::new(&llm, vec![], 1, 1, 0.9);
        let docs: Vec<ScoredDocument> = (0..5)
            .map(|i| ScoredDocument {
                id: i.to_string(),
                text: "word ".repeat(50),
                metadata: Default::default(),
                score: 0.0,
            })
            .collect();
        let inputs = vec![ChainInput::Question("q".to_string()), ChainInput::Documents(docs)];
        match limiter.prune(inputs, 20) {
            PruneOutcome::Fits(result) => {
                let ChainInput::Documents(remaining) = &result[1] else { panic!("expected documents") };
                assert_eq!(remaining.len(), 1);
            }
            PruneOutcome::UnprunableExceedsBudget(_) => panic!("question alone should fit"),
        }
    }
}
