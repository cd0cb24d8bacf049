//! Prompt templates with a fixed placeholder allow-list, and the formatter
//! that adapts a filled prompt to a target tokenizer family.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// The only placeholders a template is allowed to declare. Anything else
/// found in the template body is logged and left as plain text rather than
/// tagged, since a downstream formatter has no role to assign it.
pub const SUPPORTED_INPUT_VARIABLES: &[&str] = &[
    "full_history",
    "history",
    "question",
    "retriever_output",
    "condensed_output",
];

fn placeholder_pattern() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\{(\w+)\}").unwrap())
}

/// A prompt template whose placeholders have been validated and wrapped in
/// `<name>...</name>` tags so [`PromptFormatter`] can later split a filled
/// prompt into role-tagged segments.
#[derive(Debug, Clone)]
pub struct ValidatedPromptTemplate {
    pub name: String,
    pub tagged_template: String,
    pub variables: Vec<String>,
}

impl ValidatedPromptTemplate {
    /// `declared_input_variables`, if given, must be a subset of
    /// [`SUPPORTED_INPUT_VARIABLES`] and every entry must actually appear as
    /// a `{variable}` placeholder in `template`; either a declared but
    /// unsupported variable or a declared but absent one is a construction
    /// error. Placeholders found in the template body that aren't declared
    /// but are in the allow-list are still tagged; placeholders outside the
    /// allow-list are left untouched.
    pub fn new(
        name: impl Into<String>,
        template: &str,
        declared_input_variables: Option<&[String]>,
    ) -> Result<Self> {
        let name = name.into();
        let allow_list: BTreeSet<&str> = SUPPORTED_INPUT_VARIABLES.iter().copied().collect();

        if let Some(declared) = declared_input_variables {
            for variable in declared {
                if !allow_list.contains(variable.as_str()) {
                    bail!("template '{name}' declares unsupported input variable '{variable}'");
                }
            }
        }

        let mut found = Vec::new();
        let tagged_template = placeholder_pattern()
            .replace_all(template, |caps: &regex::Captures| {
                let placeholder = &caps[1];
                if allow_list.contains(placeholder) {
                    found.push(placeholder.to_string());
                    format!("<{placeholder}> {{{placeholder}}} </{placeholder}>")
                } else {
                    tracing::warn!(template = %name, placeholder, "unsupported prompt placeholder left unchanged");
                    caps[0].to_string()
                }
            })
            .to_string();

        if let Some(declared) = declared_input_variables {
            for variable in declared {
                if !found.contains(variable) {
                    bail!("template '{name}' declares input variable '{variable}' that does not appear in the template body");
                }
            }
        }

        Ok(Self {
            name,
            tagged_template,
            variables: found,
        })
    }

    /// Fill the template, substituting each `{name}` occurrence (inside its
    /// tags) with the given value. Missing variables are left as empty
    /// strings by the caller ([`crate::prompt::ChainWrapper`]-equivalent
    /// callers), not by this method.
    pub fn fill(&self, values: &std::collections::HashMap<String, String>) -> String {
        let mut filled = self.tagged_template.clone();
        for variable in &self.variables {
            let placeholder = format!("{{{variable}}}");
            let value = values.get(variable).cloned().unwrap_or_default();
            filled = filled.replace(&placeholder, &value);
        }
        filled
    }
}

/// The target tokenizer family a filled prompt must be shaped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFamily {
    Instructor,
    Chat,
    Base,
}

/// Detects a tokenizer's template family from its declared special tokens
/// and reshapes a filled, tag-wrapped prompt accordingly.
pub struct PromptFormatter {
    strip_html: bool,
}

impl PromptFormatter {
    pub fn new(strip_html: bool) -> Self {
        Self { strip_html }
    }

    pub fn detect_family(special_tokens: &[String]) -> TemplateFamily {
        if special_tokens.iter().any(|t| t == "[INST]" || t == "[/INST]") {
            TemplateFamily::Instructor
        } else if special_tokens.iter().any(|t| t.starts_with("<|im_start|>")) {
            TemplateFamily::Chat
        } else {
            TemplateFamily::Base
        }
    }

    /// Returns `(formatted_prompt, end_tag)`, where `end_tag` marks where a
    /// generation's completion begins.
    pub fn format(&self, filled_prompt: &str, family: TemplateFamily) -> (String, String) {
        let mut text = strip_tags(filled_prompt);
        if self.strip_html {
            text = strip_html_tags(&text);
        }

        match family {
            TemplateFamily::Instructor => (format!("[INST] {text} [/INST]"), "[/INST]".to_string()),
            TemplateFamily::Chat => (
                format!("<|im_start|>user\n{text}<|im_end|>\n<|im_start|>assistant\n"),
                "<|im_start|>assistant\n".to_string(),
            ),
            TemplateFamily::Base => (text, String::new()),
        }
    }

    /// Split a tagged-and-filled prompt into role/content pairs for chat
    /// templates. `history` expands into its own sequence of turns rather
    /// than a single tagged block.
    pub fn role_tag(tag: &str) -> Option<&'static str> {
        match tag {
            "question" | "condensed_output" => Some("user"),
            "retriever_output" => Some("assistant"),
            _ => None,
        }
    }
}

fn strip_tags(text: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"</?(\w+)>").unwrap());
    re.replace_all(text, "").trim().to_string()
}

fn strip_html_tags(text: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"<[^>]+>").unwrap());
    re.replace_all(text, "").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn valid_placeholder_is_tagged() {
        let template = ValidatedPromptTemplate::new("qa", "Answer: {question}", None).unwrap();
        assert!(template.tagged_template.contains("<question>"));
        assert!(template.variables.contains(&"question".to_string()));
    }

    #[test]
    fn unsupported_placeholder_left_unchanged() {
        let template = ValidatedPromptTemplate::new("qa", "Value: {bogus}", None).unwrap();
        assert_eq!(template.tagged_template, "Value: {bogus}");
        assert!(template.variables.is_empty());
    }

    #[test]
    fn declared_unsupported_variable_errors() {
        let declared = vec!["bogus".to_string()];
        assert!(ValidatedPromptTemplate::new("qa", "x", Some(&declared)).is_err());
    }

    #[test]
    fn declared_variable_absent_from_template_errors() {
        let declared = vec!["history".to_string()];
        assert!(ValidatedPromptTemplate::new("qa", "Q: {question}", Some(&declared)).is_err());
    }

    #[test]
    fn declared_variable_present_in_template_succeeds() {
        let declared = vec!["question".to_string()];
        assert!(ValidatedPromptTemplate::new("qa", "Q: {question}", Some(&declared)).is_ok());
    }

    #[test]
    fn fill_substitutes_values() {
        let template = ValidatedPromptTemplate::new("qa", "Q: {question}", None).unwrap();
        let mut values = HashMap::new();
        values.insert("question".to_string(), "what is X?".to_string());
        let filled = template.fill(&values);
        assert!(filled.contains("what is X?"));
    }

    #[test]
    fn detect_family_recognizes_instructor_and_chat() {
        assert_eq!(
            PromptFormatter::detect_family(&["[INST]".to_string()]),
            TemplateFamily::Instructor
        );
        assert_eq!(
            PromptFormatter::detect_family(&["<|im_start|>".to_string()]),
            TemplateFamily::Chat
        );
        assert_eq!(PromptFormatter::detect_family(&[]), TemplateFamily::Base);
    }

    #[test]
    fn format_strips_tags_and_wraps_for_instructor() {
        let formatter = PromptFormatter::new(false);
        let (formatted, end_tag) = formatter.format("<question> what is X? </question>", TemplateFamily::Instructor);
        assert_eq!(formatted, "[INST] what is X? [/INST]");
        assert_eq!(end_tag, "[/INST]");
    }
}
