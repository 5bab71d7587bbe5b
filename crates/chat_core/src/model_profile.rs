//! Per-model thinking-tag protocol
//!
//! Models that expose a chain of thought bracket it with `think_start` /
//! `think_end`. Some additionally mark the answer region with
//! `response_start` / `response_end`. For the gpt-oss family the thinking
//! region has no closing tag; the appearance of `response_start` terminates it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelProfile {
    pub supports_thinking: bool,
    pub think_start: String,
    pub think_end: String,
    pub response_start: String,
    pub response_end: String,
    /// Alternate closing sentinel for grammars with more than one terminator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_end_alt: Option<String>,
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self::passthrough()
    }
}

impl ModelProfile {
    /// Pass-through profile for models without a thinking protocol
    pub fn passthrough() -> Self {
        Self {
            supports_thinking: false,
            think_start: String::new(),
            think_end: String::new(),
            response_start: String::new(),
            response_end: String::new(),
            response_end_alt: None,
        }
    }

    /// `<think>` / `</think>` bracketing, no response tags
    pub fn think_tags() -> Self {
        Self {
            supports_thinking: true,
            think_start: "<think>".to_string(),
            think_end: "</think>".to_string(),
            response_start: String::new(),
            response_end: String::new(),
            response_end_alt: None,
        }
    }

    /// gpt-oss channel markers: thinking ends where the final channel begins.
    /// The final channel closes on either end sentinel, `<|return|>` or
    /// `<|end|>`.
    pub fn gpt_oss() -> Self {
        Self {
            supports_thinking: true,
            think_start: "<|channel|>analysis<|message|>".to_string(),
            think_end: String::new(),
            response_start: "<|channel|>final<|message|>".to_string(),
            response_end: "<|return|>".to_string(),
            response_end_alt: Some("<|end|>".to_string()),
        }
    }

    /// Resolve the profile for a model id or display name
    ///
    /// Unknown models get the pass-through profile.
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.contains("gpt-oss") {
            Self::gpt_oss()
        } else if lower.contains("deepseek") || lower.contains("qwq") || lower.contains("-r1") {
            Self::think_tags()
        } else {
            Self::passthrough()
        }
    }

    /// Thinking terminates on `response_start` instead of `think_end`
    pub fn thinking_ends_on_response_start(&self) -> bool {
        self.supports_thinking && self.think_end.is_empty() && !self.response_start.is_empty()
    }

    /// Every marker that closes the response region
    pub fn response_end_markers(&self) -> Vec<&str> {
        let mut markers = Vec::new();
        if !self.response_end.is_empty() {
            markers.push(self.response_end.as_str());
        }
        if let Some(alt) = self.response_end_alt.as_deref() {
            if !alt.is_empty() {
                markers.push(alt);
            }
        }
        markers
    }
}
