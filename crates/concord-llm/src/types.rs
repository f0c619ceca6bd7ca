//! Core types for LLM backend abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::LlmError;

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Input to an LLM backend invocation
#[derive(Debug, Clone)]
pub struct LlmInvocation {
    /// What the call is for (`analyze`, `think`, `generate`, ...); used in logs
    pub purpose: String,
    /// Model to use; empty selects the backend default
    pub model: String,
    pub timeout: Duration,
    pub messages: Vec<Message>,
    /// Provider-specific parameters (`max_tokens`, `temperature`)
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LlmInvocation {
    #[must_use]
    pub fn new(
        purpose: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            purpose: purpose.into(),
            model: model.into(),
            timeout,
            messages,
            metadata: HashMap::new(),
        }
    }

    /// Single user-prompt invocation using the backend's default model.
    #[must_use]
    pub fn prompt(purpose: impl Into<String>, prompt: impl Into<String>, timeout: Duration) -> Self {
        Self::new(purpose, "", timeout, vec![Message::user(prompt)])
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_max_tokens(self, max_tokens: u32) -> Self {
        self.with_metadata("max_tokens", serde_json::json!(max_tokens))
    }
}

/// Result from an LLM backend invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResult {
    pub raw_response: String,
    /// Provider name (`openrouter`, `anthropic`, ...)
    pub provider: String,
    pub model_used: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
    /// Provider-reported stop reason, verbatim
    pub finish_reason: Option<String>,
    /// The output stopped at the token ceiling
    pub truncated: bool,
    pub extensions: HashMap<String, serde_json::Value>,
}

impl LlmResult {
    #[must_use]
    pub fn new(
        raw_response: impl Into<String>,
        provider: impl Into<String>,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            raw_response: raw_response.into(),
            provider: provider.into(),
            model_used: model_used.into(),
            tokens_input: None,
            tokens_output: None,
            finish_reason: None,
            truncated: false,
            extensions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = Some(input);
        self.tokens_output = Some(output);
        self
    }

    /// Record the stop reason; `length` and `max_tokens` mark the output
    /// truncated.
    #[must_use]
    pub fn with_finish_reason(mut self, reason: Option<String>) -> Self {
        self.truncated = matches!(reason.as_deref(), Some("length" | "max_tokens"));
        self.finish_reason = reason;
        self
    }

    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

/// Which provider is serving calls when the configured primary could not be
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmFallbackInfo {
    pub primary_provider: String,
    pub fallback_provider: String,
    pub reason: String,
}

/// Trait for LLM backend implementations
///
/// Every provider implements this trait so the engine can work with any of
/// them without knowing implementation details.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Invoke the LLM with the given invocation parameters
    ///
    /// # Errors
    ///
    /// Returns `LlmError` for any failure during invocation: transport
    /// failures, provider errors (auth, quota, outages, model rejection),
    /// timeouts, and budget exhaustion.
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_marks_truncation() {
        let r = LlmResult::new("x", "openrouter", "m").with_finish_reason(Some("length".into()));
        assert!(r.truncated);
        let r = LlmResult::new("x", "anthropic", "m").with_finish_reason(Some("max_tokens".into()));
        assert!(r.truncated);
        let r = LlmResult::new("x", "openrouter", "m").with_finish_reason(Some("stop".into()));
        assert!(!r.truncated);
        let r = LlmResult::new("x", "openrouter", "m").with_finish_reason(None);
        assert!(!r.truncated);
    }

    #[test]
    fn test_prompt_invocation_sets_max_tokens() {
        let inv = LlmInvocation::prompt("generate", "hello", Duration::from_secs(5))
            .with_max_tokens(4000);
        assert_eq!(inv.messages, vec![Message::user("hello")]);
        assert_eq!(inv.metadata.get("max_tokens"), Some(&serde_json::json!(4000)));
        assert!(inv.model.is_empty());
    }
}
