use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use concord_utils::types::ConfigSource;

pub const DEFAULT_TOP_K: usize = 15;
pub const DEFAULT_MAX_ITERATIONS: u32 = 4;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_DEADLINE_SECS: u64 = 300;
pub const DEFAULT_DRAFT_CHAR_BUDGET: usize = 8000;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
pub const DEFAULT_WINDOW_TOLERANCE: f64 = 0.2;
pub const DEFAULT_MAX_DOCUMENTS_ANALYZED: usize = 5;

pub const DEFAULT_RETRIEVAL_URL: &str = "http://localhost:1234/search";
pub const DEFAULT_CONTENT_TYPE: &str = "file_chunk";
pub const DEFAULT_PROVIDER: &str = "openrouter";
pub const DEFAULT_OPENROUTER_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Configuration for concord.
///
/// Precedence: CLI arguments > `CONCORD_*` environment variables > config
/// file > built-in defaults.
///
/// # Discovery
///
/// [`Config::discover()`] searches for `.concord/config.toml` upward from the
/// current directory, stopping at a repository root.
///
/// # Source Attribution
///
/// Each resolved key records where its value came from (`cli`, `env`,
/// `config`, `programmatic` or `default`) so `concord config` can show it.
///
/// # Configuration File Format
///
/// ```toml
/// [engine]
/// top_k = 15
/// max_iterations = 4
/// concurrency = 4
///
/// [retrieval]
/// url = "http://localhost:1234/search"
///
/// [llm]
/// provider = "openrouter"
///
/// [llm.openrouter]
/// model = "anthropic/claude-3.5-sonnet"
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub retrieval: RetrievalConfig,
    pub fetch: FetchConfig,
    pub reasoning: ReasoningConfig,
    pub llm: LlmConfig,
    pub source_attribution: HashMap<String, ConfigSource>,
}

/// `[engine]`: limits and tuning of the propagation engine.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    pub top_k: Option<usize>,
    pub max_iterations: Option<u32>,
    pub concurrency: Option<usize>,
    pub deadline_secs: Option<u64>,
    pub draft_char_budget: Option<usize>,
    /// Minimum similarity (0, 1] for a fuzzy span to be accepted.
    pub match_threshold: Option<f64>,
    /// Candidate windows span excerpt length × (1 ± tolerance).
    pub window_tolerance: Option<f64>,
    pub max_documents_analyzed: Option<usize>,
}

/// `[retrieval]`: the semantic search service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetrievalConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub content_type: Option<String>,
    pub use_refine: Option<bool>,
}

/// `[fetch]`: full-text document fetching.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FetchConfig {
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
}

/// `[reasoning]`: retry policy around the LLM backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReasoningConfig {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// LLM provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub fallback_provider: Option<String>,
    pub openrouter: Option<OpenRouterConfig>,
    pub anthropic: Option<AnthropicConfig>,
}

/// OpenRouter HTTP provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct OpenRouterConfig {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub budget: Option<u32>,
}

/// Anthropic HTTP provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AnthropicConfig {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_k: Some(DEFAULT_TOP_K),
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            concurrency: Some(DEFAULT_CONCURRENCY),
            deadline_secs: Some(DEFAULT_DEADLINE_SECS),
            draft_char_budget: Some(DEFAULT_DRAFT_CHAR_BUDGET),
            match_threshold: Some(DEFAULT_MATCH_THRESHOLD),
            window_tolerance: Some(DEFAULT_WINDOW_TOLERANCE),
            max_documents_analyzed: Some(DEFAULT_MAX_DOCUMENTS_ANALYZED),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            url: Some(DEFAULT_RETRIEVAL_URL.to_string()),
            timeout_secs: Some(30),
            content_type: Some(DEFAULT_CONTENT_TYPE.to_string()),
            use_refine: Some(false),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(30),
            retries: Some(2),
        }
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_backoff_ms: Some(500),
            timeout_secs: Some(120),
        }
    }
}

impl Config {
    #[must_use]
    pub fn top_k(&self) -> usize {
        self.engine.top_k.unwrap_or(DEFAULT_TOP_K)
    }

    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.engine.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.engine.concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }

    #[must_use]
    pub fn deadline_secs(&self) -> u64 {
        self.engine.deadline_secs.unwrap_or(DEFAULT_DEADLINE_SECS)
    }

    #[must_use]
    pub fn draft_char_budget(&self) -> usize {
        self.engine
            .draft_char_budget
            .unwrap_or(DEFAULT_DRAFT_CHAR_BUDGET)
    }

    #[must_use]
    pub fn match_threshold(&self) -> f64 {
        self.engine.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD)
    }

    #[must_use]
    pub fn window_tolerance(&self) -> f64 {
        self.engine
            .window_tolerance
            .unwrap_or(DEFAULT_WINDOW_TOLERANCE)
    }

    #[must_use]
    pub fn max_documents_analyzed(&self) -> usize {
        self.engine
            .max_documents_analyzed
            .unwrap_or(DEFAULT_MAX_DOCUMENTS_ANALYZED)
    }

    #[must_use]
    pub fn retrieval_url(&self) -> &str {
        self.retrieval.url.as_deref().unwrap_or(DEFAULT_RETRIEVAL_URL)
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        self.retrieval
            .content_type
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
    }

    #[must_use]
    pub fn llm_provider(&self) -> &str {
        self.llm.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }
}
