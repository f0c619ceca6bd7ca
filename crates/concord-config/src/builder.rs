use std::collections::HashMap;
use std::time::Duration;

use concord_utils::error::ConcordError;

use super::{
    Config, ConfigSource, EngineConfig, FetchConfig, LlmConfig, OpenRouterConfig,
    ReasoningConfig, RetrievalConfig,
};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when embedding concord or in tests, where behavior must not
    /// depend on environment variables or config files.
    ///
    /// # Example
    ///
    /// ```rust
    /// use concord_config::Config;
    /// use std::time::Duration;
    ///
    /// let config = Config::builder()
    ///     .max_iterations(3)
    ///     .concurrency(2)
    ///     .deadline(Duration::from_secs(60))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_iterations(), 3);
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Fluent builder for [`Config`].
///
/// All values set via the builder are attributed to
/// `ConfigSource::Programmatic`; everything else keeps its default.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    top_k: Option<usize>,
    max_iterations: Option<u32>,
    concurrency: Option<usize>,
    deadline: Option<Duration>,
    draft_char_budget: Option<usize>,
    match_threshold: Option<f64>,
    window_tolerance: Option<f64>,
    retrieval_url: Option<String>,
    llm_provider: Option<String>,
    model: Option<String>,
    reasoning_max_retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Passages requested from retrieval per request.
    #[must_use]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// ReAct iteration budget (1..=20).
    #[must_use]
    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = Some(iterations);
        self
    }

    /// Documents processed concurrently (1..=64).
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Global request deadline (5s..=2h).
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn draft_char_budget(mut self, chars: usize) -> Self {
        self.draft_char_budget = Some(chars);
        self
    }

    #[must_use]
    pub fn match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn window_tolerance(mut self, tolerance: f64) -> Self {
        self.window_tolerance = Some(tolerance);
        self
    }

    #[must_use]
    pub fn retrieval_url(mut self, url: impl Into<String>) -> Self {
        self.retrieval_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn llm_provider(mut self, provider: impl Into<String>) -> Self {
        self.llm_provider = Some(provider.into());
        self
    }

    /// Model for the OpenRouter backend.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn reasoning_retries(mut self, max_retries: u32, initial_backoff_ms: u64) -> Self {
        self.reasoning_max_retries = Some(max_retries);
        self.initial_backoff_ms = Some(initial_backoff_ms);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<Config, ConcordError> {
        let mut attribution = HashMap::new();
        let mut mark = |key: &str, set: bool| {
            let source = if set {
                ConfigSource::Programmatic
            } else {
                ConfigSource::Default
            };
            attribution.insert(key.to_string(), source);
        };

        let mut engine = EngineConfig::default();
        let mut retrieval = RetrievalConfig::default();
        let mut reasoning = ReasoningConfig::default();
        let mut llm = LlmConfig::default();

        mark("top_k", self.top_k.is_some());
        if let Some(v) = self.top_k {
            engine.top_k = Some(v);
        }
        mark("max_iterations", self.max_iterations.is_some());
        if let Some(v) = self.max_iterations {
            engine.max_iterations = Some(v);
        }
        mark("concurrency", self.concurrency.is_some());
        if let Some(v) = self.concurrency {
            engine.concurrency = Some(v);
        }
        mark("deadline_secs", self.deadline.is_some());
        if let Some(v) = self.deadline {
            engine.deadline_secs = Some(v.as_secs());
        }
        mark("draft_char_budget", self.draft_char_budget.is_some());
        if let Some(v) = self.draft_char_budget {
            engine.draft_char_budget = Some(v);
        }
        mark("match_threshold", self.match_threshold.is_some());
        if let Some(v) = self.match_threshold {
            engine.match_threshold = Some(v);
        }
        mark("window_tolerance", self.window_tolerance.is_some());
        if let Some(v) = self.window_tolerance {
            engine.window_tolerance = Some(v);
        }
        mark("retrieval_url", self.retrieval_url.is_some());
        if let Some(v) = self.retrieval_url {
            retrieval.url = Some(v);
        }
        mark("reasoning_max_retries", self.reasoning_max_retries.is_some());
        if let Some(v) = self.reasoning_max_retries {
            reasoning.max_retries = Some(v);
        }
        mark("initial_backoff_ms", self.initial_backoff_ms.is_some());
        if let Some(v) = self.initial_backoff_ms {
            reasoning.initial_backoff_ms = Some(v);
        }
        mark("llm_provider", self.llm_provider.is_some());
        llm.provider = Some(
            self.llm_provider
                .unwrap_or_else(|| super::DEFAULT_PROVIDER.to_string()),
        );
        if let Some(model) = self.model {
            llm.openrouter = Some(OpenRouterConfig {
                model: Some(model),
                ..OpenRouterConfig::default()
            });
            mark("llm_openrouter_config", true);
        }

        let config = Config {
            engine,
            retrieval,
            fetch: FetchConfig::default(),
            reasoning,
            llm,
            source_attribution: attribution,
        };
        config.validate()?;
        Ok(config)
    }
}
