use std::collections::BTreeMap;

use super::{Config, ConfigSource};

impl Config {
    fn source_of(&self, key: &str) -> ConfigSource {
        self.source_attribution
            .get(key)
            .copied()
            .unwrap_or(ConfigSource::Default)
    }

    /// Effective configuration as `key -> (value, source)`, sorted by key.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut config = BTreeMap::new();

        // Nested provider tables are attributed as a whole
        let mut add = |key: &str, value: Option<String>| {
            let attribution_key = match key {
                "llm_openrouter_model" => "llm_openrouter_config",
                "llm_anthropic_model" => "llm_anthropic_config",
                other => other,
            };
            if let Some(val) = value {
                config.insert(
                    key.to_string(),
                    (val, self.source_of(attribution_key).to_string()),
                );
            }
        };

        let e = &self.engine;
        add("top_k", e.top_k.map(|v| v.to_string()));
        add("max_iterations", e.max_iterations.map(|v| v.to_string()));
        add("concurrency", e.concurrency.map(|v| v.to_string()));
        add("deadline_secs", e.deadline_secs.map(|v| v.to_string()));
        add("draft_char_budget", e.draft_char_budget.map(|v| v.to_string()));
        add("match_threshold", e.match_threshold.map(|v| v.to_string()));
        add("window_tolerance", e.window_tolerance.map(|v| v.to_string()));
        add(
            "max_documents_analyzed",
            e.max_documents_analyzed.map(|v| v.to_string()),
        );

        add("retrieval_url", self.retrieval.url.clone());
        add(
            "retrieval_timeout_secs",
            self.retrieval.timeout_secs.map(|v| v.to_string()),
        );
        add("content_type", self.retrieval.content_type.clone());
        add("use_refine", self.retrieval.use_refine.map(|v| v.to_string()));

        add("fetch_timeout_secs", self.fetch.timeout_secs.map(|v| v.to_string()));
        add("fetch_retries", self.fetch.retries.map(|v| v.to_string()));

        add(
            "reasoning_max_retries",
            self.reasoning.max_retries.map(|v| v.to_string()),
        );
        add(
            "initial_backoff_ms",
            self.reasoning.initial_backoff_ms.map(|v| v.to_string()),
        );
        add(
            "reasoning_timeout_secs",
            self.reasoning.timeout_secs.map(|v| v.to_string()),
        );

        add("llm_provider", self.llm.provider.clone());
        add("llm_fallback_provider", self.llm.fallback_provider.clone());
        add(
            "llm_openrouter_model",
            self.llm.openrouter.as_ref().and_then(|o| o.model.clone()),
        );
        add(
            "llm_anthropic_model",
            self.llm.anthropic.as_ref().and_then(|a| a.model.clone()),
        );

        config
    }
}
