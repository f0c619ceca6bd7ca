use concord_utils::error::{ConcordError, ConfigError};

use super::Config;

const SUPPORTED_PROVIDERS: &[&str] = &["openrouter", "anthropic"];

fn invalid(key: &str, value: impl Into<String>) -> ConcordError {
    ConcordError::Config(ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    })
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConcordError> {
        let engine = &self.engine;

        if let Some(top_k) = engine.top_k
            && (top_k == 0 || top_k > 200)
        {
            return Err(invalid("top_k", "must be between 1 and 200"));
        }

        if let Some(max_iterations) = engine.max_iterations {
            if max_iterations == 0 {
                return Err(invalid("max_iterations", "must be greater than 0"));
            }
            if max_iterations > 20 {
                return Err(invalid("max_iterations", "exceeds maximum limit of 20"));
            }
        }

        if let Some(concurrency) = engine.concurrency
            && !(1..=64).contains(&concurrency)
        {
            return Err(invalid("concurrency", "must be between 1 and 64"));
        }

        if let Some(deadline) = engine.deadline_secs {
            if deadline < 5 {
                return Err(invalid("deadline_secs", "must be at least 5 seconds"));
            }
            if deadline > 7200 {
                return Err(invalid(
                    "deadline_secs",
                    "exceeds maximum limit of 7200 seconds (2 hours)",
                ));
            }
        }

        if let Some(budget) = engine.draft_char_budget
            && budget < 100
        {
            return Err(invalid("draft_char_budget", "must be at least 100 characters"));
        }

        if let Some(threshold) = engine.match_threshold
            && !(threshold > 0.0 && threshold <= 1.0)
        {
            return Err(invalid(
                "match_threshold",
                format!("{threshold} is outside (0, 1]"),
            ));
        }

        if let Some(tolerance) = engine.window_tolerance
            && !(0.0..1.0).contains(&tolerance)
        {
            return Err(invalid(
                "window_tolerance",
                format!("{tolerance} is outside [0, 1)"),
            ));
        }

        if let Some(max_docs) = engine.max_documents_analyzed
            && max_docs == 0
        {
            return Err(invalid("max_documents_analyzed", "must be greater than 0"));
        }

        if let Some(url) = &self.retrieval.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(invalid(
                "retrieval_url",
                format!("'{url}' must be an http(s) URL"),
            ));
        }

        for (key, secs) in [
            ("retrieval_timeout_secs", self.retrieval.timeout_secs),
            ("fetch_timeout_secs", self.fetch.timeout_secs),
            ("reasoning_timeout_secs", self.reasoning.timeout_secs),
        ] {
            if secs == Some(0) {
                return Err(invalid(key, "must be greater than 0"));
            }
        }

        if let Some(retries) = self.reasoning.max_retries
            && retries > 10
        {
            return Err(invalid("reasoning_max_retries", "exceeds maximum limit of 10"));
        }

        if let Some(provider) = &self.llm.provider
            && !SUPPORTED_PROVIDERS.contains(&provider.as_str())
        {
            return Err(invalid(
                "llm_provider",
                format!("'{provider}' is not supported. Must be 'openrouter' or 'anthropic'"),
            ));
        }

        if let Some(fallback) = &self.llm.fallback_provider
            && !SUPPORTED_PROVIDERS.contains(&fallback.as_str())
        {
            return Err(invalid(
                "llm_fallback_provider",
                format!("'{fallback}' is not supported. Must be 'openrouter' or 'anthropic'"),
            ));
        }

        if let Some(openrouter) = &self.llm.openrouter {
            if let Some(temperature) = openrouter.temperature
                && !(0.0..=2.0).contains(&temperature)
            {
                return Err(invalid(
                    "llm_openrouter_temperature",
                    "must be between 0.0 and 2.0",
                ));
            }
            if openrouter.budget == Some(0) {
                return Err(invalid("llm_openrouter_budget", "must be greater than 0"));
            }
        }

        Ok(())
    }
}
