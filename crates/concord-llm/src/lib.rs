//! Reasoning backends for concord
//!
//! Every provider implements [`LlmBackend`], so the engine works with any of
//! them without knowing transport details. [`from_config_with_fallback`]
//! builds the configured provider and falls back to a secondary provider
//! when the primary cannot be constructed.

mod anthropic_backend;
mod budgeted_backend;
mod http_client;
mod openrouter_backend;
mod types;

pub use budgeted_backend::{BUDGET_ENV_VAR, BudgetedBackend};
pub use concord_utils::error::LlmError;
pub use types::{LlmBackend, LlmFallbackInfo, LlmInvocation, LlmResult, Message, Role};

use anthropic_backend::AnthropicBackend;
use concord_config::Config;
use http_client::redact_error_message;
use openrouter_backend::OpenRouterBackend;
use tracing::{info, warn};

/// Construct a backend for one provider, without fallback handling.
///
/// # Errors
///
/// `LlmError::Unsupported` for unknown providers, `LlmError::Misconfiguration`
/// when provider settings (usually the API key) are missing.
fn construct_backend_for_provider(
    provider: &str,
    config: &Config,
) -> Result<Box<dyn LlmBackend>, LlmError> {
    match provider {
        "openrouter" => {
            let backend = OpenRouterBackend::new_from_config(config)?;
            let config_budget = config.llm.openrouter.as_ref().and_then(|or| or.budget);
            Ok(Box::new(BudgetedBackend::with_limit_from_config(
                Box::new(backend),
                config_budget,
            )))
        }
        "anthropic" => Ok(Box::new(AnthropicBackend::new_from_config(config)?)),
        unknown => Err(LlmError::Unsupported(format!(
            "Unknown LLM provider '{}'. Supported providers: openrouter, anthropic.",
            unknown
        ))),
    }
}

/// Create the configured backend, returning fallback metadata when the
/// fallback provider had to be used.
///
/// # Errors
///
/// Returns the primary provider's error when neither the primary nor the
/// fallback can be constructed.
pub fn from_config_with_fallback(
    config: &Config,
) -> Result<(Box<dyn LlmBackend>, Option<LlmFallbackInfo>), LlmError> {
    let provider = config.llm_provider();

    let primary_error = match construct_backend_for_provider(provider, config) {
        Ok(backend) => {
            info!(provider, "Reasoning backend ready");
            return Ok((backend, None));
        }
        Err(e) => e,
    };

    let Some(fallback_provider) = config.llm.fallback_provider.as_deref() else {
        return Err(primary_error);
    };

    let reason = redact_error_message(&primary_error.to_string());
    warn!(
        primary = provider,
        fallback = fallback_provider,
        reason = %reason,
        "Primary reasoning provider unavailable, trying fallback"
    );

    match construct_backend_for_provider(fallback_provider, config) {
        Ok(backend) => Ok((
            backend,
            Some(LlmFallbackInfo {
                primary_provider: provider.to_string(),
                fallback_provider: fallback_provider.to_string(),
                reason,
            }),
        )),
        Err(fallback_error) => {
            warn!(
                fallback = fallback_provider,
                error = %redact_error_message(&fallback_error.to_string()),
                "Fallback reasoning provider also failed"
            );
            Err(primary_error)
        }
    }
}

/// Create the configured backend, discarding fallback metadata.
pub fn from_config(config: &Config) -> Result<Box<dyn LlmBackend>, LlmError> {
    let (backend, _fallback_info) = from_config_with_fallback(config)?;
    Ok(backend)
}

#[cfg(test)]
mod factory_tests {
    use super::*;
    use concord_config::{AnthropicConfig, OpenRouterConfig};
    use serial_test::serial;

    fn config_with_keys(openrouter_env: &str, anthropic_env: &str) -> Config {
        let mut config = Config::builder().build().unwrap();
        config.llm.openrouter = Some(OpenRouterConfig {
            api_key_env: Some(openrouter_env.to_string()),
            ..Default::default()
        });
        config.llm.anthropic = Some(AnthropicConfig {
            api_key_env: Some(anthropic_env.to_string()),
            ..Default::default()
        });
        config
    }

    #[test]
    fn test_unknown_provider_is_unsupported() {
        let config = Config::builder().build().unwrap();
        assert!(matches!(
            construct_backend_for_provider("gemini-cli", &config),
            Err(LlmError::Unsupported(_))
        ));
    }

    #[test]
    #[serial]
    fn test_fallback_used_when_primary_key_missing() {
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var("CONCORD_TEST_OR_KEY_A");
            std::env::set_var("CONCORD_TEST_AN_KEY_A", "k");
        }
        let mut config = config_with_keys("CONCORD_TEST_OR_KEY_A", "CONCORD_TEST_AN_KEY_A");
        config.llm.fallback_provider = Some("anthropic".to_string());

        let (_backend, info) = from_config_with_fallback(&config).unwrap();
        let info = info.expect("fallback info");
        assert_eq!(info.primary_provider, "openrouter");
        assert_eq!(info.fallback_provider, "anthropic");
        assert!(info.reason.contains("CONCORD_TEST_OR_KEY_A"));

        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var("CONCORD_TEST_AN_KEY_A");
        }
    }

    #[test]
    #[serial]
    fn test_primary_error_returned_when_both_fail() {
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var("CONCORD_TEST_OR_KEY_B");
            std::env::remove_var("CONCORD_TEST_AN_KEY_B");
        }
        let mut config = config_with_keys("CONCORD_TEST_OR_KEY_B", "CONCORD_TEST_AN_KEY_B");
        config.llm.fallback_provider = Some("anthropic".to_string());

        match from_config_with_fallback(&config) {
            Err(LlmError::Misconfiguration(msg)) => assert!(msg.contains("CONCORD_TEST_OR_KEY_B")),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("expected failure"),
        }
    }

    #[test]
    #[serial]
    fn test_primary_used_without_fallback_info() {
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::set_var("CONCORD_TEST_OR_KEY_C", "k");
        }
        let config = config_with_keys("CONCORD_TEST_OR_KEY_C", "CONCORD_TEST_AN_KEY_C");
        let (_backend, info) = from_config_with_fallback(&config).unwrap();
        assert!(info.is_none());
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var("CONCORD_TEST_OR_KEY_C");
        }
    }
}
