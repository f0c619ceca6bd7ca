use async_trait::async_trait;
use concord_config::Config;
use concord_llm::{LlmBackend, LlmInvocation};
use concord_utils::error::EngineError;
use concord_utils::logging::log_body;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Text produced by the reasoning model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// The output hit the token ceiling.
    pub truncated: bool,
}

impl Completion {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }
}

#[async_trait]
pub trait ReasoningGateway: Send + Sync {
    /// # Errors
    ///
    /// `EngineError::RateLimited` once retries are exhausted,
    /// `EngineError::ModelError` for anything that retrying will not fix.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<Completion, EngineError>;
}

/// [`ReasoningGateway`] over an [`LlmBackend`], retrying rate-limited calls
/// with exponential backoff.
pub struct LlmReasoning {
    backend: Arc<dyn LlmBackend>,
    timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
}

impl LlmReasoning {
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    #[must_use]
    pub fn from_config(backend: Arc<dyn LlmBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            Duration::from_secs(config.reasoning.timeout_secs.unwrap_or(120)),
        )
        .with_retry_policy(
            config.reasoning.max_retries.unwrap_or(3),
            Duration::from_millis(config.reasoning.initial_backoff_ms.unwrap_or(500)),
        )
    }
}

#[async_trait]
impl ReasoningGateway for LlmReasoning {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<Completion, EngineError> {
        log_body("prompt", prompt);

        let mut retries = 0;
        loop {
            let invocation =
                LlmInvocation::prompt("reasoning", prompt, self.timeout).with_max_tokens(max_tokens);

            match self.backend.invoke(invocation).await {
                Ok(result) => {
                    debug!(
                        model = %result.model_used,
                        truncated = result.truncated,
                        tokens_output = ?result.tokens_output,
                        "Reasoning call completed"
                    );
                    log_body("completion", &result.raw_response);
                    return Ok(Completion {
                        text: result.raw_response,
                        truncated: result.truncated,
                    });
                }
                Err(e) if e.is_rate_limited() => {
                    if retries >= self.max_retries {
                        return Err(EngineError::RateLimited {
                            attempts: retries + 1,
                        });
                    }
                    let backoff = self.initial_backoff * 2u32.saturating_pow(retries);
                    warn!(
                        attempt = retries + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        "Reasoning call rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    retries += 1;
                }
                Err(e) => return Err(EngineError::ModelError(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_llm::{LlmError, LlmResult};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBackend {
        quota_failures: u32,
        calls: AtomicU32,
        last_max_tokens: Mutex<Option<serde_json::Value>>,
    }

    impl FlakyBackend {
        fn new(quota_failures: u32) -> Self {
            Self {
                quota_failures,
                calls: AtomicU32::new(0),
                last_max_tokens: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_max_tokens.lock().unwrap() = inv.metadata.get("max_tokens").cloned();
            if n < self.quota_failures {
                return Err(LlmError::ProviderQuota("429".into()));
            }
            Ok(LlmResult::new("ok", "fake", "fake-model")
                .with_finish_reason(Some("length".to_string())))
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl LlmBackend for BrokenBackend {
        async fn invoke(&self, _inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            Err(LlmError::Model("context length exceeded".into()))
        }
    }

    fn gateway(backend: Arc<dyn LlmBackend>, retries: u32) -> LlmReasoning {
        LlmReasoning::new(backend, Duration::from_secs(5))
            .with_retry_policy(retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_rate_limited_calls_are_retried() {
        let backend = Arc::new(FlakyBackend::new(2));
        let reasoning = gateway(backend.clone(), 3);

        let completion = reasoning.complete("prompt", 512).await.unwrap();
        assert_eq!(completion.text, "ok");
        assert!(completion.truncated);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *backend.last_max_tokens.lock().unwrap(),
            Some(serde_json::json!(512))
        );
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion() {
        let backend = Arc::new(FlakyBackend::new(10));
        let reasoning = gateway(backend.clone(), 2);

        let err = reasoning.complete("prompt", 100).await.unwrap_err();
        assert_eq!(err, EngineError::RateLimited { attempts: 3 });
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_model_errors_are_not_retried() {
        let reasoning = gateway(Arc::new(BrokenBackend), 3);
        let err = reasoning.complete("prompt", 100).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelError(msg) if msg.contains("context length")));
    }
}
