//! Call-count ceiling around any `LlmBackend`

use crate::LlmError;
use crate::types::{LlmBackend, LlmInvocation, LlmResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Default number of reasoning calls per process
pub(crate) const DEFAULT_BUDGET_LIMIT: u32 = 200;

/// Environment variable overriding the budget limit
pub const BUDGET_ENV_VAR: &str = "CONCORD_LLM_BUDGET";

/// Wrapper that enforces a limit on the number of invocations.
///
/// The budget counts attempted calls, not successful ones: a failed call
/// still consumes its slot, so retry loops cannot exceed the ceiling.
pub struct BudgetedBackend {
    inner: Box<dyn LlmBackend>,
    budget: Arc<AtomicU32>,
    limit: u32,
}

impl BudgetedBackend {
    pub fn new(inner: Box<dyn LlmBackend>, limit: u32) -> Self {
        debug!(limit = limit, "Creating BudgetedBackend");
        Self {
            inner,
            budget: Arc::new(AtomicU32::new(0)),
            limit,
        }
    }

    /// Limit precedence: `CONCORD_LLM_BUDGET` > config file > default (200).
    pub fn with_limit_from_config(inner: Box<dyn LlmBackend>, config_budget: Option<u32>) -> Self {
        let env_limit = std::env::var(BUDGET_ENV_VAR)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());

        let limit = match (env_limit, config_budget) {
            (Some(limit), _) => {
                debug!(limit, "Using budget limit from {}", BUDGET_ENV_VAR);
                limit
            }
            (None, Some(limit)) => {
                debug!(limit, "Using budget limit from config file");
                limit
            }
            (None, None) => DEFAULT_BUDGET_LIMIT,
        };

        Self::new(inner, limit)
    }

    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.budget.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[async_trait]
impl LlmBackend for BudgetedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        // Count before calling so concurrent callers cannot overshoot
        let current = self.budget.fetch_add(1, Ordering::SeqCst);

        if current >= self.limit {
            let attempted = current + 1;
            warn!(limit = self.limit, attempted, "Budget limit exceeded");
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }

        debug!(
            call_count = current + 1,
            limit = self.limit,
            purpose = %inv.purpose,
            "Budget check passed, invoking inner backend"
        );

        let result = self.inner.invoke(inv).await;

        if let Err(e) = &result {
            debug!(
                call_count = current + 1,
                error = %e,
                "Inner backend invocation failed (budget slot still consumed)"
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl LlmBackend for CountingBackend {
        async fn invoke(&self, _inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(LlmError::ProviderOutage("503".into()))
            } else {
                Ok(LlmResult::new("ok", "test", "m"))
            }
        }
    }

    fn inv() -> LlmInvocation {
        LlmInvocation::prompt("test", "hi", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_budget_allows_up_to_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = BudgetedBackend::new(
            Box::new(CountingBackend {
                calls: calls.clone(),
                fail: false,
            }),
            2,
        );

        assert!(backend.invoke(inv()).await.is_ok());
        assert!(backend.invoke(inv()).await.is_ok());
        match backend.invoke(inv()).await {
            Err(LlmError::BudgetExceeded { limit, attempted }) => {
                assert_eq!(limit, 2);
                assert_eq!(attempted, 3);
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failures_consume_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = BudgetedBackend::new(
            Box::new(CountingBackend {
                calls: calls.clone(),
                fail: true,
            }),
            1,
        );
        assert!(matches!(
            backend.invoke(inv()).await,
            Err(LlmError::ProviderOutage(_))
        ));
        assert!(matches!(
            backend.invoke(inv()).await,
            Err(LlmError::BudgetExceeded { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[serial]
    fn test_limit_precedence() {
        let make = || -> Box<dyn LlmBackend> {
            Box::new(CountingBackend {
                calls: Arc::new(AtomicUsize::new(0)),
                fail: false,
            })
        };

        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
        }
        assert_eq!(
            BudgetedBackend::with_limit_from_config(make(), None).limit(),
            DEFAULT_BUDGET_LIMIT
        );
        assert_eq!(
            BudgetedBackend::with_limit_from_config(make(), Some(7)).limit(),
            7
        );

        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::set_var(BUDGET_ENV_VAR, "3");
        }
        assert_eq!(
            BudgetedBackend::with_limit_from_config(make(), Some(7)).limit(),
            3
        );
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
        }
    }
}
