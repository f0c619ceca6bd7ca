//! OpenRouter HTTP backend (OpenAI-compatible chat completions)

use crate::LlmError;
use crate::http_client::HttpClient;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};
use async_trait::async_trait;
use concord_config::{Config, DEFAULT_OPENROUTER_MODEL};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub(crate) const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const DEFAULT_REFERER: &str = "https://github.com/EffortlessMetrics/concord";

const DEFAULT_TITLE: &str = "concord";

#[derive(Clone)]
pub(crate) struct OpenRouterBackend {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

/// HTTP request parameters
#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.3,
        }
    }
}

impl HttpParams {
    /// Per-invocation overrides from `inv.metadata`, falling back to `self`.
    pub(crate) fn resolve(&self, inv: &LlmInvocation) -> Self {
        let max_tokens = inv
            .metadata
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.max_tokens);

        let temperature = inv
            .metadata
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(self.temperature);

        Self {
            max_tokens,
            temperature,
        }
    }
}

impl OpenRouterBackend {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, LlmError> {
        let client = HttpClient::new()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params,
        })
    }

    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the API key environment
    /// variable is not set or the HTTP client cannot be constructed.
    pub fn new_from_config(config: &Config) -> Result<Self, LlmError> {
        let section = config.llm.openrouter.clone().unwrap_or_default();

        let api_key_env = section
            .api_key_env
            .as_deref()
            .unwrap_or("OPENROUTER_API_KEY");

        let api_key = std::env::var(api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LlmError::Misconfiguration(format!(
                    "OpenRouter API key not found in environment variable '{}'. \
                     Set it or configure a different api_key_env in [llm.openrouter].",
                    api_key_env
                ))
            })?;

        let default_params = HttpParams {
            max_tokens: section.max_tokens.unwrap_or(2048),
            temperature: section.temperature.unwrap_or(0.3),
        };

        Self::new(
            api_key,
            section.base_url,
            section
                .model
                .unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string()),
            default_params,
        )
    }

    fn resolve_params(&self, inv: &LlmInvocation) -> (String, HttpParams) {
        let model = if inv.model.is_empty() {
            self.default_model.clone()
        } else {
            inv.model.clone()
        };
        (model, self.default_params.resolve(inv))
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|msg| OpenAiMessage {
                role: match msg.role {
                    Role::System => "system".to_string(),
                    Role::User => "user".to_string(),
                    Role::Assistant => "assistant".to_string(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl LlmBackend for OpenRouterBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let (model, params) = self.resolve_params(&inv);

        debug!(
            provider = "openrouter",
            purpose = %inv.purpose,
            model = %model,
            max_tokens = params.max_tokens,
            timeout_secs = inv.timeout.as_secs(),
            "Invoking OpenRouter backend"
        );

        let request_body = OpenRouterRequest {
            model: model.clone(),
            messages: Self::convert_messages(&inv.messages),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream: false,
        };

        let request = self
            .client
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", DEFAULT_REFERER)
            .header("X-Title", DEFAULT_TITLE)
            .header("Content-Type", "application/json")
            .json(&request_body);

        let response = self
            .client
            .execute_with_retry(request, inv.timeout, "openrouter")
            .await?;

        let response_body: OpenRouterResponse = response.json().await.map_err(|e| {
            LlmError::Transport(format!("Failed to parse OpenRouter response: {}", e))
        })?;

        parse_response(response_body, model)
    }
}

fn parse_response(body: OpenRouterResponse, model: String) -> Result<LlmResult, LlmError> {
    if let Some(err) = body.error {
        return Err(LlmError::Model(format!("OpenRouter error: {}", err.message)));
    }

    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Transport("OpenRouter response missing choices[0]".to_string()))?;

    let content = choice.message.content.ok_or_else(|| {
        LlmError::Model("OpenRouter response missing content in choices[0]".to_string())
    })?;

    let mut result =
        LlmResult::new(content, "openrouter", model).with_finish_reason(choice.finish_reason);

    if let Some(usage) = body.usage {
        result = result.with_tokens(usage.prompt_tokens, usage.completion_tokens);
    }

    debug!(
        provider = "openrouter",
        tokens_input = ?result.tokens_input,
        tokens_output = ?result.tokens_output,
        truncated = result.truncated,
        "OpenRouter invocation completed"
    );

    Ok(result)
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenRouterResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    fn backend() -> OpenRouterBackend {
        OpenRouterBackend::new(
            "test-key".to_string(),
            None,
            "default-model".to_string(),
            HttpParams {
                max_tokens: 1024,
                temperature: 0.5,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_params_uses_defaults() {
        let inv = LlmInvocation::new("think", "", Duration::from_secs(60), vec![]);
        let (model, params) = backend().resolve_params(&inv);
        assert_eq!(model, "default-model");
        assert_eq!(params.max_tokens, 1024);
        assert_eq!(params.temperature, 0.5);
    }

    #[test]
    fn test_resolve_params_overrides() {
        let inv = LlmInvocation::new("generate", "custom-model", Duration::from_secs(60), vec![])
            .with_max_tokens(6000);
        let (model, params) = backend().resolve_params(&inv);
        assert_eq!(model, "custom-model");
        assert_eq!(params.max_tokens, 6000);
        assert_eq!(params.temperature, 0.5);
    }

    #[test]
    fn test_convert_messages() {
        let messages = vec![Message::system("be terse"), Message::user("hello")];
        let converted = OpenRouterBackend::convert_messages(&messages);
        assert_eq!(converted[0].role, "system");
        assert_eq!(converted[1].role, "user");
        assert_eq!(converted[1].content, "hello");
    }

    #[test]
    fn test_parse_response_length_is_truncated() {
        let body: OpenRouterResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "partial"}, "finish_reason": "length"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2048}
        }))
        .unwrap();
        let result = parse_response(body, "m".into()).unwrap();
        assert_eq!(result.raw_response, "partial");
        assert!(result.truncated);
        assert_eq!(result.tokens_output, Some(2048));
    }

    #[test]
    fn test_parse_response_error_payload_is_model_error() {
        let body: OpenRouterResponse = serde_json::from_value(serde_json::json!({
            "error": {"message": "context length exceeded", "code": 400}
        }))
        .unwrap();
        assert!(matches!(
            parse_response(body, "m".into()),
            Err(LlmError::Model(_))
        ));
    }

    #[test]
    #[serial]
    fn test_new_from_config_missing_api_key() {
        let test_env_var = "CONCORD_TEST_OPENROUTER_KEY_MISSING";
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var(test_env_var);
        }

        let mut config = Config::builder().build().unwrap();
        config.llm.openrouter = Some(concord_config::OpenRouterConfig {
            api_key_env: Some(test_env_var.to_string()),
            ..Default::default()
        });

        match OpenRouterBackend::new_from_config(&config) {
            Err(LlmError::Misconfiguration(msg)) => assert!(msg.contains(test_env_var)),
            _ => panic!("Expected Misconfiguration error for missing API key"),
        }
    }

    #[test]
    #[serial]
    fn test_new_from_config_defaults_model() {
        let test_env_var = "CONCORD_TEST_OPENROUTER_KEY_PRESENT";
        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::set_var(test_env_var, "test-key");
        }
        let mut config = Config::builder().build().unwrap();
        config.llm.openrouter = Some(concord_config::OpenRouterConfig {
            api_key_env: Some(test_env_var.to_string()),
            ..Default::default()
        });

        let backend = OpenRouterBackend::new_from_config(&config).unwrap();
        assert_eq!(backend.default_model, DEFAULT_OPENROUTER_MODEL);
        assert_eq!(backend.base_url, DEFAULT_BASE_URL);

        // SAFETY: serialized by #[serial]
        unsafe {
            std::env::remove_var(test_env_var);
        }
    }
}
