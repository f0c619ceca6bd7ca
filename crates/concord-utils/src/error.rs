use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Library-level error type with rich context and user-friendly reporting.
///
/// `ConcordError` is returned by operations that cannot complete at all:
/// invalid configuration, a malformed request, or a backend that cannot be
/// constructed. Failures scoped to a single document or modification point
/// never surface as `ConcordError`; the orchestrator records them in the
/// report instead.
///
/// # Exit Code Mapping
///
/// Use [`to_exit_code()`](Self::to_exit_code) to map errors to CLI exit codes:
///
/// | Exit Code | Error Type |
/// |-----------|------------|
/// | 2 | Configuration/CLI argument errors |
/// | 10 | Request deadline exceeded |
/// | 70 | Reasoning backend failure |
/// | 71 | Retrieval service unavailable |
/// | 1 | Other errors |
///
/// # Example
///
/// ```rust
/// use concord_utils::error::{ConcordError, ConfigError};
/// use concord_utils::exit_codes::ExitCode;
///
/// let err = ConcordError::Config(ConfigError::MissingRequired("retrieval.url".into()));
/// assert_eq!(err.to_exit_code(), ExitCode::CLI_ARGS);
/// ```
#[derive(Error, Debug)]
pub enum ConcordError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request field {field}: {reason}")]
    InvalidRequest { field: String, reason: String },
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Retrieval,
    Reasoning,
    Patching,
    ResourceLimits,
    Concurrency,
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Retrieval => write!(f, "Retrieval"),
            Self::Reasoning => write!(f, "Reasoning"),
            Self::Patching => write!(f, "Patching"),
            Self::ResourceLimits => write!(f, "Resource Limits"),
            Self::Concurrency => write!(f, "Concurrency"),
            Self::Validation => write!(f, "Validation"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(reason) => {
                format!("Configuration file has invalid format: {reason}")
            }
            Self::MissingRequired(key) => {
                format!("Required configuration '{key}' is missing")
            }
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => {
                format!("Configuration file not found: {path}")
            }
            Self::DiscoveryFailed { reason } => {
                format!("Failed to discover configuration: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile(_) => Some(
                "Configuration files must be valid TOML with [engine], [retrieval], [fetch], [reasoning] and [llm] sections."
                    .to_string(),
            ),
            Self::MissingRequired(_) => Some(
                "Some configuration values are required before a consistency check can run."
                    .to_string(),
            ),
            Self::InvalidValue { key, .. } => Some(format!(
                "The '{key}' configuration option has specific range requirements."
            )),
            Self::NotFound { .. } => Some(
                "concord searches for .concord/config.toml starting from the current directory upward."
                    .to_string(),
            ),
            Self::DiscoveryFailed { .. } => Some(
                "Configuration discovery walks the directory tree looking for .concord/config.toml."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile(_) => vec![
                "Check the TOML syntax using a TOML validator".to_string(),
                "Compare with the example configuration in the README".to_string(),
            ],
            Self::MissingRequired(key) => vec![
                format!("Add '{key}' to .concord/config.toml"),
                "Use the matching CLI flag as a temporary workaround".to_string(),
            ],
            Self::InvalidValue { key, .. } => match key.as_str() {
                "match_threshold" => vec![
                    "Use a value greater than 0 and at most 1 (e.g. 0.6)".to_string(),
                ],
                "max_iterations" => vec!["Use a value between 1 and 20".to_string()],
                "concurrency" => vec!["Use a value between 1 and 64".to_string()],
                "deadline_secs" => vec!["Use a value between 5 and 7200 seconds".to_string()],
                _ => vec![
                    "Check the documentation for valid values for this option".to_string(),
                    "Remove the option to use the default value".to_string(),
                ],
            },
            Self::NotFound { .. } => vec![
                "Create .concord/config.toml in your project root".to_string(),
                "Pass --config <path> to use an explicit file".to_string(),
            ],
            Self::DiscoveryFailed { .. } => vec![
                "Check read permissions on the current directory and its parents".to_string(),
                "Use --config <path> to specify the configuration file explicitly".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Errors that can occur during LLM backend operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (HTTP connectivity, malformed body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Provider authentication failure (401, 403, missing API key)
    #[error("Provider authentication error: {0}")]
    ProviderAuth(String),

    /// Provider rate limit exceeded (429)
    #[error("Provider quota exceeded: {0}")]
    ProviderQuota(String),

    /// Provider service outage (5xx errors)
    #[error("Provider outage: {0}")]
    ProviderOutage(String),

    /// The model rejected or failed the request; retrying will not help
    #[error("Model error: {0}")]
    Model(String),

    /// Invocation timed out
    #[error("Timeout after {duration:?}")]
    Timeout { duration: Duration },

    /// Budget limit exceeded
    #[error("Budget exceeded: attempted {attempted} calls, limit is {limit}")]
    BudgetExceeded { limit: u32, attempted: u32 },

    /// Configuration error
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Unsupported feature or provider
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl LlmError {
    /// Whether a caller may retry this failure after backing off.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::ProviderQuota(_))
    }
}

impl UserFriendlyError for LlmError {
    fn user_message(&self) -> String {
        match self {
            Self::Transport(msg) => format!("LLM transport error: {msg}"),
            Self::ProviderAuth(msg) => format!("LLM provider authentication failed: {msg}"),
            Self::ProviderQuota(msg) => format!("LLM provider rate limit hit: {msg}"),
            Self::ProviderOutage(msg) => format!("LLM provider service outage: {msg}"),
            Self::Model(msg) => format!("The model could not complete the request: {msg}"),
            Self::Timeout { duration } => {
                format!("LLM invocation timed out after {duration:?}")
            }
            Self::BudgetExceeded { limit, attempted } => {
                format!("LLM budget exceeded: attempted {attempted} calls, limit is {limit}")
            }
            Self::Misconfiguration(msg) => format!("LLM configuration error: {msg}"),
            Self::Unsupported(msg) => format!("LLM feature not supported: {msg}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Transport(_) => Some(
                "Transport errors occur when the LLM provider cannot be reached.".to_string(),
            ),
            Self::ProviderAuth(_) => Some(
                "Authentication errors indicate missing or invalid API keys.".to_string(),
            ),
            Self::ProviderQuota(_) => Some(
                "Rate-limited calls are retried with exponential backoff before giving up."
                    .to_string(),
            ),
            Self::ProviderOutage(_) => {
                Some("Provider outages are temporary service disruptions.".to_string())
            }
            Self::Model(_) => Some(
                "Model errors are not retried; the affected document is marked failed."
                    .to_string(),
            ),
            Self::Timeout { .. } => Some(
                "Timeouts occur when a reasoning call takes longer than the configured limit."
                    .to_string(),
            ),
            Self::BudgetExceeded { .. } => {
                Some("Budget limits cap the number of reasoning calls per process.".to_string())
            }
            Self::Misconfiguration(_) => Some(
                "Configuration errors indicate missing or invalid [llm] settings.".to_string(),
            ),
            Self::Unsupported(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Transport(_) | Self::ProviderOutage(_) => vec![
                "Verify network connectivity to the provider".to_string(),
                "Wait a few minutes and try again".to_string(),
            ],
            Self::ProviderAuth(_) => vec![
                "Check that the API key environment variable is set".to_string(),
                "Verify the API key is valid and not expired".to_string(),
            ],
            Self::ProviderQuota(_) => vec![
                "Lower [engine] concurrency to reduce parallel calls".to_string(),
                "Raise [reasoning] max_retries or initial_backoff_ms".to_string(),
            ],
            Self::Model(_) => vec![
                "Try a different model in [llm.openrouter] model".to_string(),
            ],
            Self::Timeout { .. } => vec![
                "Increase [reasoning] timeout_secs".to_string(),
            ],
            Self::BudgetExceeded { .. } => vec![
                "Increase the budget via CONCORD_LLM_BUDGET or [llm.openrouter] budget"
                    .to_string(),
                "Reduce top_k or max_iterations".to_string(),
            ],
            Self::Misconfiguration(_) | Self::Unsupported(_) => vec![
                "Check the [llm] section of .concord/config.toml".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ProviderAuth(_) | Self::Misconfiguration(_) | Self::Unsupported(_) => {
                ErrorCategory::Configuration
            }
            Self::ProviderQuota(_) | Self::BudgetExceeded { .. } => ErrorCategory::ResourceLimits,
            _ => ErrorCategory::Reasoning,
        }
    }
}

/// Errors raised by the retrieval and document-fetch collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Retrieval service unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Document not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("Fetching {document_id} timed out after {duration:?}")]
    FetchTimeout {
        document_id: String,
        duration: Duration,
    },

    #[error("Fetching {document_id} failed: {reason}")]
    FetchFailed { document_id: String, reason: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },
}

impl GatewayError {
    /// Transient failures that a fetch retry may resolve.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::FetchTimeout { .. } | Self::FetchFailed { .. } | Self::RetrievalUnavailable(_)
        )
    }
}

impl UserFriendlyError for GatewayError {
    fn user_message(&self) -> String {
        match self {
            Self::RetrievalUnavailable(msg) => format!("The search service failed: {msg}"),
            Self::DocumentNotFound { document_id } => {
                format!("Document '{document_id}' could not be found")
            }
            Self::FetchTimeout {
                document_id,
                duration,
            } => format!("Fetching '{document_id}' timed out after {duration:?}"),
            Self::FetchFailed {
                document_id,
                reason,
            } => format!("Fetching '{document_id}' failed: {reason}"),
            Self::InvalidResponse { service, reason } => {
                format!("{service} returned a response concord could not read: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::RetrievalUnavailable(_) => Some(
                "Retrieval failures abort the request because no candidate documents exist."
                    .to_string(),
            ),
            Self::DocumentNotFound { .. }
            | Self::FetchTimeout { .. }
            | Self::FetchFailed { .. } => Some(
                "Fetch failures are isolated; the document is reported as failed.".to_string(),
            ),
            Self::InvalidResponse { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::RetrievalUnavailable(_) => vec![
                "Check [retrieval] url and that the search service is running".to_string(),
            ],
            Self::DocumentNotFound { .. } => vec![
                "Re-index the corpus so stale passages are dropped".to_string(),
            ],
            Self::FetchTimeout { .. } => vec!["Increase [fetch] timeout_secs".to_string()],
            Self::FetchFailed { .. } => vec!["Increase [fetch] retries".to_string()],
            Self::InvalidResponse { .. } => vec![
                "Check that the service version matches what concord expects".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Retrieval
    }
}

/// Per-document and per-point outcomes of the propagation engine.
///
/// These are recorded in the consistency report; only
/// `RetrievalUnavailable` aborts a whole request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Fetch timed out: {0}")]
    FetchTimeout(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("No draft produced after {iterations} iteration(s)")]
    NoDraftProduced { iterations: u32 },

    #[error("Patch unresolved: best similarity {best_score:.2} below threshold {threshold:.2}")]
    PatchUnresolved { best_score: f64, threshold: f64 },

    #[error("Output truncated to {limit} characters")]
    OutputTruncated { limit: usize },

    #[error("Deadline of {duration:?} exceeded")]
    DeadlineExceeded { duration: Duration },
}

impl EngineError {
    /// Soft outcomes are recorded but never mark a document failed.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::OutputTruncated { .. } | Self::PatchUnresolved { .. } | Self::NoDraftProduced { .. }
        )
    }

    /// Stable snake_case identifier used in reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RetrievalUnavailable(_) => "retrieval_unavailable",
            Self::DocumentNotFound(_) => "document_not_found",
            Self::FetchTimeout(_) => "fetch_timeout",
            Self::FetchFailed(_) => "fetch_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::ModelError(_) => "model_error",
            Self::NoDraftProduced { .. } => "no_draft_produced",
            Self::PatchUnresolved { .. } => "patch_unresolved",
            Self::OutputTruncated { .. } => "output_truncated",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::RetrievalUnavailable(msg) => Self::RetrievalUnavailable(msg),
            GatewayError::DocumentNotFound { document_id } => Self::DocumentNotFound(document_id),
            GatewayError::FetchTimeout { document_id, .. } => Self::FetchTimeout(document_id),
            GatewayError::FetchFailed {
                document_id,
                reason,
            } => Self::FetchFailed(format!("{document_id}: {reason}")),
            GatewayError::InvalidResponse { service, reason } => {
                Self::RetrievalUnavailable(format!("{service}: {reason}"))
            }
        }
    }
}

impl UserFriendlyError for EngineError {
    fn user_message(&self) -> String {
        self.to_string()
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::PatchUnresolved { .. } => Some(
                "Unresolved patches are surfaced for manual review and never applied."
                    .to_string(),
            ),
            Self::DeadlineExceeded { .. } => Some(
                "Work still pending at the deadline is cancelled and reported as degraded."
                    .to_string(),
            ),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::DeadlineExceeded { .. } => vec![
                "Increase [engine] deadline_secs".to_string(),
                "Lower top_k to process fewer documents".to_string(),
            ],
            Self::PatchUnresolved { .. } => vec![
                "Lower [engine] match_threshold if valid edits are being rejected".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::RetrievalUnavailable(_)
            | Self::DocumentNotFound(_)
            | Self::FetchTimeout(_)
            | Self::FetchFailed(_) => ErrorCategory::Retrieval,
            Self::RateLimited { .. } | Self::ModelError(_) | Self::NoDraftProduced { .. } => {
                ErrorCategory::Reasoning
            }
            Self::PatchUnresolved { .. } | Self::OutputTruncated { .. } => ErrorCategory::Patching,
            Self::DeadlineExceeded { .. } => ErrorCategory::Concurrency,
        }
    }
}

impl UserFriendlyError for ConcordError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(err) => err.user_message(),
            Self::Llm(err) => err.user_message(),
            Self::Gateway(err) => err.user_message(),
            Self::Engine(err) => err.user_message(),
            Self::Io(err) => format!("File system error: {err}"),
            Self::InvalidRequest { field, reason } => {
                format!("The request field '{field}' is invalid: {reason}")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(err) => err.context(),
            Self::Llm(err) => err.context(),
            Self::Gateway(err) => err.context(),
            Self::Engine(err) => err.context(),
            Self::Io(_) => None,
            Self::InvalidRequest { .. } => Some(
                "A request needs a modification point, an instruction and a project id."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(err) => err.suggestions(),
            Self::Llm(err) => err.suggestions(),
            Self::Gateway(err) => err.suggestions(),
            Self::Engine(err) => err.suggestions(),
            Self::Io(_) => vec!["Check file permissions and available disk space".to_string()],
            Self::InvalidRequest { .. } => vec!["Run `concord check --help`".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(err) => err.category(),
            Self::Llm(err) => err.category(),
            Self::Gateway(err) => err.category(),
            Self::Engine(err) => err.category(),
            Self::Io(_) => ErrorCategory::Configuration,
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
        }
    }
}

impl ConcordError {
    /// Get a user-friendly error message with context and actionable suggestions.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        let mut output = format!("Error: {}\n", self.user_message());

        if let Some(ctx) = self.context() {
            output.push_str(&format!("\nContext: {ctx}\n"));
        }

        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for suggestion in suggestions {
                output.push_str(&format!("  • {suggestion}\n"));
            }
        }

        output
    }

    /// Map this error to the appropriate CLI exit code.
    #[must_use]
    pub fn to_exit_code(&self) -> crate::exit_codes::ExitCode {
        use crate::exit_codes::ExitCode;

        match self {
            ConcordError::Config(_) | ConcordError::InvalidRequest { .. } => ExitCode::CLI_ARGS,
            ConcordError::Llm(llm_err) => match llm_err {
                LlmError::Misconfiguration(_) | LlmError::Unsupported(_) => ExitCode::CLI_ARGS,
                LlmError::Timeout { .. } => ExitCode::DEADLINE,
                _ => ExitCode::REASONING_FAILURE,
            },
            ConcordError::Gateway(_) => ExitCode::RETRIEVAL_FAILURE,
            ConcordError::Engine(engine_err) => match engine_err {
                EngineError::RetrievalUnavailable(_) => ExitCode::RETRIEVAL_FAILURE,
                EngineError::DeadlineExceeded { .. } => ExitCode::DEADLINE,
                EngineError::RateLimited { .. } | EngineError::ModelError(_) => {
                    ExitCode::REASONING_FAILURE
                }
                _ => ExitCode::INTERNAL,
            },
            ConcordError::Io(_) => ExitCode::INTERNAL,
        }
    }
}
