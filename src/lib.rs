//! concord - propagate a textual change consistently across a document corpus
//!
//! Given a change request ("rename early-season classification to early-crop
//! classification and add a food-security note"), concord retrieves every
//! document in a corpus that shares the subject, decides where each one must
//! change, drafts each edit with a bounded search-and-generate loop and
//! returns the patched documents with a per-document status.
//!
//! concord can be used in two ways:
//! - **CLI**: `concord check <POINT> <INSTRUCTION> --project <ID>`
//! - **Library**: build an [`Orchestrator`] and call [`Orchestrator::run`]
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use concord::{Config, ModificationRequest, Orchestrator};
//!
//! # async fn demo() -> Result<(), concord::ConcordError> {
//! let config = Config::builder()
//!     .retrieval_url("http://localhost:1234/search")
//!     .build()?;
//! let orchestrator = Orchestrator::from_config(&config)?;
//!
//! let request = ModificationRequest::new(
//!     "early-season classification",
//!     "rename to early-crop classification",
//!     "agri",
//! );
//! let report = orchestrator.run(&request).await?;
//! for result in &report.results {
//!     println!("{}: {}", result.document_id, result.status);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # JSON Contracts
//!
//! `concord check --json` emits a [`ConsistencyResponse`] in JCS (RFC 8785)
//! canonical form. Use [`emit_jcs`] for the same guarantees in your own
//! integrations.

// ============================================================================
// Stable Public API
// ============================================================================

/// Configuration with discovery and precedence:
/// CLI arguments > environment > config file > built-in defaults.
pub use concord_config::Config;

/// Builder for programmatic configuration without files or environment.
pub use concord_config::ConfigBuilder;

/// CLI argument structure for configuration override.
pub use concord_config::CliArgs;

/// Library-level error type with user-facing messages and exit-code mapping.
pub use concord_utils::error::ConcordError;

pub use concord_utils::error::{ErrorCategory, UserFriendlyError};

/// Exit codes matching the documented exit code table.
pub use concord_utils::exit_codes::ExitCode;

/// JCS (RFC 8785) canonical JSON emission.
pub use concord_utils::canonicalization::emit_jcs;

pub use concord_engine::{
    ApiRequest, ConsistencyReport, ConsistencyResponse, DocumentPatchResult, DocumentStatus,
    EngineSettings, ModificationRequest, Orchestrator,
};

// ============================================================================
// Internal modules - accessible but not stable
// ============================================================================

#[doc(hidden)]
pub use concord_engine as engine;

#[doc(hidden)]
pub use concord_llm as llm;

#[doc(hidden)]
pub use concord_utils::{canonicalization, error, exit_codes, logging};

/// Returns the concord version string.
#[must_use]
pub fn concord_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// CLI module - internal implementation detail, exported for main.rs and
// white-box testing of flag parsing
#[doc(hidden)]
pub mod cli;
