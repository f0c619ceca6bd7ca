//! Configuration management for concord
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > file > defaults. Configuration files are TOML with
//! `[engine]`, `[retrieval]`, `[fetch]`, `[reasoning]` and `[llm]` sections.

mod builder;
mod cli_args;
mod discovery;
mod model;
mod sources;
mod validation;

pub use builder::ConfigBuilder;
pub use cli_args::CliArgs;
pub use concord_utils::types::ConfigSource;
pub use discovery::{ENV_LLM_PROVIDER, ENV_MAX_ITERATIONS, ENV_RETRIEVAL_URL};
pub use model::*;
