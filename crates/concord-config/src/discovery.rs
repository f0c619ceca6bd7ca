use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use super::{
    CliArgs, Config, ConfigSource, EngineConfig, FetchConfig, LlmConfig, OpenRouterConfig,
    ReasoningConfig, RetrievalConfig,
};

pub const ENV_LLM_PROVIDER: &str = "CONCORD_LLM_PROVIDER";
pub const ENV_RETRIEVAL_URL: &str = "CONCORD_RETRIEVAL_URL";
pub const ENV_MAX_ITERATIONS: &str = "CONCORD_MAX_ITERATIONS";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    engine: Option<EngineConfig>,
    retrieval: Option<RetrievalConfig>,
    fetch: Option<FetchConfig>,
    reasoning: Option<ReasoningConfig>,
    llm: Option<LlmConfig>,
}

/// Overwrite `dst` with `src` when present and record who set it.
fn overlay<T>(
    dst: &mut Option<T>,
    src: Option<T>,
    key: &str,
    source: ConfigSource,
    attribution: &mut HashMap<String, ConfigSource>,
) {
    if let Some(value) = src {
        *dst = Some(value);
        attribution.insert(key.to_string(), source);
    }
}

/// Non-empty environment variable, or `None`.
fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Discover and load configuration with precedence: CLI > env > file > defaults
    ///
    /// Uses the current working directory for config file discovery when no
    /// explicit path is provided in `cli_args`.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory
    ///
    /// This is the path-driven variant used by tests to avoid depending on the
    /// process working directory.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let mut source_attribution = HashMap::new();

        let mut engine = EngineConfig::default();
        let mut retrieval = RetrievalConfig::default();
        let mut fetch = FetchConfig::default();
        let mut reasoning = ReasoningConfig::default();
        let mut llm = LlmConfig::default();

        for key in DEFAULT_KEYS {
            source_attribution.insert((*key).to_string(), ConfigSource::Default);
        }

        let config_path = match &cli_args.config_path {
            Some(explicit_path) => Some(explicit_path.clone()),
            None => Self::discover_config_file_from(start_dir)?,
        };

        if let Some(path) = &config_path {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            let file_config = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;

            let src = ConfigSource::Config;
            let attr = &mut source_attribution;

            if let Some(file_engine) = file_config.engine {
                overlay(&mut engine.top_k, file_engine.top_k, "top_k", src, attr);
                overlay(
                    &mut engine.max_iterations,
                    file_engine.max_iterations,
                    "max_iterations",
                    src,
                    attr,
                );
                overlay(
                    &mut engine.concurrency,
                    file_engine.concurrency,
                    "concurrency",
                    src,
                    attr,
                );
                overlay(
                    &mut engine.deadline_secs,
                    file_engine.deadline_secs,
                    "deadline_secs",
                    src,
                    attr,
                );
                overlay(
                    &mut engine.draft_char_budget,
                    file_engine.draft_char_budget,
                    "draft_char_budget",
                    src,
                    attr,
                );
                overlay(
                    &mut engine.match_threshold,
                    file_engine.match_threshold,
                    "match_threshold",
                    src,
                    attr,
                );
                overlay(
                    &mut engine.window_tolerance,
                    file_engine.window_tolerance,
                    "window_tolerance",
                    src,
                    attr,
                );
                overlay(
                    &mut engine.max_documents_analyzed,
                    file_engine.max_documents_analyzed,
                    "max_documents_analyzed",
                    src,
                    attr,
                );
            }

            if let Some(file_retrieval) = file_config.retrieval {
                overlay(&mut retrieval.url, file_retrieval.url, "retrieval_url", src, attr);
                overlay(
                    &mut retrieval.timeout_secs,
                    file_retrieval.timeout_secs,
                    "retrieval_timeout_secs",
                    src,
                    attr,
                );
                overlay(
                    &mut retrieval.content_type,
                    file_retrieval.content_type,
                    "content_type",
                    src,
                    attr,
                );
                overlay(
                    &mut retrieval.use_refine,
                    file_retrieval.use_refine,
                    "use_refine",
                    src,
                    attr,
                );
            }

            if let Some(file_fetch) = file_config.fetch {
                overlay(
                    &mut fetch.timeout_secs,
                    file_fetch.timeout_secs,
                    "fetch_timeout_secs",
                    src,
                    attr,
                );
                overlay(&mut fetch.retries, file_fetch.retries, "fetch_retries", src, attr);
            }

            if let Some(file_reasoning) = file_config.reasoning {
                overlay(
                    &mut reasoning.max_retries,
                    file_reasoning.max_retries,
                    "reasoning_max_retries",
                    src,
                    attr,
                );
                overlay(
                    &mut reasoning.initial_backoff_ms,
                    file_reasoning.initial_backoff_ms,
                    "initial_backoff_ms",
                    src,
                    attr,
                );
                overlay(
                    &mut reasoning.timeout_secs,
                    file_reasoning.timeout_secs,
                    "reasoning_timeout_secs",
                    src,
                    attr,
                );
            }

            if let Some(file_llm) = file_config.llm {
                overlay(&mut llm.provider, file_llm.provider, "llm_provider", src, attr);
                overlay(
                    &mut llm.fallback_provider,
                    file_llm.fallback_provider,
                    "llm_fallback_provider",
                    src,
                    attr,
                );
                overlay(
                    &mut llm.openrouter,
                    file_llm.openrouter,
                    "llm_openrouter_config",
                    src,
                    attr,
                );
                overlay(
                    &mut llm.anthropic,
                    file_llm.anthropic,
                    "llm_anthropic_config",
                    src,
                    attr,
                );
            }
        }

        // Environment overrides the file
        let env_src = ConfigSource::Env;
        overlay(
            &mut llm.provider,
            env_value(ENV_LLM_PROVIDER),
            "llm_provider",
            env_src,
            &mut source_attribution,
        );
        overlay(
            &mut retrieval.url,
            env_value(ENV_RETRIEVAL_URL),
            "retrieval_url",
            env_src,
            &mut source_attribution,
        );
        if let Some(raw) = env_value(ENV_MAX_ITERATIONS) {
            let parsed = raw.trim().parse::<u32>().map_err(|_| {
                concord_utils::error::ConfigError::InvalidValue {
                    key: "max_iterations".to_string(),
                    value: format!("{ENV_MAX_ITERATIONS}='{raw}' is not a positive integer"),
                }
            })?;
            overlay(
                &mut engine.max_iterations,
                Some(parsed),
                "max_iterations",
                env_src,
                &mut source_attribution,
            );
        }

        // CLI overrides everything
        let cli = ConfigSource::Cli;
        let attr = &mut source_attribution;
        overlay(&mut engine.top_k, cli_args.top_k, "top_k", cli, attr);
        overlay(
            &mut engine.max_iterations,
            cli_args.max_iterations,
            "max_iterations",
            cli,
            attr,
        );
        overlay(
            &mut engine.concurrency,
            cli_args.concurrency,
            "concurrency",
            cli,
            attr,
        );
        overlay(
            &mut engine.deadline_secs,
            cli_args.deadline_secs,
            "deadline_secs",
            cli,
            attr,
        );
        overlay(
            &mut engine.match_threshold,
            cli_args.match_threshold,
            "match_threshold",
            cli,
            attr,
        );
        overlay(
            &mut retrieval.url,
            cli_args.retrieval_url.clone(),
            "retrieval_url",
            cli,
            attr,
        );
        overlay(
            &mut llm.provider,
            cli_args.llm_provider.clone(),
            "llm_provider",
            cli,
            attr,
        );
        if let Some(model) = &cli_args.model {
            let openrouter = llm.openrouter.get_or_insert_with(OpenRouterConfig::default);
            openrouter.model = Some(model.clone());
            attr.insert("llm_openrouter_config".to_string(), cli);
        }

        if llm.provider.is_none() {
            llm.provider = Some(super::DEFAULT_PROVIDER.to_string());
            attr.insert("llm_provider".to_string(), ConfigSource::Default);
        }

        let config = Self {
            engine,
            retrieval,
            fetch,
            reasoning,
            llm,
            source_attribution,
        };

        config.validate()?;

        Ok(config)
    }

    /// Discover config file by searching upward from a given directory
    ///
    /// Walks up the directory tree looking for `.concord/config.toml`, stopping
    /// at repository root markers (.git, .hg, .svn) or the filesystem root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(".concord").join("config.toml");
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists()
                || current_dir.join(".hg").exists()
                || current_dir.join(".svn").exists()
            {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load configuration from TOML file
    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: TomlConfig = toml::from_str(&content).map_err(|e| {
                    concord_utils::error::ConfigError::InvalidFile(format!(
                        "{}: {e}",
                        path.display()
                    ))
                })?;
                Ok(config)
            }
            // An explicitly named but missing file falls back to defaults
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TomlConfig::default()),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }

    /// Discover configuration from environment and filesystem without CLI
    /// overrides.
    pub fn discover_from_env_and_fs() -> Result<Self> {
        Self::discover(&CliArgs::default())
    }
}

const DEFAULT_KEYS: &[&str] = &[
    "top_k",
    "max_iterations",
    "concurrency",
    "deadline_secs",
    "draft_char_budget",
    "match_threshold",
    "window_tolerance",
    "max_documents_analyzed",
    "retrieval_url",
    "retrieval_timeout_secs",
    "content_type",
    "use_refine",
    "fetch_timeout_secs",
    "fetch_retries",
    "reasoning_max_retries",
    "initial_backoff_ms",
    "reasoning_timeout_secs",
];
