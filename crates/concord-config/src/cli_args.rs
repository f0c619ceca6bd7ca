use std::path::PathBuf;

/// CLI arguments for configuration override
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub top_k: Option<usize>,
    pub max_iterations: Option<u32>,
    pub concurrency: Option<usize>,
    pub deadline_secs: Option<u64>,
    pub match_threshold: Option<f64>,
    pub retrieval_url: Option<String>,
    pub llm_provider: Option<String>,
    pub model: Option<String>,
}
