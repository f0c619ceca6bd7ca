//! CLI argument definitions and parsing structures
//!
//! This module defines the command-line interface structure using clap,
//! including the main `Cli` struct and the subcommand enum.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// concord - propagate a change consistently across a document corpus
#[derive(Parser, Debug)]
#[command(name = "concord")]
#[command(about = "Propagate a textual change consistently across a retrieved document corpus")]
#[command(long_about = r#"
concord retrieves every document in a corpus that shares the subject of a
requested change, decides where each one must be edited, drafts the edits
with a bounded search-and-generate loop and reports the patched documents.

EXAMPLES:
  # Rename a term everywhere it appears in project "agri"
  concord check "early-season classification" \
      "rename to early-crop classification and add a food-security note" \
      --project agri

  # Only edit one document, skip retrieval
  concord check "release date" "move to Q3" --project docs \
      --target https://files.example.com/docs/plan.md --no-related

  # Read the request from an API-shaped JSON file and emit canonical JSON
  concord check --request request.json --json

  # Show the effective configuration and where each value came from
  concord config

CONFIGURATION:
  Precedence: CLI flags > CONCORD_* environment variables > config file > defaults
  The config file is discovered by searching upward from CWD for .concord/config.toml
  Use --config to specify an explicit config file path
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// ReAct iteration budget per modification point
    #[arg(long, global = true)]
    pub max_iterations: Option<u32>,

    /// Maximum number of documents processed concurrently
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Global wall-clock deadline for one request, in seconds
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Fuzzy match acceptance threshold in (0, 1]
    #[arg(long, global = true)]
    pub match_threshold: Option<f64>,

    /// Retrieval service search endpoint
    #[arg(long, global = true)]
    pub retrieval_url: Option<String>,

    /// Reasoning provider: openrouter or anthropic
    #[arg(long, global = true)]
    pub llm_provider: Option<String>,

    /// Model to use for reasoning calls
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a consistency check and print the per-document outcome
    Check {
        /// Subject of the change, used as the retrieval query
        #[arg(required_unless_present = "request")]
        point: Option<String>,

        /// What to change, in natural language
        #[arg(required_unless_present = "request")]
        instruction: Option<String>,

        /// Corpus (project) identifier
        #[arg(long, required_unless_present = "request")]
        project: Option<String>,

        /// Number of passages to retrieve
        #[arg(long)]
        top_k: Option<usize>,

        /// Document to process first, regardless of retrieval
        #[arg(long)]
        target: Option<String>,

        /// Skip retrieval and only process --target
        #[arg(long, requires = "target")]
        no_related: bool,

        /// Read the request from a JSON file in API shape ("-" for stdin)
        #[arg(long, conflicts_with_all = ["point", "instruction", "project"])]
        request: Option<PathBuf>,

        /// Output the API response as canonical JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration with value sources
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[must_use]
pub fn build_cli() -> clap::Command {
    <Cli as clap::CommandFactory>::command()
}
