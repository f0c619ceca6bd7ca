//! CLI entry point and dispatch logic
//!
//! This module owns the `run()` function which:
//! - Parses CLI arguments
//! - Builds CliArgs and discovers Config
//! - Installs tracing
//! - Creates the tokio runtime
//! - Dispatches to command handlers
//! - Handles all error output

use anyhow::Result;
use clap::Parser;

use super::args::{Cli, Commands};
use super::commands;

use crate::engine::ModificationRequest;
use crate::{CliArgs, ConcordError, Config, ExitCode};

/// Main CLI execution function.
///
/// Handles ALL output including errors and returns the exit code to use on
/// failure. main.rs only calls `std::process::exit(code.as_i32())`.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = concord_utils::logging::init_tracing(cli.verbose, cli.log_json) {
        eprintln!("✗ Failed to initialize logging: {e}");
        return Err(ExitCode::INTERNAL);
    }

    let cli_args = cli_args_from(&cli);

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            report_error(&err);
            return Err(exit_code_for(&err).unwrap_or(ExitCode::CLI_ARGS));
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Check {
                point,
                instruction,
                project,
                top_k,
                target,
                no_related,
                request,
                json,
            } => {
                let request = match request {
                    Some(path) => commands::load_api_request(&path)?.into_request(),
                    None => build_request(
                        point,
                        instruction,
                        project,
                        top_k.unwrap_or_else(|| config.top_k()),
                        target,
                        no_related,
                    )?,
                };
                commands::execute_check_command(request, json, &config).await
            }
            Commands::Config { json } => commands::execute_config_command(json, &config),
        }
    });

    if let Err(error) = result {
        report_error(&error);
        return Err(exit_code_for(&error).unwrap_or(ExitCode::INTERNAL));
    }

    Ok(())
}

/// Configuration overrides carried by the command line.
pub(crate) fn cli_args_from(cli: &Cli) -> CliArgs {
    let top_k = match &cli.command {
        Commands::Check { top_k, .. } => *top_k,
        Commands::Config { .. } => None,
    };
    CliArgs {
        config_path: cli.config.clone(),
        top_k,
        max_iterations: cli.max_iterations,
        concurrency: cli.concurrency,
        deadline_secs: cli.deadline_secs,
        match_threshold: cli.match_threshold,
        retrieval_url: cli.retrieval_url.clone(),
        llm_provider: cli.llm_provider.clone(),
        model: cli.model.clone(),
    }
}

/// Assemble a request from positional arguments; clap guarantees presence
/// unless `--request` was given.
pub(crate) fn build_request(
    point: Option<String>,
    instruction: Option<String>,
    project: Option<String>,
    top_k: usize,
    target: Option<String>,
    no_related: bool,
) -> Result<ModificationRequest> {
    let missing = |field: &str| ConcordError::InvalidRequest {
        field: field.to_string(),
        reason: "is required".to_string(),
    };
    let point = point.ok_or_else(|| missing("modification_point"))?;
    let instruction = instruction.ok_or_else(|| missing("modification_request"))?;
    let project = project.ok_or_else(|| missing("project_id"))?;

    let request = ModificationRequest::new(point, instruction, project)
        .with_top_k(top_k)
        .with_include_related(!no_related);
    Ok(match target {
        Some(target) => request.with_target_document(target),
        None => request,
    })
}

fn exit_code_for(error: &anyhow::Error) -> Option<ExitCode> {
    error
        .downcast_ref::<ConcordError>()
        .map(ConcordError::to_exit_code)
}

fn report_error(error: &anyhow::Error) {
    if let Some(concord_error) = error.downcast_ref::<ConcordError>() {
        eprintln!("{}", concord_error.display_for_user());
    } else {
        eprintln!("✗ {error:#}");
        eprintln!("\n  General troubleshooting:");
        eprintln!("    - Run with --verbose for more detailed output");
        eprintln!("    - Run `concord config` to inspect the effective configuration");
    }
}
