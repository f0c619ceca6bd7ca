//! `concord check`: run one consistency request end to end.

use anyhow::{Context, Result};
use concord_utils::logging::preview;
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;
use tracing::debug;

use super::json_emit::emit_response_json;
use crate::engine::prompts::display_name;
use crate::engine::report::diff_summary;
use crate::engine::{
    ApiRequest, ConsistencyReport, ConsistencyResponse, DocumentStatus, ModificationRequest,
    Orchestrator,
};
use crate::{ConcordError, Config};

/// Read an API-shaped request from `path`, or from stdin when it is `-`.
pub fn load_api_request(path: &Path) -> Result<ApiRequest> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file: {}", path.display()))?
    };

    serde_json::from_str(&raw).map_err(|e| {
        anyhow::Error::from(ConcordError::InvalidRequest {
            field: "request".to_string(),
            reason: e.to_string(),
        })
    })
}

pub async fn execute_check_command(
    request: ModificationRequest,
    json: bool,
    config: &Config,
) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    debug!(settings = ?orchestrator.settings(), "Engine settings resolved");

    match orchestrator.run(&request).await {
        Ok(report) => {
            if json {
                let response = ConsistencyResponse::from_report(&request, &report);
                println!("{}", emit_response_json(&response)?);
            } else {
                print!("{}", render_report(&report));
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let response = ConsistencyResponse::failure(&request.point, &err);
                println!("{}", emit_response_json(&response)?);
            }
            Err(err.into())
        }
    }
}

fn status_marker(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Applied => "✓",
        DocumentStatus::NoChangeNeeded => "·",
        DocumentStatus::Unresolved => "?",
        DocumentStatus::Failed => "✗",
        DocumentStatus::Degraded => "⚠",
    }
}

/// Human-readable rendering of a report, one line per document.
#[must_use]
pub fn render_report(report: &ConsistencyReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Consistency check: {} document(s), {} related, {} passage(s)",
        report.results.len(),
        report.total_documents,
        report.total_passages
    );

    if report.results.is_empty() {
        let _ = writeln!(out, "  No documents found that need modification");
        return out;
    }

    let summary = &report.summary;
    let _ = writeln!(
        out,
        "  Change type: {}{}",
        summary.modification_type,
        if summary.global_consistency_required {
            " (global consistency required)"
        } else {
            ""
        }
    );

    for result in &report.results {
        let _ = writeln!(
            out,
            "  {} {} [{}] {}",
            status_marker(result.status),
            display_name(&result.document_id),
            result.status,
            diff_summary(result)
        );
        for unresolved in &result.unresolved {
            let _ = writeln!(
                out,
                "      unresolved #{} (best match {:.2}): {}",
                unresolved.point_index,
                unresolved.best_score,
                preview(&unresolved.original_excerpt)
            );
        }
    }

    if let Some(error) = &report.retrieval_error {
        let _ = writeln!(
            out,
            "⚠ Retrieval failed ({}); only the target document was checked",
            error.message
        );
    }
    if report.deadline_exceeded {
        let _ = writeln!(out, "⚠ Deadline exceeded; pending work was cancelled");
    }
    out
}
