//! API-facing request and response shapes.
//!
//! The engine works on [`ModificationRequest`] and [`ConsistencyReport`];
//! this module converts to and from the JSON schema exposed to callers.

use concord_utils::canonicalization::content_hash_first8;
use concord_utils::error::ConcordError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{
    AgentStep, ConsistencyReport, ConsistencySummary, DocumentPatchResult, DocumentStatus,
    ModificationRequest, SearchRecord,
};

fn default_top_k() -> usize {
    concord_config::DEFAULT_TOP_K
}

fn default_include_related() -> bool {
    true
}

/// Incoming consistency-check request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub modification_point: String,
    pub modification_request: String,
    pub project_id: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    #[serde(default = "default_include_related")]
    pub include_related: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn into_request(self) -> ModificationRequest {
        let request = ModificationRequest::new(
            self.modification_point,
            self.modification_request,
            self.project_id,
        )
        .with_top_k(self.top_k)
        .with_include_related(self.include_related);
        match self.target_file {
            Some(target) => request.with_target_document(target),
            None => request,
        }
    }
}

/// One step of a loop, tagged with the point it served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub point_index: usize,
    #[serde(flatten)]
    pub step: AgentStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub point_index: usize,
    #[serde(flatten)]
    pub search: SearchRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationEntry {
    pub file_path: String,
    pub original_content: String,
    pub modified_content: String,
    pub diff_summary: String,
    /// Lengths are in characters.
    pub original_length: usize,
    pub modified_length: usize,
    pub react_thinking_process: Vec<ThinkingStep>,
    pub react_search_history: Vec<SearchEntry>,
    pub truncated: bool,
    pub status: DocumentStatus,
    /// Short BLAKE3 fingerprint of `modified_content`.
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyResponse {
    pub success: bool,
    pub modification_point: String,
    pub total_files: usize,
    pub total_chunks: usize,
    pub modifications: Vec<ModificationEntry>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_analysis: Option<ConsistencySummary>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deadline_exceeded: bool,
}

impl ConsistencyResponse {
    /// Shape a finished report. `success` is always true: the pipeline ran
    /// to completion even when individual documents did not.
    #[must_use]
    pub fn from_report(request: &ModificationRequest, report: &ConsistencyReport) -> Self {
        let modifications: Vec<ModificationEntry> =
            report.results.iter().map(modification_entry).collect();

        let message = if report.results.is_empty() {
            "No documents found that need modification".to_string()
        } else {
            let changed = report.count(DocumentStatus::Applied);
            let mut message = format!(
                "Analyzed {} document(s), {} modified",
                report.results.len(),
                changed
            );
            for status in [
                DocumentStatus::Unresolved,
                DocumentStatus::Failed,
                DocumentStatus::Degraded,
            ] {
                let n = report.count(status);
                if n > 0 {
                    message.push_str(&format!(", {n} {status}"));
                }
            }
            if report.retrieval_error.is_some() {
                message.push_str(" (retrieval failed, target document only)");
            }
            if report.deadline_exceeded {
                message.push_str(" (deadline exceeded)");
            }
            message
        };

        Self {
            success: true,
            modification_point: request.point.clone(),
            total_files: report.total_documents,
            total_chunks: report.total_passages,
            modifications,
            message,
            consistency_analysis: Some(report.summary.clone()),
            deadline_exceeded: report.deadline_exceeded,
        }
    }

    /// Response for a request that could not run at all.
    #[must_use]
    pub fn failure(modification_point: &str, error: &ConcordError) -> Self {
        Self {
            success: false,
            modification_point: modification_point.to_string(),
            total_files: 0,
            total_chunks: 0,
            modifications: Vec::new(),
            message: format!("Check failed: {error}"),
            consistency_analysis: None,
            deadline_exceeded: false,
        }
    }
}

fn modification_entry(result: &DocumentPatchResult) -> ModificationEntry {
    let react_thinking_process = result
        .traces
        .iter()
        .flat_map(|t| {
            t.trace.steps().iter().map(|step| ThinkingStep {
                point_index: t.point_index,
                step: step.clone(),
            })
        })
        .collect();
    let react_search_history = result
        .traces
        .iter()
        .flat_map(|t| {
            t.trace
                .search_history()
                .into_iter()
                .map(|search| SearchEntry {
                    point_index: t.point_index,
                    search,
                })
        })
        .collect();

    ModificationEntry {
        file_path: result.document_id.clone(),
        original_content: result.original_content.clone(),
        modified_content: result.modified_content.clone(),
        diff_summary: diff_summary(result),
        original_length: result.original_content.chars().count(),
        modified_length: result.modified_content.chars().count(),
        react_thinking_process,
        react_search_history,
        truncated: result.truncated,
        status: result.status,
        content_hash: content_hash_first8(&result.modified_content),
    }
}

/// Human-readable summary of what happened to one document.
#[must_use]
pub fn diff_summary(result: &DocumentPatchResult) -> String {
    let reason = || {
        result
            .errors
            .first()
            .map_or_else(|| "unknown error".to_string(), |e| e.message.clone())
    };

    let mut summary = match result.status {
        DocumentStatus::NoChangeNeeded => return "no change needed".to_string(),
        DocumentStatus::Failed if result.traces.is_empty() => {
            return format!("failed: {}", reason());
        }
        DocumentStatus::Degraded if result.traces.is_empty() => {
            return format!("degraded: {}", reason());
        }
        DocumentStatus::Failed => format!(
            "failed: {}; applied 0 of {} modification(s)",
            reason(),
            result.point_count()
        ),
        DocumentStatus::Degraded => format!(
            "degraded: applied {} of {} modification(s)",
            result.applied_patches.len(),
            result.point_count()
        ),
        DocumentStatus::Applied | DocumentStatus::Unresolved => format!(
            "applied {} of {} modification(s)",
            result.applied_patches.len(),
            result.point_count()
        ),
    };

    if !result.unresolved.is_empty() {
        summary.push_str(&format!(", {} unresolved", result.unresolved.len()));
    }
    if !result.superseded.is_empty() {
        summary.push_str(&format!(", {} superseded", result.superseded.len()));
    }
    if result.truncated {
        summary.push_str(", truncated");
    }

    let (added, removed) = line_delta(&result.original_content, &result.modified_content);
    summary.push_str(&format!("; lines: +{added}/-{removed}"));
    summary
}

/// Lines present only in `modified` and only in `original`, as multisets.
fn line_delta(original: &str, modified: &str) -> (usize, usize) {
    let mut counts: HashMap<&str, isize> = HashMap::new();
    for line in original.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    for line in modified.lines() {
        *counts.entry(line).or_default() += 1;
    }
    counts.values().fold((0, 0), |(added, removed), &n| {
        if n > 0 {
            (added + n.unsigned_abs(), removed)
        } else {
            (added, removed + n.unsigned_abs())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AgentAction, AgentTrace, ModificationPoint, PatchCandidate, PointTrace, UnresolvedPatch,
    };
    use concord_utils::error::EngineError;

    fn trace_with_search() -> AgentTrace {
        let mut trace = AgentTrace::new();
        trace.push(AgentStep {
            iteration: 1,
            action: AgentAction::Search {
                query: "early-season".into(),
                success: true,
                has_content: true,
            },
            rationale: "look for context".into(),
            forced: false,
        });
        trace.push(AgentStep {
            iteration: 2,
            action: AgentAction::Generate {
                draft: "early-crop classification".into(),
                truncated: false,
                error: None,
            },
            rationale: "enough context".into(),
            forced: false,
        });
        trace
    }

    fn applied_result() -> DocumentPatchResult {
        let original = "Intro\nWe use early-season classification.\nEnd\n";
        let modified = "Intro\nWe use early-crop classification.\nEnd\n";
        let mut result =
            DocumentPatchResult::unprocessed("http://d/a.md", original, DocumentStatus::Applied, None);
        result.modified_content = modified.to_string();
        result.applied_patches.push(PatchCandidate {
            point_index: 0,
            start: 13,
            end: 40,
            replacement: "early-crop classification".into(),
            confidence: 1.0,
        });
        result.traces.push(PointTrace {
            point_index: 0,
            point: ModificationPoint {
                document_id: "http://d/a.md".into(),
                location_hint: "intro".into(),
                original_excerpt: "early-season classification".into(),
                reason: "rename".into(),
            },
            trace: trace_with_search(),
        });
        result
    }

    #[test]
    fn test_api_request_defaults() {
        let api: ApiRequest = serde_json::from_str(
            r#"{"modification_point": "p", "modification_request": "r", "project_id": "x"}"#,
        )
        .unwrap();
        assert_eq!(api.top_k, 15);
        assert!(api.include_related);
        let request = api.into_request();
        assert_eq!(request.corpus_id, "x");
        assert!(request.target_document.is_none());
    }

    #[test]
    fn test_api_request_target_file() {
        let api: ApiRequest = serde_json::from_str(
            r#"{"modification_point": "p", "modification_request": "r", "project_id": "x",
                "target_file": "http://d/t.md", "include_related": false, "top_k": 3}"#,
        )
        .unwrap();
        let request = api.into_request();
        assert_eq!(request.target_document.as_deref(), Some("http://d/t.md"));
        assert!(!request.include_related);
        assert_eq!(request.top_k, 3);
    }

    #[test]
    fn test_diff_summary_applied() {
        let summary = diff_summary(&applied_result());
        assert_eq!(summary, "applied 1 of 1 modification(s); lines: +1/-1");
    }

    #[test]
    fn test_diff_summary_suffixes() {
        let mut result = applied_result();
        result.truncated = true;
        result.unresolved.push(UnresolvedPatch {
            point_index: 1,
            original_excerpt: "missing".into(),
            replacement: "x".into(),
            best_score: 0.2,
        });
        let summary = diff_summary(&result);
        assert!(summary.starts_with("applied 1 of 1 modification(s), 1 unresolved, truncated"));
    }

    #[test]
    fn test_diff_summary_terminal_states() {
        let result = DocumentPatchResult::unprocessed(
            "http://d/b.md",
            "text",
            DocumentStatus::NoChangeNeeded,
            None,
        );
        assert_eq!(diff_summary(&result), "no change needed");

        let result = DocumentPatchResult::unprocessed(
            "http://d/c.md",
            "",
            DocumentStatus::Failed,
            Some(&EngineError::DocumentNotFound("http://d/c.md".into())),
        );
        assert_eq!(
            diff_summary(&result),
            "failed: Document not found: http://d/c.md"
        );
    }

    #[test]
    fn test_entry_flattens_traces() {
        let entry = modification_entry(&applied_result());
        assert_eq!(entry.react_thinking_process.len(), 2);
        assert_eq!(entry.react_search_history.len(), 1);
        assert_eq!(entry.react_search_history[0].search.query, "early-season");
        assert_eq!(entry.original_length, 46);
        assert_eq!(entry.content_hash.len(), 8);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["react_thinking_process"][0]["point_index"], 0);
        assert_eq!(json["react_thinking_process"][0]["action"]["type"], "search");
        assert_eq!(json["status"], "applied");
    }

    #[test]
    fn test_response_without_documents() {
        let request = ModificationRequest::new("p", "r", "x");
        let report = ConsistencyReport {
            total_documents: 0,
            total_passages: 0,
            summary: ConsistencySummary::empty(),
            results: Vec::new(),
            deadline_exceeded: false,
            retrieval_error: None,
            generated_at: chrono::Utc::now(),
        };
        let response = ConsistencyResponse::from_report(&request, &report);
        assert!(response.success);
        assert_eq!(response.total_files, 0);
        assert!(response.modifications.is_empty());
    }

    #[test]
    fn test_failure_response() {
        let error = ConcordError::Engine(EngineError::RetrievalUnavailable("down".into()));
        let response = ConsistencyResponse::failure("p", &error);
        assert!(!response.success);
        assert!(response.message.starts_with("Check failed"));
    }

    #[test]
    fn test_line_delta() {
        assert_eq!(line_delta("a\nb\nc", "a\nx\nc\nd"), (2, 1));
        assert_eq!(line_delta("same", "same"), (0, 0));
    }
}
