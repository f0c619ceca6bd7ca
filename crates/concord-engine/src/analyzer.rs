//! Consistency Analyzer: decides which documents a request touches and
//! where.
//!
//! Two kinds of reasoning calls are made here. One corpus-wide summary call
//! over short document previews, which never fails the request, and one
//! call per document that returns its modification points. A failure of the
//! per-document call is returned to the caller for that document only.

use concord_utils::error::EngineError;
use concord_utils::logging::preview;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use unicode_normalization::{UnicodeNormalization, is_nfc};

use crate::gateway::ReasoningGateway;
use crate::json::parse_json_answer;
use crate::model::{ConsistencySummary, DocumentCandidate, ModificationPoint, ModificationRequest};
use crate::prompts;

const SUMMARY_MAX_TOKENS: u32 = 1000;
const ANALYSIS_MAX_TOKENS: u32 = 4000;

#[derive(Debug, Deserialize)]
struct SummaryAnswer {
    #[serde(default)]
    needs_modification: Vec<String>,
    #[serde(default)]
    modification_type: String,
    #[serde(default)]
    consistency_analysis: String,
    #[serde(default)]
    global_consistency_required: bool,
}

#[derive(Debug, Deserialize)]
struct AnalysisAnswer {
    #[serde(default)]
    modifications: Vec<AnalysisEntry>,
}

#[derive(Debug, Deserialize)]
struct AnalysisEntry {
    #[serde(default)]
    location: String,
    #[serde(default)]
    original_text: String,
    #[serde(default)]
    reason: String,
}

pub struct ConsistencyAnalyzer<'a> {
    reasoning: &'a dyn ReasoningGateway,
    max_documents_analyzed: usize,
}

impl<'a> ConsistencyAnalyzer<'a> {
    #[must_use]
    pub fn new(reasoning: &'a dyn ReasoningGateway, max_documents_analyzed: usize) -> Self {
        Self {
            reasoning,
            max_documents_analyzed,
        }
    }

    /// Corpus-wide assessment over the first `max_documents_analyzed`
    /// documents.
    ///
    /// Falls back to "every document needs the change" when the call or its
    /// answer fails; the failure is logged, never returned.
    pub async fn summarize(
        &self,
        request: &ModificationRequest,
        documents: &[&DocumentCandidate],
    ) -> ConsistencySummary {
        if documents.is_empty() {
            return ConsistencySummary::empty();
        }

        let analyzed: Vec<&DocumentCandidate> = documents
            .iter()
            .take(self.max_documents_analyzed)
            .copied()
            .collect();
        let all_ids = || documents.iter().map(|d| d.document_id.clone());

        let prompt = prompts::summary_prompt(request, &analyzed);
        let completion = match self.reasoning.complete(&prompt, SUMMARY_MAX_TOKENS).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Consistency summary failed, assuming all documents change");
                return ConsistencySummary::assume_all(all_ids(), &e.to_string());
            }
        };

        match parse_json_answer::<SummaryAnswer>(&completion.text) {
            Ok(answer) => {
                info!(
                    modification_type = %answer.modification_type,
                    needing_change = answer.needs_modification.len(),
                    global = answer.global_consistency_required,
                    "Consistency summary ready"
                );
                ConsistencySummary {
                    modification_type: answer.modification_type,
                    analysis: answer.consistency_analysis,
                    global_consistency_required: answer.global_consistency_required,
                    documents_needing_change: answer.needs_modification,
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    answer = %preview(&completion.text),
                    "Consistency summary unparseable, assuming all documents change"
                );
                ConsistencySummary::assume_all(all_ids(), "unparseable answer")
            }
        }
    }

    /// Modification points for one document; empty when it does not need
    /// to change.
    ///
    /// Excerpts are normalized to the document's Unicode form and duplicates
    /// are dropped, so two points never target the same text.
    ///
    /// # Errors
    ///
    /// The reasoning error, or `EngineError::ModelError` when the answer is
    /// not a modification list.
    pub async fn analyze_document(
        &self,
        request: &ModificationRequest,
        document: &DocumentCandidate,
    ) -> Result<Vec<ModificationPoint>, EngineError> {
        let prompt = prompts::document_analysis_prompt(request, document);
        let completion = self.reasoning.complete(&prompt, ANALYSIS_MAX_TOKENS).await?;

        let answer: AnalysisAnswer = parse_json_answer(&completion.text).map_err(|e| {
            EngineError::ModelError(format!("unparseable modification list: {e}"))
        })?;

        let document_is_nfc = is_nfc(&document.full_text);
        let mut seen = HashSet::new();
        let mut points = Vec::with_capacity(answer.modifications.len());
        for entry in answer.modifications {
            let excerpt = if document_is_nfc {
                entry.original_text.nfc().collect::<String>()
            } else {
                entry.original_text
            };
            if excerpt.trim().is_empty() {
                warn!(
                    document_id = %document.document_id,
                    location = %entry.location,
                    "Dropping modification point without an excerpt"
                );
                continue;
            }
            if !seen.insert(excerpt.clone()) {
                debug!(document_id = %document.document_id, "Dropping duplicate excerpt");
                continue;
            }
            points.push(ModificationPoint {
                document_id: document.document_id.clone(),
                location_hint: entry.location,
                original_excerpt: excerpt,
                reason: entry.reason,
            });
        }

        if completion.truncated {
            warn!(
                document_id = %document.document_id,
                points = points.len(),
                "Modification list was truncated; later points may be missing"
            );
        }
        info!(
            document_id = %document.document_id,
            points = points.len(),
            "Document analyzed"
        );
        Ok(points)
    }
}
