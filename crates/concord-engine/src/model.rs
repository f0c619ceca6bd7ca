//! Data model shared by every stage of the propagation engine.

use chrono::{DateTime, Utc};
use concord_config::DEFAULT_TOP_K;
use concord_utils::error::{ConcordError, EngineError};
use serde::{Deserialize, Serialize};

/// One user request: which concept to change and how.
///
/// Immutable once constructed; every stage borrows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRequest {
    /// The concept or phrase being changed ("early-season classification").
    pub point: String,
    /// Free-text instruction describing the change.
    pub instruction: String,
    /// Project / corpus the retrieval service searches.
    pub corpus_id: String,
    pub top_k: usize,
    /// Document processed first and always reported, independent of retrieval.
    pub target_document: Option<String>,
    /// When false, retrieval is skipped and only `target_document` is processed.
    pub include_related: bool,
}

impl ModificationRequest {
    #[must_use]
    pub fn new(
        point: impl Into<String>,
        instruction: impl Into<String>,
        corpus_id: impl Into<String>,
    ) -> Self {
        Self {
            point: point.into(),
            instruction: instruction.into(),
            corpus_id: corpus_id.into(),
            top_k: DEFAULT_TOP_K,
            target_document: None,
            include_related: true,
        }
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[must_use]
    pub fn with_target_document(mut self, document_id: impl Into<String>) -> Self {
        self.target_document = Some(document_id.into());
        self
    }

    #[must_use]
    pub fn with_include_related(mut self, include_related: bool) -> Self {
        self.include_related = include_related;
        self
    }

    /// Reject requests the engine cannot act on.
    ///
    /// # Errors
    ///
    /// `ConcordError::InvalidRequest` naming the offending field.
    pub fn validate(&self) -> Result<(), ConcordError> {
        let invalid = |field: &str, reason: &str| ConcordError::InvalidRequest {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.point.trim().is_empty() {
            return Err(invalid("modification_point", "must not be empty"));
        }
        if self.instruction.trim().is_empty() {
            return Err(invalid("modification_request", "must not be empty"));
        }
        if self.corpus_id.trim().is_empty() {
            return Err(invalid("project_id", "must not be empty"));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k", "must be at least 1"));
        }
        if !self.include_related && self.target_document.is_none() {
            return Err(invalid(
                "include_related",
                "a target document is required when related documents are excluded",
            ));
        }
        Ok(())
    }
}

/// A scored fragment returned by the retrieval service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub document_id: String,
    pub raw_text_fragment: String,
    /// Relevance in `[0, 1]`.
    pub relevance_score: f64,
    #[serde(default)]
    pub source_metadata: serde_json::Value,
    /// Last modification time of the source document, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RetrievedPassage {
    #[must_use]
    pub fn new(
        document_id: impl Into<String>,
        raw_text_fragment: impl Into<String>,
        relevance_score: f64,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            raw_text_fragment: raw_text_fragment.into(),
            relevance_score: relevance_score.clamp(0.0, 1.0),
            source_metadata: serde_json::Value::Null,
            updated_at: None,
        }
    }
}

/// Order passages by relevance, then recency, then input order.
pub fn rank_passages(passages: &mut [RetrievedPassage]) {
    // sort_by is stable, so equal keys keep their input order
    passages.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| match (a.updated_at, b.updated_at) {
                (Some(a), Some(b)) => b.cmp(&a),
                _ => std::cmp::Ordering::Equal,
            })
    });
}

/// Result of one retrieval call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub passages: Vec<RetrievedPassage>,
    /// Every passage the service returned, including ones that were skipped
    /// because their source cannot be fetched.
    pub total_passages: usize,
}

impl SearchResults {
    #[must_use]
    pub fn from_passages(passages: Vec<RetrievedPassage>) -> Self {
        let total_passages = passages.len();
        Self {
            passages,
            total_passages,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// A document with its full text and the passages that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCandidate {
    pub document_id: String,
    pub full_text: String,
    pub passages: Vec<RetrievedPassage>,
}

/// Where and why one document needs to change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationPoint {
    pub document_id: String,
    pub location_hint: String,
    pub original_excerpt: String,
    pub reason: String,
}

/// One action taken by a ReAct loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentAction {
    Search {
        query: String,
        /// The retrieval call completed.
        success: bool,
        /// The retrieval call returned at least one passage.
        has_content: bool,
    },
    Generate {
        /// Empty when the attempt failed.
        draft: String,
        /// The reasoning backend stopped at its token ceiling.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
        /// Why the attempt produced no draft.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Finish,
}

impl AgentAction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::Generate { .. } => "generate",
            Self::Finish => "finish",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    /// 1-based, strictly increasing within a trace.
    pub iteration: u32,
    pub action: AgentAction,
    pub rationale: String,
    /// Set on the synthetic FINISH appended when the iteration budget runs out.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
}

/// Search recorded in a trace, flattened for the API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub iteration: u32,
    pub query: String,
    pub success: bool,
    pub has_content: bool,
}

/// Ordered, append-only record of one ReAct loop.
///
/// Evidence gathered by searches travels with the trace so the next
/// decision sees it, but is not serialized into reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    steps: Vec<AgentStep>,
    #[serde(skip)]
    evidence: Vec<RetrievedPassage>,
}

impl AgentTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Iterations must increase strictly.
    pub fn push(&mut self, step: AgentStep) {
        debug_assert!(
            self.steps
                .last()
                .is_none_or(|last| last.iteration < step.iteration),
            "trace iterations must increase strictly"
        );
        self.steps.push(step);
    }

    pub fn add_evidence(&mut self, passages: impl IntoIterator<Item = RetrievedPassage>) {
        self.evidence.extend(passages);
    }

    #[must_use]
    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    #[must_use]
    pub fn evidence(&self) -> &[RetrievedPassage] {
        &self.evidence
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn next_iteration(&self) -> u32 {
        self.steps.last().map_or(1, |s| s.iteration + 1)
    }

    #[must_use]
    pub fn has_searched(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.action, AgentAction::Search { .. }))
    }

    /// The most recent successful GENERATE draft and whether it was
    /// truncated. Failed attempts are skipped.
    #[must_use]
    pub fn last_draft(&self) -> Option<(&str, bool)> {
        self.steps.iter().rev().find_map(|s| match &s.action {
            AgentAction::Generate {
                draft,
                truncated,
                error: None,
            } => Some((draft.as_str(), *truncated)),
            _ => None,
        })
    }

    /// Whether the loop ended on a synthetic FINISH.
    #[must_use]
    pub fn forced_finish(&self) -> bool {
        self.steps.last().is_some_and(|s| s.forced)
    }

    #[must_use]
    pub fn search_history(&self) -> Vec<SearchRecord> {
        self.steps
            .iter()
            .filter_map(|s| match &s.action {
                AgentAction::Search {
                    query,
                    success,
                    has_content,
                } => Some(SearchRecord {
                    iteration: s.iteration,
                    query: query.clone(),
                    success: *success,
                    has_content: *has_content,
                }),
                _ => None,
            })
            .collect()
    }
}

/// A located replacement: `full_text[start..end]` becomes `replacement`.
///
/// Offsets are byte offsets into the original document and always fall on
/// char boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCandidate {
    /// Index of the modification point that produced this patch.
    pub point_index: usize,
    pub start: usize,
    pub end: usize,
    pub replacement: String,
    /// Similarity of the located span to the excerpt, in `[0, 1]`.
    pub confidence: f64,
}

impl PatchCandidate {
    /// Intersecting or touching spans cannot both be applied.
    #[must_use]
    pub fn conflicts_with(&self, other: &PatchCandidate) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// A patch that lost an overlap conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupersededPatch {
    pub patch: PatchCandidate,
    /// `point_index` of the patch that won.
    pub superseded_by: usize,
}

/// A draft the locator could not place; surfaced for manual review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedPatch {
    pub point_index: usize,
    pub original_excerpt: String,
    pub replacement: String,
    pub best_score: f64,
}

/// An error recorded against a document or one of its points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_index: Option<usize>,
    pub kind: String,
    pub message: String,
}

impl RecordedError {
    #[must_use]
    pub fn new(point_index: Option<usize>, error: &EngineError) -> Self {
        Self {
            point_index,
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentStatus {
    /// At least one patch was applied.
    Applied,
    /// Modification points existed but none could be applied.
    Unresolved,
    NoChangeNeeded,
    /// Fetch or analysis failed, or every point failed hard.
    Failed,
    /// Cancelled by the request deadline.
    Degraded,
}

/// The trace of one modification point, kept with the point it served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointTrace {
    pub point_index: usize,
    pub point: ModificationPoint,
    pub trace: AgentTrace,
}

/// Final outcome for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatchResult {
    pub document_id: String,
    pub original_content: String,
    pub modified_content: String,
    pub status: DocumentStatus,
    /// Sorted by span start.
    pub applied_patches: Vec<PatchCandidate>,
    pub superseded: Vec<SupersededPatch>,
    pub unresolved: Vec<UnresolvedPatch>,
    pub truncated: bool,
    pub traces: Vec<PointTrace>,
    pub errors: Vec<RecordedError>,
}

impl DocumentPatchResult {
    /// Result for a document whose content was never processed.
    #[must_use]
    pub fn unprocessed(
        document_id: impl Into<String>,
        original_content: impl Into<String>,
        status: DocumentStatus,
        error: Option<&EngineError>,
    ) -> Self {
        let original_content = original_content.into();
        Self {
            document_id: document_id.into(),
            modified_content: original_content.clone(),
            original_content,
            status,
            applied_patches: Vec::new(),
            superseded: Vec::new(),
            unresolved: Vec::new(),
            truncated: false,
            traces: Vec::new(),
            errors: error
                .map(|e| vec![RecordedError::new(None, e)])
                .unwrap_or_default(),
        }
    }

    /// Number of modification points analyzed for this document.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.traces.len()
    }
}

/// Corpus-wide view of the change, produced once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencySummary {
    pub modification_type: String,
    pub analysis: String,
    pub global_consistency_required: bool,
    pub documents_needing_change: Vec<String>,
}

impl ConsistencySummary {
    /// Assume every document needs the change.
    #[must_use]
    pub fn assume_all(document_ids: impl IntoIterator<Item = String>, reason: &str) -> Self {
        Self {
            modification_type: "unknown".to_string(),
            analysis: format!("Consistency analysis unavailable: {reason}"),
            global_consistency_required: true,
            documents_needing_change: document_ids.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            modification_type: "none".to_string(),
            analysis: "No related documents found".to_string(),
            global_consistency_required: false,
            documents_needing_change: Vec::new(),
        }
    }
}

/// Everything the engine learned while serving one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Related documents found by retrieval; a target document given in the
    /// request is not counted.
    pub total_documents: usize,
    pub total_passages: usize,
    pub summary: ConsistencySummary,
    /// In input document order.
    pub results: Vec<DocumentPatchResult>,
    pub deadline_exceeded: bool,
    /// Retrieval failed and only the target document was processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_error: Option<RecordedError>,
    pub generated_at: DateTime<Utc>,
}

impl ConsistencyReport {
    #[must_use]
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}
