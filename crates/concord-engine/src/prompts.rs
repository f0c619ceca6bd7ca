//! Prompt builders for every reasoning call the engine makes.
//!
//! Each prompt opens with a fixed header line so transcripts and scripted
//! test backends can tell the calls apart.

use std::fmt::Write as _;

use crate::model::{AgentAction, AgentTrace, DocumentCandidate, ModificationPoint, ModificationRequest};

pub const SUMMARY_HEADER: &str = "# Corpus consistency assessment";
pub const DOCUMENT_ANALYSIS_HEADER: &str = "# Locate required modifications";
pub const DECISION_HEADER: &str = "# Decide the next action";
pub const GENERATION_HEADER: &str = "# Rewrite the excerpt";

/// Characters of each document shown in the corpus summary prompt.
pub const SUMMARY_PREVIEW_CHARS: usize = 300;

const EVIDENCE_PASSAGES: usize = 8;
const EVIDENCE_PASSAGE_CHARS: usize = 400;

fn head(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Last path segment of a document id, for readable prompts.
#[must_use]
pub fn display_name(document_id: &str) -> &str {
    document_id
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or(document_id)
}

#[must_use]
pub fn summary_prompt(request: &ModificationRequest, documents: &[&DocumentCandidate]) -> String {
    let mut files = String::new();
    for doc in documents {
        let _ = writeln!(
            files,
            "Document: {}\nPreview: {}\n",
            doc.document_id,
            head(&doc.full_text, SUMMARY_PREVIEW_CHARS)
        );
    }

    format!(
        r#"{SUMMARY_HEADER}

A change is being propagated across a document corpus.

Concept being changed: {point}
Requested change: {instruction}

Related documents:
{files}
Assess:
1. Which of these documents need the change?
2. What kind of change is it (terminology, data update, stance, method)?
3. Why do those documents need it, and must the corpus stay globally consistent?

Answer with JSON only:
```json
{{
  "needs_modification": ["<document id>"],
  "modification_type": "<kind of change>",
  "consistency_analysis": "<why these documents need the change>",
  "global_consistency_required": true
}}
```"#,
        point = request.point,
        instruction = request.instruction,
    )
}

#[must_use]
pub fn document_analysis_prompt(
    request: &ModificationRequest,
    document: &DocumentCandidate,
) -> String {
    format!(
        r#"{DOCUMENT_ANALYSIS_HEADER}

Concept being changed: {point}
Requested change: {instruction}

Document: {name}
Content:
{content}

Find every place in this document that must change to satisfy the request.
For each place, copy the affected text exactly as it appears in the document
so it can be located again. Prefer excerpts long enough to be unique. If the
document does not mention the concept, return an empty list.

Answer with JSON only:
```json
{{
  "modifications": [
    {{
      "location": "<section or position>",
      "original_text": "<exact text copied from the document>",
      "reason": "<why it must change>"
    }}
  ]
}}
```"#,
        point = request.point,
        instruction = request.instruction,
        name = display_name(&document.document_id),
        content = document.full_text,
    )
}

fn describe_trace(trace: &AgentTrace) -> String {
    if trace.is_empty() {
        return "(none)".to_string();
    }
    let mut out = String::new();
    for step in trace.steps() {
        let line = match &step.action {
            AgentAction::Search {
                query,
                success,
                has_content,
            } => {
                let outcome = match (success, has_content) {
                    (false, _) => "search failed",
                    (true, false) => "no results",
                    (true, true) => "results added to evidence",
                };
                format!("search \"{query}\" -> {outcome}")
            }
            AgentAction::Generate {
                error: Some(error), ..
            } => format!("generate -> failed: {error}"),
            AgentAction::Generate {
                draft, truncated, ..
            } => format!(
                "generate -> draft of {} chars{}",
                draft.chars().count(),
                if *truncated { " (truncated)" } else { "" }
            ),
            AgentAction::Finish => "finish".to_string(),
        };
        let _ = writeln!(out, "{}. {line}", step.iteration);
    }
    out
}

fn describe_evidence(trace: &AgentTrace) -> String {
    if trace.evidence().is_empty() {
        return "(no evidence gathered)".to_string();
    }
    let mut out = String::new();
    for passage in trace.evidence().iter().take(EVIDENCE_PASSAGES) {
        let _ = writeln!(
            out,
            "- [{:.2}] {}: {}",
            passage.relevance_score,
            display_name(&passage.document_id),
            head(&passage.raw_text_fragment, EVIDENCE_PASSAGE_CHARS)
        );
    }
    out
}

#[must_use]
pub fn decision_prompt(
    request: &ModificationRequest,
    point: &ModificationPoint,
    trace: &AgentTrace,
    iteration: u32,
    budget: u32,
) -> String {
    let draft = trace
        .last_draft()
        .map_or_else(|| "(none yet)".to_string(), |(d, _)| d.to_string());

    format!(
        r#"{DECISION_HEADER}

You are rewriting one excerpt of a document so it satisfies a requested change.
This is step {iteration} of at most {budget}.

Requested change: {instruction}
Concept being changed: {point_name}
Location: {location}
Why it must change: {reason}

Excerpt:
{excerpt}

Steps so far:
{steps}
Evidence:
{evidence}
Current draft:
{draft}

Choose exactly one action:
- search: look up supporting material when the evidence is insufficient
- generate: write (or rewrite) the replacement for the excerpt
- finish: the current draft is complete

Answer with JSON only, one of:
{{"type": "search", "query": "<search terms>", "reason": "<why>"}}
{{"type": "generate", "instruction": "<guidance for the rewrite>", "reason": "<why>"}}
{{"type": "finish", "reason": "<why>"}}"#,
        instruction = request.instruction,
        point_name = request.point,
        location = point.location_hint,
        reason = point.reason,
        excerpt = point.original_excerpt,
        steps = describe_trace(trace),
        evidence = describe_evidence(trace),
    )
}

#[must_use]
pub fn generation_prompt(
    request: &ModificationRequest,
    point: &ModificationPoint,
    trace: &AgentTrace,
    guidance: Option<&str>,
) -> String {
    format!(
        r#"{GENERATION_HEADER}

Requested change: {instruction}
Concept being changed: {point_name}
Why this excerpt must change: {reason}
Guidance: {guidance}

Supporting material:
{evidence}
Original excerpt:
{excerpt}

Rewrite the excerpt so it satisfies the requested change. Keep its language,
tone and Markdown formatting, and keep everything that does not need to
change. Return only the replacement text, with no commentary."#,
        instruction = request.instruction,
        point_name = request.point,
        reason = point.reason,
        guidance = guidance.unwrap_or("keep the rewrite minimal and consistent with the corpus"),
        evidence = describe_evidence(trace),
        excerpt = point.original_excerpt,
    )
}

/// Output ceiling for a GENERATE call, scaled with the excerpt.
#[must_use]
pub fn generation_max_tokens(excerpt: &str) -> u32 {
    let chars = u32::try_from(excerpt.chars().count()).unwrap_or(u32::MAX);
    (chars / 2).saturating_add(1000).clamp(4000, 8000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RetrievedPassage;

    fn request() -> ModificationRequest {
        ModificationRequest::new("early-season classification", "rename it", "proj")
    }

    fn point() -> ModificationPoint {
        ModificationPoint {
            document_id: "http://docs/a.md".into(),
            location_hint: "intro".into(),
            original_excerpt: "early-season classification of crops".into(),
            reason: "uses the old term".into(),
        }
    }

    #[test]
    fn test_prompts_start_with_their_header() {
        let doc = DocumentCandidate {
            document_id: "http://docs/a.md".into(),
            full_text: "text".into(),
            passages: Vec::new(),
        };
        let trace = AgentTrace::new();
        assert!(summary_prompt(&request(), &[&doc]).starts_with(SUMMARY_HEADER));
        assert!(document_analysis_prompt(&request(), &doc).starts_with(DOCUMENT_ANALYSIS_HEADER));
        assert!(decision_prompt(&request(), &point(), &trace, 1, 4).starts_with(DECISION_HEADER));
        assert!(generation_prompt(&request(), &point(), &trace, None).starts_with(GENERATION_HEADER));
    }

    #[test]
    fn test_summary_preview_is_bounded() {
        let doc = DocumentCandidate {
            document_id: "http://docs/a.md".into(),
            full_text: "x".repeat(1000),
            passages: Vec::new(),
        };
        let prompt = summary_prompt(&request(), &[&doc]);
        assert!(prompt.contains(&format!("{}...", "x".repeat(SUMMARY_PREVIEW_CHARS))));
        assert!(!prompt.contains(&"x".repeat(SUMMARY_PREVIEW_CHARS + 1)));
    }

    #[test]
    fn test_decision_prompt_shows_evidence() {
        let mut trace = AgentTrace::new();
        trace.add_evidence([RetrievedPassage::new(
            "http://docs/b.md",
            "food security matters",
            0.8,
        )]);
        let prompt = decision_prompt(&request(), &point(), &trace, 2, 4);
        assert!(prompt.contains("b.md: food security matters"));
        assert!(prompt.contains("step 2 of at most 4"));
    }

    #[test]
    fn test_generation_max_tokens_bounds() {
        assert_eq!(generation_max_tokens("short"), 4000);
        assert_eq!(generation_max_tokens(&"a".repeat(8000)), 5000);
        assert_eq!(generation_max_tokens(&"a".repeat(100_000)), 8000);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("http://docs/dir/a.md"), "a.md");
        assert_eq!(display_name("plain"), "plain");
    }
}
