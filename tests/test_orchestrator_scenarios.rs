//! End-to-end scenarios for the orchestrator over scripted collaborators
//!
//! Retrieval, fetch and reasoning are replaced by the engine's `test-utils`
//! doubles, so every test runs offline and deterministically.
//!
//! Tests:
//! - Empty retrieval yields an empty, successful report
//! - Two-document rename: one applied, one no-change-needed
//! - Overlapping patches resolve to one winner, the other superseded
//! - Unlocatable drafts surface as unresolved
//! - Fetch and analysis failures stay isolated to their document
//! - Transient fetch failures are retried
//! - Target document handling with and without retrieval
//! - Failed retrieval falls back to the target document
//! - Draft truncation at the character budget
//! - Request deadline before and after retrieval
//! - Deadline interrupts patch location in a large document
//! - Concurrency bound on fetches and reasoning calls
//! - Fetch timeout with retry

use concord::engine::prompts::{
    DECISION_HEADER, DOCUMENT_ANALYSIS_HEADER, GENERATION_HEADER, SUMMARY_HEADER,
};
use concord::error::{EngineError, GatewayError};
use concord::{
    ConcordError, ConsistencyResponse, DocumentStatus, EngineSettings, ExitCode,
    ModificationRequest, Orchestrator,
};
use concord_engine::RetrievedPassage;
use concord_engine::testing::{MapFetcher, ScriptedReasoning, StaticRetrieval};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DOC_A: &str = "http://docs.example/agri/a.md";
const DOC_B: &str = "http://docs.example/agri/b.md";
const DOC_C: &str = "http://docs.example/agri/c.md";

const TEXT_A: &str = "# Methods\n\nWe rely on early-season classification of fields.\n\nResults follow.\n";
const TEXT_B: &str = "# Budget\n\nThe budget covers sensors and travel.\n";

const GENERATE: &str = r#"{"type": "generate", "reason": "the excerpt is clear enough"}"#;
const FINISH: &str = r#"{"type": "finish", "reason": "draft complete"}"#;

fn request() -> ModificationRequest {
    ModificationRequest::new(
        "early-season classification",
        "rename to early-crop classification and add a food-security note",
        "agri",
    )
    .with_top_k(2)
}

fn settings() -> EngineSettings {
    EngineSettings {
        deadline: Duration::from_secs(30),
        fetch_timeout: Duration::from_secs(5),
        ..EngineSettings::default()
    }
}

fn orchestrator(
    retrieval: Arc<StaticRetrieval>,
    fetcher: Arc<MapFetcher>,
    reasoning: Arc<ScriptedReasoning>,
    settings: EngineSettings,
) -> Orchestrator {
    Orchestrator::new(retrieval, fetcher, reasoning, settings)
}

fn analysis_of(name: &str) -> [&str; 2] {
    [DOCUMENT_ANALYSIS_HEADER, name]
}

fn modifications(excerpts: &[&str]) -> String {
    let entries: Vec<String> = excerpts
        .iter()
        .map(|e| {
            serde_json::json!({
                "location": "body",
                "original_text": e,
                "reason": "uses the old term",
            })
            .to_string()
        })
        .collect();
    format!("```json\n{{\"modifications\": [{}]}}\n```", entries.join(","))
}

/// Script one point: generate on the first decision, finish on the second,
/// and answer the generation call with `draft`.
fn script_point(reasoning: ScriptedReasoning, excerpt: &str, draft: &str) -> ScriptedReasoning {
    let decision = format!("Excerpt:\n{excerpt}\n");
    let generation = format!("Original excerpt:\n{excerpt}\n");
    reasoning
        .reply_when(&[DECISION_HEADER, &decision], GENERATE)
        .reply_when(&[DECISION_HEADER, &decision], FINISH)
        .reply_when(&[GENERATION_HEADER, &generation], draft)
}

fn passages() -> Vec<RetrievedPassage> {
    vec![
        RetrievedPassage::new(DOC_A, "We rely on early-season classification", 0.92),
        RetrievedPassage::new(DOC_B, "budget covers sensors", 0.41),
    ]
}

#[tokio::test]
async fn test_empty_retrieval_yields_empty_report() {
    let retrieval = Arc::new(StaticRetrieval::empty());
    let reasoning = Arc::new(ScriptedReasoning::new());
    let orch = orchestrator(
        retrieval.clone(),
        Arc::new(MapFetcher::new()),
        reasoning.clone(),
        settings(),
    );

    let report = orch.run(&request()).await.unwrap();
    assert_eq!(report.total_documents, 0);
    assert!(report.results.is_empty());
    assert!(!report.deadline_exceeded);
    assert_eq!(reasoning.call_count(), 0);
    assert_eq!(retrieval.queries(), vec!["early-season classification"]);

    let response = ConsistencyResponse::from_report(&request(), &report);
    assert!(response.success);
    assert_eq!(response.total_files, 0);
    assert!(response.modifications.is_empty());
}

#[tokio::test]
async fn test_two_document_rename() {
    let draft = "early-crop classification (which also underpins food-security monitoring)";
    let reasoning = ScriptedReasoning::new()
        .reply(
            SUMMARY_HEADER,
            r#"{"needs_modification": ["http://docs.example/agri/a.md"],
                "modification_type": "terminology",
                "consistency_analysis": "a.md names the method",
                "global_consistency_required": true}"#,
        )
        .reply_when(
            &analysis_of("Document: a.md"),
            &modifications(&["early-season classification"]),
        )
        .reply_when(&analysis_of("Document: b.md"), r#"{"modifications": []}"#);
    let reasoning = Arc::new(script_point(reasoning, "early-season classification", draft));

    let fetcher = Arc::new(
        MapFetcher::new()
            .with_document(DOC_A, TEXT_A)
            .with_document(DOC_B, TEXT_B),
    );
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages()).with_total_passages(5)),
        fetcher,
        reasoning.clone(),
        settings(),
    );

    let report = orch.run(&request()).await.unwrap();
    assert_eq!(report.total_documents, 2);
    assert_eq!(report.total_passages, 5);

    let generation: Vec<String> = reasoning
        .prompts()
        .into_iter()
        .filter(|p| p.contains(GENERATION_HEADER))
        .collect();
    assert_eq!(generation.len(), 1);
    assert!(generation[0].contains("early-season classification"));
    assert!(generation[0].contains("food-security note"));
    assert_eq!(report.summary.modification_type, "terminology");

    let a = &report.results[0];
    assert_eq!(a.document_id, DOC_A);
    assert_eq!(a.status, DocumentStatus::Applied);
    assert_eq!(a.applied_patches.len(), 1);
    assert_eq!(a.applied_patches[0].confidence, 1.0);
    assert!(a.modified_content.contains(draft));
    assert!(!a.modified_content.contains("early-season"));
    assert!(a.modified_content.starts_with("# Methods\n\nWe rely on "));
    assert!(a.modified_content.ends_with(" of fields.\n\nResults follow.\n"));
    assert_eq!(a.traces.len(), 1);
    assert_eq!(a.traces[0].trace.len(), 2);

    let b = &report.results[1];
    assert_eq!(b.document_id, DOC_B);
    assert_eq!(b.status, DocumentStatus::NoChangeNeeded);
    assert!(b.applied_patches.is_empty());
    assert_eq!(b.modified_content, TEXT_B);

    let response = ConsistencyResponse::from_report(&request(), &report);
    assert!(response.success);
    assert_eq!(response.total_files, 2);
    assert!(response.modifications[0].diff_summary.starts_with("applied 1 of 1"));
    assert_eq!(response.modifications[1].diff_summary, "no change needed");
}

#[tokio::test]
async fn test_overlapping_patches_keep_one_winner() {
    let text = "The early-season classification method is robust.";
    let reasoning = ScriptedReasoning::new().reply_when(
        &analysis_of("Document: a.md"),
        &modifications(&["early-season classification", "classification method"]),
    );
    let reasoning = script_point(reasoning, "early-season classification", "early-crop classification");
    let reasoning = Arc::new(script_point(reasoning, "classification method", "classification approach"));

    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(vec![RetrievedPassage::new(DOC_A, text, 0.9)])),
        Arc::new(MapFetcher::new().with_document(DOC_A, text)),
        reasoning,
        settings(),
    );

    let report = orch.run(&request()).await.unwrap();
    let a = &report.results[0];
    assert_eq!(a.status, DocumentStatus::Applied);
    assert_eq!(a.applied_patches.len(), 1);
    assert_eq!(a.applied_patches[0].point_index, 0);
    assert_eq!(a.superseded.len(), 1);
    assert_eq!(a.superseded[0].patch.point_index, 1);
    assert_eq!(a.superseded[0].superseded_by, 0);
    assert_eq!(
        a.modified_content,
        "The early-crop classification method is robust."
    );
}

#[tokio::test]
async fn test_unlocatable_draft_is_unresolved() {
    let excerpt = "Harvest dates shift northward every decade in the coastal provinces.";
    let reasoning = ScriptedReasoning::new()
        .reply_when(&analysis_of("Document: a.md"), &modifications(&[excerpt]));
    let reasoning = Arc::new(script_point(reasoning, excerpt, "replacement"));

    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(vec![RetrievedPassage::new(DOC_A, "x", 0.9)])),
        Arc::new(MapFetcher::new().with_document(DOC_A, TEXT_A)),
        reasoning,
        settings(),
    );

    let report = orch.run(&request()).await.unwrap();
    let a = &report.results[0];
    assert_eq!(a.status, DocumentStatus::Unresolved);
    assert_eq!(a.modified_content, TEXT_A);
    assert_eq!(a.unresolved.len(), 1);
    assert!(a.unresolved[0].best_score < 0.6);
    assert!(a.errors.iter().any(|e| e.kind == "patch_unresolved"));
}

#[tokio::test]
async fn test_failures_stay_isolated_per_document() {
    let reasoning = ScriptedReasoning::new()
        .reply_when(
            &analysis_of("Document: a.md"),
            &modifications(&["early-season classification"]),
        )
        .fail_when(
            &analysis_of("Document: b.md"),
            EngineError::ModelError("provider rejected the prompt".into()),
        );
    let reasoning = Arc::new(script_point(
        reasoning,
        "early-season classification",
        "early-crop classification",
    ));

    let mut passages = passages();
    passages.push(RetrievedPassage::new(DOC_C, "missing document", 0.3));
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_document(DOC_A, TEXT_A)
            .with_document(DOC_B, TEXT_B),
    );
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages)),
        fetcher,
        reasoning,
        settings(),
    );

    let report = orch.run(&request().with_top_k(3)).await.unwrap();
    let statuses: Vec<_> = report.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            DocumentStatus::Applied,
            DocumentStatus::Failed,
            DocumentStatus::Failed
        ]
    );
    assert_eq!(report.results[1].errors[0].kind, "model_error");
    assert_eq!(report.results[2].document_id, DOC_C);
    assert_eq!(report.results[2].errors[0].kind, "document_not_found");
}

#[tokio::test]
async fn test_transient_fetch_failure_is_retried() {
    let reasoning = Arc::new(
        ScriptedReasoning::new().reply_when(&analysis_of("Document: a.md"), r#"{"modifications": []}"#),
    );
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_document(DOC_A, TEXT_A)
            .with_failure(
                DOC_A,
                GatewayError::FetchFailed {
                    document_id: DOC_A.into(),
                    reason: "connection reset".into(),
                },
            ),
    );
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(vec![RetrievedPassage::new(DOC_A, "x", 0.9)])),
        fetcher.clone(),
        reasoning,
        settings(),
    );

    let report = orch.run(&request()).await.unwrap();
    assert_eq!(report.results[0].status, DocumentStatus::NoChangeNeeded);
    assert_eq!(fetcher.fetch_count(DOC_A), 2);
}

#[tokio::test]
async fn test_target_document_without_retrieval() {
    let reasoning = ScriptedReasoning::new().reply_when(
        &analysis_of("Document: a.md"),
        &modifications(&["early-season classification"]),
    );
    let reasoning = Arc::new(script_point(
        reasoning,
        "early-season classification",
        "early-crop classification",
    ));
    let retrieval = Arc::new(StaticRetrieval::new(passages()));
    let orch = orchestrator(
        retrieval.clone(),
        Arc::new(MapFetcher::new().with_document(DOC_A, TEXT_A)),
        reasoning,
        settings(),
    );

    let request = request()
        .with_target_document(DOC_A)
        .with_include_related(false);
    let report = orch.run(&request).await.unwrap();
    assert!(retrieval.queries().is_empty());
    assert_eq!(report.total_documents, 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, DocumentStatus::Applied);
    assert!(report.retrieval_error.is_none());
}

#[tokio::test]
async fn test_unavailable_retrieval_still_checks_target_document() {
    let reasoning = ScriptedReasoning::new().reply_when(
        &analysis_of("Document: a.md"),
        &modifications(&["early-season classification"]),
    );
    let reasoning = Arc::new(script_point(
        reasoning,
        "early-season classification",
        "early-crop classification",
    ));
    let orch = orchestrator(
        Arc::new(StaticRetrieval::unavailable()),
        Arc::new(MapFetcher::new().with_document(DOC_A, TEXT_A)),
        reasoning,
        settings(),
    );

    let report = orch.run(&request().with_target_document(DOC_A)).await.unwrap();
    assert_eq!(report.total_documents, 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].document_id, DOC_A);
    assert_eq!(report.results[0].status, DocumentStatus::Applied);
    let error = report.retrieval_error.as_ref().unwrap();
    assert_eq!(error.kind, "retrieval_unavailable");
    assert!(!report.deadline_exceeded);

    let response = ConsistencyResponse::from_report(&request(), &report);
    assert!(response.success);
    assert!(response.message.contains("target document only"));
}

#[tokio::test]
async fn test_deadline_during_retrieval_keeps_target_document() {
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages()).with_delay(Duration::from_secs(10))),
        Arc::new(MapFetcher::new().with_document(DOC_A, TEXT_A)),
        Arc::new(ScriptedReasoning::new()),
        EngineSettings {
            deadline: Duration::from_millis(100),
            ..settings()
        },
    );

    let report = orch.run(&request().with_target_document(DOC_A)).await.unwrap();
    assert!(report.deadline_exceeded);
    assert_eq!(report.retrieval_error.as_ref().unwrap().kind, "deadline_exceeded");
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].document_id, DOC_A);
    assert_eq!(report.results[0].status, DocumentStatus::Degraded);
}

#[tokio::test]
async fn test_target_document_is_first_and_fetched_once() {
    let reasoning = Arc::new(
        ScriptedReasoning::new()
            .reply_when(&analysis_of("Document: a.md"), r#"{"modifications": []}"#)
            .reply_when(&analysis_of("Document: b.md"), r#"{"modifications": []}"#),
    );
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_document(DOC_A, TEXT_A)
            .with_document(DOC_B, TEXT_B),
    );
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages())),
        fetcher.clone(),
        reasoning,
        settings(),
    );

    let report = orch.run(&request().with_target_document(DOC_B)).await.unwrap();
    let ids: Vec<_> = report.results.iter().map(|r| r.document_id.as_str()).collect();
    assert_eq!(ids, vec![DOC_B, DOC_A]);
    assert_eq!(fetcher.fetch_count(DOC_B), 1);
}

#[tokio::test]
async fn test_long_draft_is_truncated_to_budget() {
    let long_draft = "early-crop classification ".repeat(20);
    let reasoning = ScriptedReasoning::new().reply_when(
        &analysis_of("Document: a.md"),
        &modifications(&["early-season classification"]),
    );
    let reasoning = Arc::new(script_point(
        reasoning,
        "early-season classification",
        long_draft.trim(),
    ));
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(vec![RetrievedPassage::new(DOC_A, "x", 0.9)])),
        Arc::new(MapFetcher::new().with_document(DOC_A, TEXT_A)),
        reasoning,
        EngineSettings {
            draft_char_budget: 40,
            ..settings()
        },
    );

    let report = orch.run(&request()).await.unwrap();
    let a = &report.results[0];
    assert_eq!(a.status, DocumentStatus::Applied);
    assert!(a.truncated);
    assert_eq!(a.applied_patches[0].replacement.chars().count(), 40);
    assert!(a.errors.iter().any(|e| e.kind == "output_truncated"));
}

#[tokio::test]
async fn test_retrieval_unavailable_aborts_request() {
    let orch = orchestrator(
        Arc::new(StaticRetrieval::unavailable()),
        Arc::new(MapFetcher::new()),
        Arc::new(ScriptedReasoning::new()),
        settings(),
    );

    let err = orch.run(&request()).await.unwrap_err();
    assert!(matches!(
        err,
        ConcordError::Engine(EngineError::RetrievalUnavailable(_))
    ));
    assert_eq!(err.to_exit_code(), ExitCode::RETRIEVAL_FAILURE);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_retrieval() {
    let retrieval = Arc::new(StaticRetrieval::new(passages()));
    let orch = orchestrator(
        retrieval.clone(),
        Arc::new(MapFetcher::new()),
        Arc::new(ScriptedReasoning::new()),
        settings(),
    );

    let err = orch
        .run(&ModificationRequest::new("", "rename", "agri"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConcordError::InvalidRequest { .. }));
    assert!(retrieval.queries().is_empty());
}

#[tokio::test]
async fn test_deadline_during_retrieval_fails_request() {
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages()).with_delay(Duration::from_secs(10))),
        Arc::new(MapFetcher::new()),
        Arc::new(ScriptedReasoning::new()),
        EngineSettings {
            deadline: Duration::from_millis(100),
            ..settings()
        },
    );

    let err = orch.run(&request()).await.unwrap_err();
    assert!(matches!(
        err,
        ConcordError::Engine(EngineError::DeadlineExceeded { .. })
    ));
    assert_eq!(err.to_exit_code(), ExitCode::DEADLINE);
}

#[tokio::test]
async fn test_deadline_after_retrieval_degrades_documents() {
    let reasoning = Arc::new(ScriptedReasoning::new().with_delay(Duration::from_secs(10)));
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages())),
        Arc::new(
            MapFetcher::new()
                .with_document(DOC_A, TEXT_A)
                .with_document(DOC_B, TEXT_B),
        ),
        reasoning,
        EngineSettings {
            deadline: Duration::from_millis(200),
            ..settings()
        },
    );

    let report = orch.run(&request()).await.unwrap();
    assert!(report.deadline_exceeded);
    assert_eq!(report.results.len(), 2);
    for result in &report.results {
        assert_eq!(result.status, DocumentStatus::Degraded);
        assert_eq!(result.errors[0].kind, "deadline_exceeded");
        assert_eq!(result.modified_content, result.original_content);
    }
    assert!(report.summary.global_consistency_required);
}

#[tokio::test]
async fn test_deadline_interrupts_patch_location() {
    let text = "the quick brown fox jumps over the lazy dog. ".repeat(5400);
    let excerpt = "zyxw vuts rqpo nmlk ".repeat(20);
    let excerpt = excerpt.trim();
    let reasoning = ScriptedReasoning::new()
        .reply_when(&analysis_of("Document: a.md"), &modifications(&[excerpt]));
    let reasoning = Arc::new(script_point(reasoning, excerpt, "a short replacement"));

    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(vec![RetrievedPassage::new(DOC_A, "fox", 0.9)])),
        Arc::new(MapFetcher::new().with_document(DOC_A, text.clone())),
        reasoning,
        EngineSettings {
            deadline: Duration::from_millis(300),
            ..settings()
        },
    );

    let started = Instant::now();
    let report = orch.run(&request()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(report.deadline_exceeded);

    let a = &report.results[0];
    assert_eq!(a.status, DocumentStatus::Degraded);
    assert_eq!(a.modified_content, text);
    assert!(a.errors.iter().any(|e| e.kind == "deadline_exceeded"));
}

#[tokio::test]
async fn test_concurrency_bound_limits_fetches_and_reasoning() {
    let mut passages = passages();
    passages.push(RetrievedPassage::new(DOC_C, "sensor calibration", 0.3));
    let delay = Duration::from_millis(50);
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_document(DOC_A, TEXT_A)
            .with_document(DOC_B, TEXT_B)
            .with_document(DOC_C, "# Sensors\n\nCalibration runs monthly.\n")
            .with_delay(DOC_A, delay)
            .with_delay(DOC_B, delay)
            .with_delay(DOC_C, delay),
    );
    let reasoning = Arc::new(
        ScriptedReasoning::new()
            .reply(DOCUMENT_ANALYSIS_HEADER, r#"{"modifications": []}"#)
            .with_delay(Duration::from_millis(20)),
    );
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages)),
        fetcher.clone(),
        reasoning.clone(),
        EngineSettings {
            concurrency: 1,
            ..settings()
        },
    );

    let report = orch.run(&request().with_top_k(3)).await.unwrap();
    assert_eq!(report.results.len(), 3);
    assert!(
        report
            .results
            .iter()
            .all(|r| r.status == DocumentStatus::NoChangeNeeded)
    );
    assert_eq!(fetcher.peak_in_flight(), 1);
    assert_eq!(reasoning.peak_in_flight(), 1);
}

#[tokio::test]
async fn test_fetches_run_in_parallel_up_to_the_bound() {
    let mut passages = passages();
    passages.push(RetrievedPassage::new(DOC_C, "sensor calibration", 0.3));
    let delay = Duration::from_millis(100);
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_document(DOC_A, TEXT_A)
            .with_document(DOC_B, TEXT_B)
            .with_document(DOC_C, TEXT_B)
            .with_delay(DOC_A, delay)
            .with_delay(DOC_B, delay)
            .with_delay(DOC_C, delay),
    );
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(passages)),
        fetcher.clone(),
        Arc::new(ScriptedReasoning::new().reply(DOCUMENT_ANALYSIS_HEADER, r#"{"modifications": []}"#)),
        EngineSettings {
            concurrency: 3,
            ..settings()
        },
    );

    orch.run(&request().with_top_k(3)).await.unwrap();
    assert_eq!(fetcher.peak_in_flight(), 3);
}

#[tokio::test]
async fn test_slow_fetch_times_out_after_retry() {
    let fetcher = Arc::new(
        MapFetcher::new()
            .with_document(DOC_A, TEXT_A)
            .with_delay(DOC_A, Duration::from_millis(500)),
    );
    let reasoning = Arc::new(ScriptedReasoning::new());
    let orch = orchestrator(
        Arc::new(StaticRetrieval::new(vec![RetrievedPassage::new(DOC_A, "x", 0.9)])),
        fetcher.clone(),
        reasoning.clone(),
        EngineSettings {
            fetch_timeout: Duration::from_millis(100),
            fetch_retries: 1,
            ..settings()
        },
    );

    let report = orch.run(&request()).await.unwrap();
    let a = &report.results[0];
    assert_eq!(a.status, DocumentStatus::Failed);
    assert_eq!(a.errors[0].kind, "fetch_timeout");
    assert_eq!(fetcher.fetch_count(DOC_A), 2);
    assert!(
        reasoning
            .prompts()
            .iter()
            .all(|p| !p.contains(DOCUMENT_ANALYSIS_HEADER))
    );
}
