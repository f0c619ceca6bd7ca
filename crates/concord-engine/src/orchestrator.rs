//! Orchestrator: drives retrieval, fetch, analysis, the ReAct loops and
//! patching for one request.
//!
//! Fan-out is bounded by a single semaphore shared by fetches and document
//! processing. Loops of one document run concurrently with each other, but
//! their outcomes are merged into that document's patch set sequentially.
//! A request-wide deadline cancels a [`CancellationToken`] observed at every
//! external call and by the fuzzy locator, which runs on the blocking pool;
//! work still pending at that point is reported as degraded.

use concord_config::Config;
use concord_utils::error::{ConcordError, EngineError, GatewayError};
use concord_utils::logging::{
    StageTimer, document_span, log_stage_error, loop_span, request_span,
};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::analyzer::ConsistencyAnalyzer;
use crate::gateway::{
    DocumentFetcher, HttpFetcher, HttpRetrieval, LlmReasoning, ReasoningGateway, RetrievalGateway,
};
use crate::locator::{
    Location, PatchLocator, apply_patches, resolve_overlaps, truncate_to_budget,
};
use crate::model::{
    ConsistencyReport, ConsistencySummary, DocumentCandidate, DocumentPatchResult, DocumentStatus,
    ModificationPoint, ModificationRequest, PatchCandidate, PointTrace, RecordedError,
    RetrievedPassage, UnresolvedPatch,
};
use crate::react::{LoopOutcome, ReactLoop};

const FETCH_BACKOFF: Duration = Duration::from_millis(200);

/// Tuning knobs of the engine, resolved from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_iterations: u32,
    pub concurrency: usize,
    pub deadline: Duration,
    pub draft_char_budget: usize,
    pub match_threshold: f64,
    pub window_tolerance: f64,
    pub max_documents_analyzed: usize,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_iterations: concord_config::DEFAULT_MAX_ITERATIONS,
            concurrency: concord_config::DEFAULT_CONCURRENCY,
            deadline: Duration::from_secs(concord_config::DEFAULT_DEADLINE_SECS),
            draft_char_budget: concord_config::DEFAULT_DRAFT_CHAR_BUDGET,
            match_threshold: concord_config::DEFAULT_MATCH_THRESHOLD,
            window_tolerance: concord_config::DEFAULT_WINDOW_TOLERANCE,
            max_documents_analyzed: concord_config::DEFAULT_MAX_DOCUMENTS_ANALYZED,
            fetch_timeout: Duration::from_secs(30),
            fetch_retries: 2,
        }
    }
}

impl EngineSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_iterations: config.max_iterations(),
            concurrency: config.concurrency(),
            deadline: Duration::from_secs(config.deadline_secs()),
            draft_char_budget: config.draft_char_budget(),
            match_threshold: config.match_threshold(),
            window_tolerance: config.window_tolerance(),
            max_documents_analyzed: config.max_documents_analyzed(),
            fetch_timeout: Duration::from_secs(config.fetch.timeout_secs.unwrap_or(30)),
            fetch_retries: config.fetch.retries.unwrap_or(2),
        }
    }
}

/// How a document fetch ended.
enum Fetched {
    Text(String),
    Failed(EngineError),
    Cancelled,
}

/// Where one point's excerpt was found; `None` when the point has no draft.
type Located = Option<Result<Location, EngineError>>;

/// One input document: fetched and ready, or already settled.
enum Slot {
    Ready(DocumentCandidate),
    Settled(DocumentPatchResult),
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Group passages by document in order of first occurrence, leaving out
/// `exclude`.
fn group_by_document(
    passages: Vec<RetrievedPassage>,
    exclude: Option<&str>,
) -> Vec<(String, Vec<RetrievedPassage>)> {
    let mut groups: Vec<(String, Vec<RetrievedPassage>)> = Vec::new();
    for passage in passages {
        if exclude == Some(passage.document_id.as_str()) {
            continue;
        }
        match groups.iter_mut().find(|(id, _)| *id == passage.document_id) {
            Some((_, group)) => group.push(passage),
            None => groups.push((passage.document_id.clone(), vec![passage])),
        }
    }
    groups
}

pub struct Orchestrator {
    retrieval: Arc<dyn RetrievalGateway>,
    fetcher: Arc<dyn DocumentFetcher>,
    reasoning: Arc<dyn ReasoningGateway>,
    settings: EngineSettings,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        retrieval: Arc<dyn RetrievalGateway>,
        fetcher: Arc<dyn DocumentFetcher>,
        reasoning: Arc<dyn ReasoningGateway>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            retrieval,
            fetcher,
            reasoning,
            settings,
        }
    }

    /// Wire the HTTP gateways and the configured reasoning backend.
    ///
    /// # Errors
    ///
    /// `ConcordError::Llm` when no reasoning backend can be constructed,
    /// `ConcordError::Gateway` when an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ConcordError> {
        let (backend, fallback) = concord_llm::from_config_with_fallback(config)?;
        if let Some(info) = fallback {
            warn!(
                primary = %info.primary_provider,
                fallback = %info.fallback_provider,
                reason = %info.reason,
                "Using fallback reasoning provider"
            );
        }
        let reasoning = LlmReasoning::from_config(Arc::from(backend), config);

        Ok(Self::new(
            Arc::new(HttpRetrieval::from_config(config)?),
            Arc::new(HttpFetcher::from_config(config)?),
            Arc::new(reasoning),
            EngineSettings::from_config(config),
        ))
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Propagate `request` across the corpus.
    ///
    /// Per-document problems are recorded in the report; only an invalid
    /// request, an unavailable retrieval service or a deadline that expires
    /// before any document is known fail the whole call. With a target
    /// document, a failed retrieval is recorded on the report and the
    /// target is still processed.
    ///
    /// # Errors
    ///
    /// `ConcordError::InvalidRequest`, or `ConcordError::Engine` with
    /// `RetrievalUnavailable` / `DeadlineExceeded`.
    pub async fn run(&self, request: &ModificationRequest) -> Result<ConsistencyReport, ConcordError> {
        request.validate()?;

        let span = request_span(&request.corpus_id, &request.point);
        async {
            let cancel = CancellationToken::new();
            let work = self.process(request, &cancel);
            tokio::pin!(work);

            tokio::select! {
                report = &mut work => report,
                () = tokio::time::sleep(self.settings.deadline) => {
                    warn!(
                        deadline_secs = self.settings.deadline.as_secs(),
                        "Request deadline reached, cancelling pending work"
                    );
                    cancel.cancel();
                    work.await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        request: &ModificationRequest,
        cancel: &CancellationToken,
    ) -> Result<ConsistencyReport, ConcordError> {
        let mut timer = StageTimer::new();
        let deadline_error = EngineError::DeadlineExceeded {
            duration: self.settings.deadline,
        };

        let mut total_passages = 0;
        let mut total_documents = 0;
        let mut retrieval_error = None;
        let mut documents: Vec<(String, Vec<RetrievedPassage>)> = Vec::new();
        if let Some(target) = &request.target_document {
            documents.push((target.clone(), Vec::new()));
        }

        if request.include_related {
            timer.start("retrieval");
            let search = self
                .retrieval
                .search(&request.point, &request.corpus_id, request.top_k);
            let failure = match until_cancelled(cancel, search).await {
                Some(Ok(results)) => {
                    timer.end("retrieval");
                    total_passages = results.total_passages;
                    let related =
                        group_by_document(results.passages, request.target_document.as_deref());
                    total_documents = related.len();
                    documents.extend(related);
                    None
                }
                Some(Err(e)) => Some(EngineError::from(e)),
                None => Some(deadline_error.clone()),
            };

            if let Some(error) = failure {
                let elapsed = timer.total_elapsed().as_millis();
                log_stage_error("retrieval", None, &error.to_string(), elapsed);
                // Without a target there is nothing left to report on
                if request.target_document.is_none() {
                    return Err(error.into());
                }
                warn!(error = %error, "Retrieval failed, checking the target document only");
                retrieval_error = Some(RecordedError::new(None, &error));
            }
        }

        if documents.is_empty() {
            info!("No related documents found");
            return Ok(ConsistencyReport {
                total_documents: 0,
                total_passages,
                summary: ConsistencySummary::empty(),
                results: Vec::new(),
                deadline_exceeded: cancel.is_cancelled(),
                retrieval_error,
                generated_at: chrono::Utc::now(),
            });
        }

        let semaphore = &Semaphore::new(self.settings.concurrency);

        timer.start("fetch");
        let fetched = join_all(
            documents
                .iter()
                .map(|(id, _)| self.fetch_with_retry(id, semaphore, cancel)),
        )
        .await;
        timer.end("fetch");

        let slots: Vec<Slot> = documents
            .into_iter()
            .zip(fetched)
            .map(|((document_id, passages), fetched)| match fetched {
                Fetched::Text(full_text) => Slot::Ready(DocumentCandidate {
                    document_id,
                    full_text,
                    passages,
                }),
                Fetched::Failed(e) => Slot::Settled(DocumentPatchResult::unprocessed(
                    document_id,
                    "",
                    DocumentStatus::Failed,
                    Some(&e),
                )),
                Fetched::Cancelled => Slot::Settled(DocumentPatchResult::unprocessed(
                    document_id,
                    "",
                    DocumentStatus::Degraded,
                    Some(&deadline_error),
                )),
            })
            .collect();

        let candidates: Vec<&DocumentCandidate> = slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Ready(c) => Some(c),
                Slot::Settled(_) => None,
            })
            .collect();

        timer.start("summary");
        let analyzer =
            ConsistencyAnalyzer::new(self.reasoning.as_ref(), self.settings.max_documents_analyzed);
        let summary = until_cancelled(cancel, analyzer.summarize(request, &candidates))
            .await
            .unwrap_or_else(|| {
                ConsistencySummary::assume_all(
                    candidates.iter().map(|c| c.document_id.clone()),
                    "deadline exceeded",
                )
            });
        timer.end("summary");

        timer.start("documents");
        let results = join_all(slots.into_iter().map(|slot| async move {
            match slot {
                Slot::Settled(result) => result,
                Slot::Ready(candidate) => {
                    let span = document_span(&candidate.document_id);
                    self.process_document(request, &candidate, semaphore, cancel)
                        .instrument(span)
                        .await
                }
            }
        }))
        .await;
        timer.end("documents");

        for (stage, duration) in timer.summary() {
            debug!(stage = %stage, duration_ms = duration.as_millis() as u64, "Stage timing");
        }

        let report = ConsistencyReport {
            total_documents,
            total_passages,
            summary,
            results,
            deadline_exceeded: cancel.is_cancelled(),
            retrieval_error,
            generated_at: chrono::Utc::now(),
        };
        info!(
            documents = report.results.len(),
            related = report.total_documents,
            applied = report.count(DocumentStatus::Applied),
            unresolved = report.count(DocumentStatus::Unresolved),
            failed = report.count(DocumentStatus::Failed),
            degraded = report.count(DocumentStatus::Degraded),
            elapsed_ms = timer.total_elapsed().as_millis() as u64,
            "Consistency check finished"
        );
        Ok(report)
    }

    async fn fetch_with_retry(
        &self,
        document_id: &str,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> Fetched {
        let _permit = match until_cancelled(cancel, semaphore.acquire()).await {
            None => return Fetched::Cancelled,
            Some(Ok(permit)) => permit,
            Some(Err(_)) => return Fetched::Cancelled,
        };

        let mut attempt = 0;
        loop {
            let fetch = tokio::time::timeout(
                self.settings.fetch_timeout,
                self.fetcher.fetch(document_id),
            );
            let error = match until_cancelled(cancel, fetch).await {
                None => return Fetched::Cancelled,
                Some(Ok(Ok(text))) => {
                    debug!(document_id = %document_id, chars = text.chars().count(), "Fetched");
                    return Fetched::Text(text);
                }
                Some(Ok(Err(e))) => e,
                Some(Err(_elapsed)) => GatewayError::FetchTimeout {
                    document_id: document_id.to_string(),
                    duration: self.settings.fetch_timeout,
                },
            };

            if !error.is_transient() || attempt >= self.settings.fetch_retries {
                warn!(document_id = %document_id, error = %error, "Fetch failed");
                return Fetched::Failed(error.into());
            }

            let backoff = FETCH_BACKOFF * 2u32.saturating_pow(attempt);
            warn!(
                document_id = %document_id,
                attempt = attempt + 1,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Fetch failed, retrying"
            );
            if until_cancelled(cancel, tokio::time::sleep(backoff))
                .await
                .is_none()
            {
                return Fetched::Cancelled;
            }
            attempt += 1;
        }
    }

    async fn process_document(
        &self,
        request: &ModificationRequest,
        candidate: &DocumentCandidate,
        semaphore: &Semaphore,
        cancel: &CancellationToken,
    ) -> DocumentPatchResult {
        let deadline_error = EngineError::DeadlineExceeded {
            duration: self.settings.deadline,
        };
        let degraded = || {
            DocumentPatchResult::unprocessed(
                &candidate.document_id,
                &candidate.full_text,
                DocumentStatus::Degraded,
                Some(&deadline_error),
            )
        };

        let _permit = match until_cancelled(cancel, semaphore.acquire()).await {
            Some(Ok(permit)) => permit,
            _ => return degraded(),
        };

        let analyzer =
            ConsistencyAnalyzer::new(self.reasoning.as_ref(), self.settings.max_documents_analyzed);
        let points = match until_cancelled(cancel, analyzer.analyze_document(request, candidate)).await
        {
            None => return degraded(),
            Some(Err(e)) => {
                warn!(error = %e, "Analysis failed");
                return DocumentPatchResult::unprocessed(
                    &candidate.document_id,
                    &candidate.full_text,
                    DocumentStatus::Failed,
                    Some(&e),
                );
            }
            Some(Ok(points)) => points,
        };

        if points.is_empty() {
            return DocumentPatchResult::unprocessed(
                &candidate.document_id,
                &candidate.full_text,
                DocumentStatus::NoChangeNeeded,
                None,
            );
        }

        let outcomes = join_all(points.iter().enumerate().map(|(index, point)| {
            let react = ReactLoop::new(
                self.reasoning.as_ref(),
                self.retrieval.as_ref(),
                self.settings.max_iterations,
                cancel.clone(),
            );
            let span = loop_span(&point.document_id, index);
            async move { react.run(request, point).await }.instrument(span)
        }))
        .await;

        let located = self.locate_drafts(candidate, &points, &outcomes, cancel).await;
        self.merge(candidate, points, outcomes, located)
    }

    /// Locate every committed draft's excerpt on the blocking pool, racing
    /// the request deadline. `None` when the deadline fired first.
    async fn locate_drafts(
        &self,
        candidate: &DocumentCandidate,
        points: &[ModificationPoint],
        outcomes: &[LoopOutcome],
        cancel: &CancellationToken,
    ) -> Option<Vec<Located>> {
        let excerpts: Vec<Option<String>> = points
            .iter()
            .zip(outcomes)
            .map(|(point, outcome)| {
                outcome
                    .draft
                    .as_ref()
                    .map(|_| point.original_excerpt.clone())
            })
            .collect();
        if excerpts.iter().all(Option::is_none) {
            return Some(excerpts.into_iter().map(|_| None).collect());
        }

        let locator = PatchLocator::new(self.settings.match_threshold, self.settings.window_tolerance)
            .with_cancellation(cancel.clone());
        let full_text = candidate.full_text.clone();
        let task = tokio::task::spawn_blocking(move || {
            excerpts
                .into_iter()
                .map(|excerpt| excerpt.map(|e| locator.locate(&full_text, &e)))
                .collect::<Vec<Located>>()
        });

        match until_cancelled(cancel, task).await {
            Some(Ok(located)) if !cancel.is_cancelled() => Some(located),
            Some(Ok(_)) | None => {
                debug!("Deadline reached while locating patches");
                None
            }
            Some(Err(e)) => {
                warn!(error = %e, "Patch location task failed");
                let failed = EngineError::PatchUnresolved {
                    best_score: 0.0,
                    threshold: self.settings.match_threshold,
                };
                Some(
                    outcomes
                        .iter()
                        .map(|o| o.draft.as_ref().map(|_| Err(failed.clone())))
                        .collect(),
                )
            }
        }
    }

    /// Turn the loop outcomes of one document into its final result.
    ///
    /// `located` holds one entry per point (`None` for points without a
    /// draft), or is `None` itself when locating was cut short by the
    /// deadline.
    fn merge(
        &self,
        candidate: &DocumentCandidate,
        points: Vec<ModificationPoint>,
        outcomes: Vec<LoopOutcome>,
        located: Option<Vec<Located>>,
    ) -> DocumentPatchResult {
        let budget = self.settings.draft_char_budget;
        let locate_cancelled = located.is_none();
        let mut located = located.unwrap_or_default().into_iter();
        let point_count = points.len();

        let mut traces = Vec::with_capacity(point_count);
        let mut errors = Vec::new();
        let mut unresolved = Vec::new();
        let mut patches = Vec::new();
        let mut truncated = false;
        let mut cancelled = false;
        let mut hard_failures = 0;

        for (point_index, (point, outcome)) in points.into_iter().zip(outcomes).enumerate() {
            let location = located.next().flatten();
            if outcome.cancelled {
                cancelled = true;
                errors.push(RecordedError::new(
                    Some(point_index),
                    &EngineError::DeadlineExceeded {
                        duration: self.settings.deadline,
                    },
                ));
            }
            if let Some(e) = &outcome.error {
                // a kept draft turns a failed regeneration into a warning
                if !e.is_soft() && outcome.draft.is_none() {
                    hard_failures += 1;
                }
                errors.push(RecordedError::new(Some(point_index), e));
            }

            if let Some(draft) = &outcome.draft {
                let (replacement, cut) = truncate_to_budget(draft, budget);
                if cut {
                    warn!(point_index, limit = budget, "Draft exceeds the character budget, truncating");
                    errors.push(RecordedError::new(
                        Some(point_index),
                        &EngineError::OutputTruncated { limit: budget },
                    ));
                }
                truncated |= cut || outcome.truncated;

                match location {
                    None => {}
                    Some(Ok(location)) => {
                        debug!(
                            point_index,
                            start = location.start,
                            end = location.end,
                            confidence = location.confidence,
                            "Patch located"
                        );
                        patches.push(PatchCandidate {
                            point_index,
                            start: location.start,
                            end: location.end,
                            replacement: replacement.to_string(),
                            confidence: location.confidence,
                        });
                    }
                    Some(Err(e)) => {
                        let best_score = match &e {
                            EngineError::PatchUnresolved { best_score, .. } => *best_score,
                            _ => 0.0,
                        };
                        info!(point_index, best_score, "Patch unresolved, left for manual review");
                        unresolved.push(UnresolvedPatch {
                            point_index,
                            original_excerpt: point.original_excerpt.clone(),
                            replacement: replacement.to_string(),
                            best_score,
                        });
                        errors.push(RecordedError::new(Some(point_index), &e));
                    }
                }
            }

            traces.push(PointTrace {
                point_index,
                point,
                trace: outcome.trace,
            });
        }

        if locate_cancelled {
            cancelled = true;
            errors.push(RecordedError::new(
                None,
                &EngineError::DeadlineExceeded {
                    duration: self.settings.deadline,
                },
            ));
        }

        let (applied_patches, superseded) = resolve_overlaps(patches);
        let modified_content = apply_patches(&candidate.full_text, &applied_patches);

        let status = if cancelled {
            DocumentStatus::Degraded
        } else if !applied_patches.is_empty() {
            DocumentStatus::Applied
        } else if hard_failures == point_count {
            DocumentStatus::Failed
        } else {
            DocumentStatus::Unresolved
        };

        info!(
            status = %status,
            applied = applied_patches.len(),
            superseded = superseded.len(),
            unresolved = unresolved.len(),
            truncated,
            "Document finished"
        );

        DocumentPatchResult {
            document_id: candidate.document_id.clone(),
            original_content: candidate.full_text.clone(),
            modified_content,
            status,
            applied_patches,
            superseded,
            unresolved,
            truncated,
            traces,
            errors,
        }
    }
}
