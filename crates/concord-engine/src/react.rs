//! ReAct loop: iterative search / generate / finish for one modification
//! point.
//!
//! Each iteration asks the reasoning model for the next action given the
//! trace so far, executes it and appends exactly one step. The loop is
//! sequential by construction. When the iteration budget runs out a
//! synthetic FINISH marked `forced` is appended, so a trace never holds more
//! than `max_iterations + 1` steps.

use concord_utils::error::EngineError;
use concord_utils::logging::preview;
use serde::Deserialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::{ReasoningGateway, RetrievalGateway};
use crate::json::{parse_json_answer, strip_fence};
use crate::model::{AgentAction, AgentStep, AgentTrace, ModificationPoint, ModificationRequest};
use crate::prompts;

const DECISION_MAX_TOKENS: u32 = 500;

/// An action chosen by the model, before it is executed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Decision {
    Search {
        query: String,
        #[serde(default)]
        reason: String,
    },
    Generate {
        #[serde(default)]
        instruction: Option<String>,
        #[serde(default)]
        reason: String,
    },
    Finish {
        #[serde(default)]
        reason: String,
    },
}

impl Decision {
    fn reason(&self) -> &str {
        match self {
            Self::Search { reason, .. }
            | Self::Generate { reason, .. }
            | Self::Finish { reason } => reason,
        }
    }
}

/// What one loop produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub trace: AgentTrace,
    /// The committed draft, when the loop produced one.
    pub draft: Option<String>,
    /// The committed draft was cut at the model's token ceiling.
    pub truncated: bool,
    /// Why no draft was committed, or the failed generation that followed
    /// the committed draft. `NoDraftProduced` is a soft outcome.
    pub error: Option<EngineError>,
    /// The request deadline cancelled the loop.
    pub cancelled: bool,
}

pub struct ReactLoop<'a> {
    reasoning: &'a dyn ReasoningGateway,
    retrieval: &'a dyn RetrievalGateway,
    max_iterations: u32,
    cancel: CancellationToken,
}

impl<'a> ReactLoop<'a> {
    #[must_use]
    pub fn new(
        reasoning: &'a dyn ReasoningGateway,
        retrieval: &'a dyn RetrievalGateway,
        max_iterations: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reasoning,
            retrieval,
            max_iterations,
            cancel,
        }
    }

    async fn until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn cancelled(trace: AgentTrace) -> LoopOutcome {
        debug!(steps = trace.len(), "Loop cancelled");
        LoopOutcome {
            trace,
            draft: None,
            truncated: false,
            error: None,
            cancelled: true,
        }
    }

    pub async fn run(
        &self,
        request: &ModificationRequest,
        point: &ModificationPoint,
    ) -> LoopOutcome {
        let mut trace = AgentTrace::new();

        for iteration in 1..=self.max_iterations {
            if self.cancel.is_cancelled() {
                return Self::cancelled(trace);
            }

            let Some((decision, rationale)) = self.decide(request, point, &trace, iteration).await
            else {
                return Self::cancelled(trace);
            };
            debug!(iteration, action = ?decision, "Decision");

            match decision {
                Decision::Search { query, .. } => {
                    let Some(result) = self
                        .until_cancelled(self.retrieval.search(
                            &query,
                            &request.corpus_id,
                            request.top_k,
                        ))
                        .await
                    else {
                        return Self::cancelled(trace);
                    };

                    let (success, has_content) = match result {
                        Ok(results) => {
                            let has_content = !results.is_empty();
                            trace.add_evidence(results.passages);
                            (true, has_content)
                        }
                        Err(e) => {
                            warn!(iteration, query = %query, error = %e, "Search failed");
                            (false, false)
                        }
                    };
                    trace.push(AgentStep {
                        iteration,
                        action: AgentAction::Search {
                            query,
                            success,
                            has_content,
                        },
                        rationale,
                        forced: false,
                    });
                }
                Decision::Generate { instruction, .. } => {
                    let prompt =
                        prompts::generation_prompt(request, point, &trace, instruction.as_deref());
                    let max_tokens = prompts::generation_max_tokens(&point.original_excerpt);
                    let Some(result) = self
                        .until_cancelled(self.reasoning.complete(&prompt, max_tokens))
                        .await
                    else {
                        return Self::cancelled(trace);
                    };

                    let completion = match result {
                        Ok(c) if strip_fence(&c.text).is_empty() => Err(EngineError::ModelError(
                            "empty draft returned".to_string(),
                        )),
                        other => other,
                    };
                    let completion = match completion {
                        Ok(c) => c,
                        Err(e) => {
                            warn!(iteration, error = %e, "Draft generation failed");
                            trace.push(AgentStep {
                                iteration,
                                action: AgentAction::Generate {
                                    draft: String::new(),
                                    truncated: false,
                                    error: Some(e.to_string()),
                                },
                                rationale,
                                forced: false,
                            });
                            return Self::settle_after_failure(trace, e);
                        }
                    };

                    let draft = strip_fence(&completion.text).to_string();
                    if completion.truncated {
                        warn!(iteration, "Draft hit the output token ceiling");
                    }
                    debug!(iteration, draft = %preview(&draft), "Draft generated");
                    trace.push(AgentStep {
                        iteration,
                        action: AgentAction::Generate {
                            draft,
                            truncated: completion.truncated,
                            error: None,
                        },
                        rationale,
                        forced: false,
                    });
                }
                Decision::Finish { .. } => {
                    trace.push(AgentStep {
                        iteration,
                        action: AgentAction::Finish,
                        rationale,
                        forced: false,
                    });
                    return Self::commit(trace);
                }
            }
        }

        info!(
            budget = self.max_iterations,
            "Iteration budget exhausted, finishing with the best available draft"
        );
        let iteration = trace.next_iteration();
        trace.push(AgentStep {
            iteration,
            action: AgentAction::Finish,
            rationale: format!("iteration budget of {} exhausted", self.max_iterations),
            forced: true,
        });
        Self::commit(trace)
    }

    fn commit(trace: AgentTrace) -> LoopOutcome {
        match trace.last_draft().map(|(d, t)| (d.to_string(), t)) {
            Some((draft, truncated)) => LoopOutcome {
                trace,
                draft: Some(draft),
                truncated,
                error: None,
                cancelled: false,
            },
            None => {
                let iterations = u32::try_from(trace.len()).unwrap_or(u32::MAX);
                LoopOutcome {
                    trace,
                    draft: None,
                    truncated: false,
                    error: Some(EngineError::NoDraftProduced { iterations }),
                    cancelled: false,
                }
            }
        }
    }

    /// End the loop after a failed GENERATE. An earlier draft is still
    /// committed and the failure travels along with it; without one the
    /// point fails.
    fn settle_after_failure(trace: AgentTrace, error: EngineError) -> LoopOutcome {
        let kept = trace.last_draft().map(|(d, t)| (d.to_string(), t));
        if kept.is_some() {
            info!(error = %error, "Keeping the previous draft after a failed generation");
        }
        let (draft, truncated) = match kept {
            Some((draft, truncated)) => (Some(draft), truncated),
            None => (None, false),
        };
        LoopOutcome {
            trace,
            draft,
            truncated,
            error: Some(error),
            cancelled: false,
        }
    }

    /// Ask the model for the next action; `None` when cancelled.
    ///
    /// Failed or unusable answers fall back to a fixed policy so the loop
    /// always makes progress.
    async fn decide(
        &self,
        request: &ModificationRequest,
        point: &ModificationPoint,
        trace: &AgentTrace,
        iteration: u32,
    ) -> Option<(Decision, String)> {
        let prompt =
            prompts::decision_prompt(request, point, trace, iteration, self.max_iterations);
        let result = self
            .until_cancelled(self.reasoning.complete(&prompt, DECISION_MAX_TOKENS))
            .await?;

        let why = match result {
            Ok(completion) => match parse_json_answer::<Decision>(&completion.text) {
                Ok(Decision::Search { query, .. }) if query.trim().is_empty() => {
                    "search without a query".to_string()
                }
                Ok(decision) => {
                    let rationale = decision.reason().to_string();
                    return Some((decision, rationale));
                }
                Err(e) => format!("unparseable decision ({e})"),
            },
            Err(e) => format!("reasoning failed ({e})"),
        };

        let decision = fallback_decision(request, trace);
        warn!(iteration, reason = %why, fallback = ?decision, "Using fallback decision");
        Some((decision, format!("fallback: {why}")))
    }
}

/// Search the request's concept first, then draft, then stop.
fn fallback_decision(request: &ModificationRequest, trace: &AgentTrace) -> Decision {
    if !trace.has_searched() {
        Decision::Search {
            query: request.point.clone(),
            reason: String::new(),
        }
    } else if trace.last_draft().is_none() {
        Decision::Generate {
            instruction: None,
            reason: String::new(),
        }
    } else {
        Decision::Finish {
            reason: String::new(),
        }
    }
}
