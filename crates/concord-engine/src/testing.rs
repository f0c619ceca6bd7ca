//! Scripted collaborators for exercising the engine without network access.
//!
//! Available to this crate's tests and, through the `test-utils` feature, to
//! integration tests of dependent crates.

use async_trait::async_trait;
use concord_utils::error::{EngineError, GatewayError};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::gateway::{Completion, DocumentFetcher, ReasoningGateway, RetrievalGateway};
use crate::model::{RetrievedPassage, SearchResults};

/// Counts calls currently in progress and remembers the highest count seen.
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Retrieval that answers every query with the same passages.
#[derive(Debug, Default)]
pub struct StaticRetrieval {
    passages: Vec<RetrievedPassage>,
    total_passages: Option<usize>,
    unavailable: bool,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl StaticRetrieval {
    #[must_use]
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            passages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every search fails with `RetrievalUnavailable`.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Report more passages than are returned, as when some are unfetchable.
    #[must_use]
    pub fn with_total_passages(mut self, total: usize) -> Self {
        self.total_passages = Some(total);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queries received so far, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RetrievalGateway for StaticRetrieval {
    async fn search(
        &self,
        query: &str,
        _corpus_id: &str,
        top_k: usize,
    ) -> Result<SearchResults, GatewayError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable {
            return Err(GatewayError::RetrievalUnavailable(
                "connection refused".to_string(),
            ));
        }

        let passages: Vec<_> = self.passages.iter().take(top_k).cloned().collect();
        let total_passages = self.total_passages.unwrap_or(passages.len());
        Ok(SearchResults {
            passages,
            total_passages,
        })
    }
}

/// Fetcher backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MapFetcher {
    documents: HashMap<String, String>,
    failures: HashMap<String, VecDeque<GatewayError>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: InFlight,
}

impl MapFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_document(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.documents.insert(id.into(), text.into());
        self
    }

    /// Fail the next fetch of `id` with `error`; repeated calls queue more
    /// failures before the document is served.
    #[must_use]
    pub fn with_failure(mut self, id: impl Into<String>, error: GatewayError) -> Self {
        self.failures.entry(id.into()).or_default().push_back(error);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(id.into(), delay);
        self
    }

    #[must_use]
    pub fn fetch_count(&self, id: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Most fetches ever running at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }
}

#[async_trait]
impl DocumentFetcher for MapFetcher {
    async fn fetch(&self, document_id: &str) -> Result<String, GatewayError> {
        let _in_flight = self.in_flight.enter();
        let attempt = match self.calls.lock() {
            Ok(mut calls) => {
                let count = calls.entry(document_id.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(_) => 1,
        };
        if let Some(delay) = self.delays.get(document_id) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(error) = self
            .failures
            .get(document_id)
            .and_then(|queue| queue.get(attempt - 1))
        {
            return Err(error.clone());
        }
        self.documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| GatewayError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }
}

#[derive(Debug)]
struct Rule {
    needles: Vec<String>,
    replies: VecDeque<Result<Completion, EngineError>>,
    last: Option<Result<Completion, EngineError>>,
}

/// Reasoning backend that answers from a script.
///
/// A prompt is answered by the first rule whose needles all occur in it.
/// Each rule hands out its replies in order and then repeats the last one.
/// Prompts with no matching rule fail with `ModelError`.
#[derive(Debug, Default)]
pub struct ScriptedReasoning {
    rules: Mutex<Vec<Rule>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    in_flight: InFlight,
}

impl ScriptedReasoning {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, needles: &[&str], reply: Result<Completion, EngineError>) -> Self {
        let needles: Vec<String> = needles.iter().map(|n| (*n).to_string()).collect();
        if let Ok(mut rules) = self.rules.lock() {
            match rules.iter_mut().find(|r| r.needles == needles) {
                Some(rule) => rule.replies.push_back(reply),
                None => rules.push(Rule {
                    needles,
                    replies: VecDeque::from([reply]),
                    last: None,
                }),
            }
        }
        self
    }

    #[must_use]
    pub fn reply(self, needle: &str, text: &str) -> Self {
        self.push(&[needle], Ok(Completion::new(text)))
    }

    /// Reply to prompts containing every needle.
    #[must_use]
    pub fn reply_when(self, needles: &[&str], text: &str) -> Self {
        self.push(needles, Ok(Completion::new(text)))
    }

    /// Reply with output flagged as cut at the token ceiling.
    #[must_use]
    pub fn reply_truncated(self, needle: &str, text: &str) -> Self {
        self.push(
            &[needle],
            Ok(Completion {
                text: text.to_string(),
                truncated: true,
            }),
        )
    }

    #[must_use]
    pub fn fail(self, needle: &str, error: EngineError) -> Self {
        self.push(&[needle], Err(error))
    }

    #[must_use]
    pub fn fail_when(self, needles: &[&str], error: EngineError) -> Self {
        self.push(needles, Err(error))
    }

    /// Sleep before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Most completions ever running at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }
}

#[async_trait]
impl ReasoningGateway for ScriptedReasoning {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<Completion, EngineError> {
        let _in_flight = self.in_flight.enter();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut rules = self
            .rules
            .lock()
            .map_err(|_| EngineError::ModelError("script poisoned".to_string()))?;
        let Some(rule) = rules
            .iter_mut()
            .find(|r| r.needles.iter().all(|n| prompt.contains(n.as_str())))
        else {
            return Err(EngineError::ModelError("no scripted reply".to_string()));
        };

        if let Some(next) = rule.replies.pop_front() {
            rule.last = Some(next);
        }
        rule.last
            .clone()
            .unwrap_or_else(|| Err(EngineError::ModelError("no scripted reply".to_string())))
    }
}
