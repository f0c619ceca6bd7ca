//! HTTP adapter for the semantic search service.
//!
//! The service answers in one of two layouts: a `bundles` array whose
//! entries carry `conversations` and `facts`, or the older
//! `short_term_memory` object with the same two lists and no scores. Both
//! are flattened into [`RetrievedPassage`]s here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concord_config::Config;
use concord_utils::error::GatewayError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use super::RetrievalGateway;
use crate::model::{RetrievedPassage, SearchResults, rank_passages};

const SERVICE: &str = "retrieval";

/// Metadata keys that may hold a fetchable document id, in priority order.
const ID_KEYS: [&str; 4] = ["file_path", "source_identifier", "minio_url", "source"];

const RECENCY_KEYS: [&str; 2] = ["updated_at", "modified_at"];

pub struct HttpRetrieval {
    client: Client,
    url: String,
    content_type: String,
    use_refine: bool,
    timeout: Duration,
}

impl HttpRetrieval {
    /// # Errors
    ///
    /// `GatewayError::RetrievalUnavailable` when the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        content_type: impl Into<String>,
        use_refine: bool,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                GatewayError::RetrievalUnavailable(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            url: url.into(),
            content_type: content_type.into(),
            use_refine,
            timeout,
        })
    }

    /// # Errors
    ///
    /// See [`HttpRetrieval::new`].
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        Self::new(
            config.retrieval_url(),
            config.content_type(),
            config.retrieval.use_refine.unwrap_or(false),
            Duration::from_secs(config.retrieval.timeout_secs.unwrap_or(30)),
        )
    }
}

#[async_trait]
impl RetrievalGateway for HttpRetrieval {
    async fn search(
        &self,
        query: &str,
        corpus_id: &str,
        top_k: usize,
    ) -> Result<SearchResults, GatewayError> {
        let payload = json!({
            "query": query,
            "project_id": corpus_id,
            "top_k": top_k,
            "use_refine": self.use_refine,
            "metadata_filter": { "content_type": self.content_type },
        });

        debug!(url = %self.url, top_k, "Searching corpus");

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GatewayError::RetrievalUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::RetrievalUnavailable(format!(
                "search service returned {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse {
                service: SERVICE.to_string(),
                reason: e.to_string(),
            })?;

        normalize_search_response(body)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchBody {
    #[serde(default)]
    bundles: Vec<Bundle>,
    #[serde(default)]
    short_term_memory: Option<Bundle>,
}

#[derive(Debug, Default, Deserialize)]
struct Bundle {
    #[serde(default)]
    conversations: Vec<Entry>,
    #[serde(default)]
    facts: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    metadata: Value,
}

/// Flatten either response layout into ranked, fetchable passages.
///
/// Passages without an `http(s)` source are dropped with a warning but still
/// counted in `total_passages`.
///
/// # Errors
///
/// `GatewayError::InvalidResponse` when `body` is not a search response.
pub fn normalize_search_response(body: Value) -> Result<SearchResults, GatewayError> {
    let body: SearchBody =
        serde_json::from_value(body).map_err(|e| GatewayError::InvalidResponse {
            service: SERVICE.to_string(),
            reason: e.to_string(),
        })?;

    let mut entries: Vec<(Entry, bool)> = Vec::new();
    if !body.bundles.is_empty() {
        for bundle in body.bundles {
            entries.extend(bundle.conversations.into_iter().map(|e| (e, true)));
            entries.extend(bundle.facts.into_iter().map(|e| (e, true)));
        }
    } else if let Some(memory) = body.short_term_memory {
        // the legacy layout carries no scores
        entries.extend(memory.conversations.into_iter().map(|e| (e, false)));
        entries.extend(memory.facts.into_iter().map(|e| (e, false)));
    }

    let total_passages = entries.len();
    let mut passages = Vec::with_capacity(total_passages);
    for (entry, scored) in entries {
        let Some(document_id) = document_id_of(&entry.metadata) else {
            warn!("Skipping passage without a source identifier");
            continue;
        };
        if !is_fetchable(&document_id) {
            warn!(document_id = %document_id, "Skipping passage with a non-HTTP source");
            continue;
        }

        let score = if scored {
            entry.score.unwrap_or(1.0)
        } else {
            1.0
        };
        let mut passage = RetrievedPassage::new(
            document_id,
            entry.text.or(entry.content).unwrap_or_default(),
            score,
        );
        passage.updated_at = recency_of(&entry.metadata);
        passage.source_metadata = entry.metadata;
        passages.push(passage);
    }

    rank_passages(&mut passages);
    debug!(
        total_passages,
        usable = passages.len(),
        "Normalized search response"
    );

    Ok(SearchResults {
        passages,
        total_passages,
    })
}

fn document_id_of(metadata: &Value) -> Option<String> {
    ID_KEYS
        .iter()
        .filter_map(|key| metadata.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

fn is_fetchable(document_id: &str) -> bool {
    document_id.starts_with("http://") || document_id.starts_with("https://")
}

fn recency_of(metadata: &Value) -> Option<DateTime<Utc>> {
    RECENCY_KEYS
        .iter()
        .filter_map(|key| metadata.get(key).and_then(Value::as_str))
        .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundles_layout() {
        let body = json!({
            "bundles": [{
                "conversations": [
                    {"text": "early-season maps", "score": 0.4,
                     "metadata": {"file_path": "http://docs/a.md"}},
                ],
                "facts": [
                    {"content": "crop fact", "score": 0.9,
                     "metadata": {"source_identifier": "https://docs/b.md"}},
                ],
            }],
        });

        let results = normalize_search_response(body).unwrap();
        assert_eq!(results.total_passages, 2);
        assert_eq!(results.passages[0].document_id, "https://docs/b.md");
        assert_eq!(results.passages[0].raw_text_fragment, "crop fact");
        assert_eq!(results.passages[1].raw_text_fragment, "early-season maps");
    }

    #[test]
    fn test_legacy_short_term_memory_layout() {
        let body = json!({
            "short_term_memory": {
                "conversations": [
                    {"text": "one", "score": 0.1, "metadata": {"minio_url": "http://minio/a"}},
                ],
                "facts": [
                    {"content": "two", "metadata": {"source": "http://minio/b"}},
                ],
            },
        });

        let results = normalize_search_response(body).unwrap();
        assert_eq!(results.passages.len(), 2);
        assert!(results.passages.iter().all(|p| p.relevance_score == 1.0));
    }

    #[test]
    fn test_identifier_priority_and_non_http_skip() {
        let body = json!({
            "bundles": [{
                "conversations": [
                    {"text": "a", "metadata": {
                        "file_path": "", "source_identifier": "http://docs/x", "source": "http://other"}},
                    {"text": "b", "metadata": {"file_path": "local/path.md"}},
                    {"text": "c", "metadata": {}},
                ],
            }],
        });

        let results = normalize_search_response(body).unwrap();
        assert_eq!(results.total_passages, 3);
        assert_eq!(results.passages.len(), 1);
        assert_eq!(results.passages[0].document_id, "http://docs/x");
    }

    #[test]
    fn test_scores_are_clamped() {
        let body = json!({
            "bundles": [{"conversations": [
                {"text": "a", "score": 3.5, "metadata": {"file_path": "http://d/a"}},
            ]}],
        });
        let results = normalize_search_response(body).unwrap();
        assert_eq!(results.passages[0].relevance_score, 1.0);
    }

    #[test]
    fn test_recency_is_read_from_metadata() {
        let body = json!({
            "bundles": [{"conversations": [
                {"text": "a", "score": 0.5,
                 "metadata": {"file_path": "http://d/a", "updated_at": "2024-05-01T10:00:00Z"}},
            ]}],
        });
        let results = normalize_search_response(body).unwrap();
        assert!(results.passages[0].updated_at.is_some());
    }

    #[test]
    fn test_empty_and_invalid_bodies() {
        let results = normalize_search_response(json!({})).unwrap();
        assert!(results.is_empty());
        assert_eq!(results.total_passages, 0);

        let err = normalize_search_response(json!({"bundles": "nope"})).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse { .. }));
    }
}
