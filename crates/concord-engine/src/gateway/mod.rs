//! Boundaries to the external collaborators: semantic search, document
//! storage and the reasoning model.
//!
//! Each collaborator is a trait so the orchestrator can be driven by HTTP
//! adapters in production and by scripted doubles in tests. These are the
//! only places the engine suspends.

mod fetch;
mod reasoning;
mod retrieval;

pub use fetch::HttpFetcher;
pub use reasoning::{Completion, LlmReasoning, ReasoningGateway};
pub use retrieval::{HttpRetrieval, normalize_search_response};

use async_trait::async_trait;
use concord_utils::error::GatewayError;

use crate::model::SearchResults;

/// Semantic search over a corpus.
#[async_trait]
pub trait RetrievalGateway: Send + Sync {
    /// Ranked passages for `query`.
    ///
    /// # Errors
    ///
    /// `GatewayError::RetrievalUnavailable` on transport failure,
    /// `GatewayError::InvalidResponse` when the body cannot be read.
    async fn search(
        &self,
        query: &str,
        corpus_id: &str,
        top_k: usize,
    ) -> Result<SearchResults, GatewayError>;
}

/// Resolves a document id to its full text.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// # Errors
    ///
    /// `DocumentNotFound`, `FetchTimeout` or `FetchFailed`.
    async fn fetch(&self, document_id: &str) -> Result<String, GatewayError>;
}
