//! Consistency-propagation engine.
//!
//! Given a [`ModificationRequest`], the [`Orchestrator`] finds every document
//! in a corpus that shares the request's subject matter, asks the reasoning
//! backend where each one must change, runs one bounded ReAct loop per
//! modification point to draft the replacement text, locates each draft in
//! the original with a fuzzy matcher and merges the accepted patches into a
//! [`ConsistencyReport`].
//!
//! External services are reached through three traits in [`gateway`]:
//! [`RetrievalGateway`], [`DocumentFetcher`] and [`ReasoningGateway`].

pub mod analyzer;
pub mod gateway;
pub mod json;
pub mod locator;
pub mod model;
pub mod orchestrator;
pub mod prompts;
pub mod react;
pub mod report;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use gateway::{
    Completion, DocumentFetcher, HttpFetcher, HttpRetrieval, LlmReasoning, ReasoningGateway,
    RetrievalGateway,
};
pub use locator::{Location, PatchLocator, apply_patches, resolve_overlaps};
pub use model::{
    AgentAction, AgentStep, AgentTrace, ConsistencyReport, ConsistencySummary, DocumentPatchResult,
    DocumentStatus, ModificationPoint, ModificationRequest, PatchCandidate, RetrievedPassage,
    SearchResults,
};
pub use orchestrator::{EngineSettings, Orchestrator};
pub use react::{LoopOutcome, ReactLoop};
pub use report::{ApiRequest, ConsistencyResponse, ModificationEntry};
