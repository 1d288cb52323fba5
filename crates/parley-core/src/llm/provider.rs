//! LlmProvider trait definition.
//!
//! This is the core abstraction that all LLM endpoints implement. Parley only
//! makes non-streaming calls; the typing effect is produced by the streaming
//! responder after the answer is final.

use std::future::Future;

use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError};
use parley_types::provider::ProviderEndpoint;

use super::box_provider::BoxLlmProvider;

/// Trait for LLM provider backends.
///
/// Implementations live in parley-infra (e.g., `OpenAiCompatibleProvider`).
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai", "groq").
    fn name(&self) -> &str;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl Future<Output = Result<CompletionResponse, LlmError>> + Send;
}

/// Builds a provider client for a resolved endpoint.
///
/// The endpoint is chosen per user at request time, so clients are created on
/// demand rather than wired at startup.
pub trait LlmProviderFactory: Send + Sync {
    fn create(&self, endpoint: &ProviderEndpoint) -> Result<BoxLlmProvider, LlmError>;
}
