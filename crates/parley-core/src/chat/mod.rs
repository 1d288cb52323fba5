//! The chat request pipeline.
//!
//! [`service::ChatService`] drives one request end to end: context gathering,
//! the [`orchestrator`] tool loop, the [`stream`] responder, and the
//! post-response background job.

pub mod orchestrator;
pub mod prompt;
pub mod service;
pub mod stream;

use parley_types::error::ConfigurationError;
use parley_types::llm::LlmError;

use crate::provider::ResolveError;

/// A request-fatal failure. Its `Display` is the text of the terminal
/// `error` frame.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// User-fixable configuration defect, shown verbatim.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("the language model request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("{0}")]
    Internal(String),
}

impl From<ResolveError> for ChatError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Configuration(e) => ChatError::Configuration(e),
            ResolveError::Storage(e) => ChatError::Internal(format!("failed to load chat configuration: {e}")),
        }
    }
}
