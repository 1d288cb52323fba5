use thiserror::Error;

/// A user's chat task configuration is unusable.
///
/// These are configuration defects, not runtime failures: they are never
/// retried and their message is shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("no chat provider configured: select a provider in your chat settings")]
    NoProvider,

    #[error("no model id configured for provider '{provider}': select a model in your chat settings")]
    NoModel { provider: String },

    #[error(
        "model id '{model_id}' looks like a database id, not a model name: re-select the model in your chat settings"
    )]
    NumericModelId { model_id: String },
}

/// Errors from repository operations (used by trait definitions in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised by a tool host while listing or executing tools.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("tool timed out after {0}ms")]
    Timeout(u64),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("tool host unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the user notification channel.
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);
