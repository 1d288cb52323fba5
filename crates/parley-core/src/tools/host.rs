//! Tool host trait (port).
//!
//! The concrete tools and their JSON schemas live outside Parley; the tool
//! host both supplies the schema set for a user and executes calls.

use std::future::Future;

use parley_types::error::ToolError;
use parley_types::llm::ToolSchema;
use parley_types::tool::ToolCallRequest;

pub trait ToolHost: Send + Sync {
    /// Tool schemas callable by `user_id`.
    fn list_tools(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<ToolSchema>, ToolError>> + Send;

    /// Execute one call and return its JSON payload.
    fn execute(
        &self,
        user_id: &str,
        request: &ToolCallRequest,
    ) -> impl Future<Output = Result<serde_json::Value, ToolError>> + Send;
}
