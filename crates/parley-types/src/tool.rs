//! Tool-call types for Parley.
//!
//! Tool invocations reach the pipeline in two encodings (structured function
//! calls and JSON embedded in text). Both are normalized into the canonical
//! [`ToolCallRequest`] before execution, so execution and history handling
//! never care how a call was detected.

use serde::{Deserialize, Serialize};

use crate::llm::NativeToolCall;

/// Canonical, encoding-agnostic tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub tool_id: String,
    pub action: String,
    pub params: serde_json::Value,
    /// Id used to associate the result with the originating call.
    pub correlation_id: String,
}

/// A tool call found inside free text as `toolName{...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextualToolCall {
    pub tool_name: String,
    /// Byte offset of the first character of the tool name.
    pub start: usize,
    /// Byte offset one past the closing brace.
    pub end: usize,
    /// The parsed JSON object (always contains a string `action`).
    pub payload: serde_json::Value,
}

/// How a tool call was detected in a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallEncoding {
    Native(NativeToolCall),
    Textual(TextualToolCall),
}

/// Result envelope stored in a `tool` history message and echoed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResultEnvelope {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// The outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub tool_used: String,
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolExecutionResult {
    pub fn envelope(&self) -> ToolResultEnvelope {
        ToolResultEnvelope {
            success: self.success,
            data: self.data.clone(),
            error: self.error.clone(),
        }
    }
}

/// One row of the `tools` stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool: String,
    pub success: bool,
    /// Execution time in milliseconds.
    pub duration: u64,
}

/// Payload of the `tools` stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsSummary {
    pub count: usize,
    pub tools: Vec<ToolUsage>,
}

impl ToolsSummary {
    pub fn from_results(results: &[ToolExecutionResult]) -> Self {
        let tools: Vec<ToolUsage> = results
            .iter()
            .map(|r| ToolUsage {
                tool: r.tool_used.clone(),
                success: r.success,
                duration: r.execution_time_ms,
            })
            .collect();
        Self {
            count: tools.len(),
            tools,
        }
    }
}

/// Aggregate tool metadata attached to stored memories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionStats {
    pub succeeded: u32,
    pub failed: u32,
    /// Number of values the sanitizer redacted across all results.
    pub redactions: u32,
}
