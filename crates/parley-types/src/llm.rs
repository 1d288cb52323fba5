//! LLM request/response types for Parley.
//!
//! These types model the data shapes for chat-completion interactions:
//! the conversation history, completion requests and responses, native tool
//! calls, usage tracking, and error classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::tool::ToolResultEnvelope;

/// Role of a message in an LLM conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A structured (function-call) tool invocation returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeToolCall {
    /// Provider-assigned call id, echoed back on the tool result message.
    pub id: String,
    /// Function name, i.e. the tool id.
    pub name: String,
    /// Raw JSON arguments as emitted by the model.
    pub arguments: String,
}

/// A single message in the conversation history.
///
/// Histories are append-only within a request; messages are never mutated
/// after being pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<NativeToolCall>,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
        result: ToolResultEnvelope,
    },
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ConversationMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ConversationMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ConversationMessage::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> MessageRole {
        match self {
            ConversationMessage::System { .. } => MessageRole::System,
            ConversationMessage::User { .. } => MessageRole::User,
            ConversationMessage::Assistant { .. } => MessageRole::Assistant,
            ConversationMessage::Tool { .. } => MessageRole::Tool,
        }
    }

    /// Text content of the message as it would be sent to the model.
    ///
    /// Tool results are rendered as their JSON envelope.
    pub fn text(&self) -> String {
        match self {
            ConversationMessage::System { content }
            | ConversationMessage::User { content }
            | ConversationMessage::Assistant { content, .. } => content.clone(),
            ConversationMessage::Tool { result, .. } => {
                serde_json::to_string(result).unwrap_or_default()
            }
        }
    }
}

/// JSON-schema description of a callable tool, supplied by the tool host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema for the function parameters.
    pub parameters: serde_json::Value,
}

/// How the model may choose tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// Request to an LLM provider for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ConversationMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// Response from an LLM provider for a non-streaming completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub content: String,
    pub model: String,
    pub stop_reason: StopReason,
    #[serde(default)]
    pub tool_calls: Vec<NativeToolCall>,
    pub usage: Usage,
}

/// Reason why the LLM stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ContentFilter,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::ToolUse => write!(f, "tool_use"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::ContentFilter => write!(f, "content_filter"),
        }
    }
}

/// Token usage for a completion request/response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Errors from LLM provider operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {message}")]
    Provider { message: String },

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("max tokens exceeded: {0}")]
    MaxTokensExceeded(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// Whether this error belongs to the context-length / max-tokens class
    /// that the token fallback chain is allowed to recover from.
    pub fn is_token_overflow(&self) -> bool {
        match self {
            LlmError::ContextLengthExceeded(_) | LlmError::MaxTokensExceeded(_) => true,
            LlmError::Provider { message } | LlmError::InvalidRequest(message) => {
                looks_like_token_overflow(message)
            }
            _ => false,
        }
    }
}

/// Heuristic match on provider error text for token/context overflow.
///
/// Providers disagree on error codes, so the message text is the only
/// reliable signal.
pub fn looks_like_token_overflow(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "context length",
        "context_length",
        "context window",
        "maximum context",
        "max_tokens",
        "max tokens",
        "max_completion_tokens",
        "too many tokens",
        "token limit",
        "reduce the length",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_roundtrip() {
        for role in [
            MessageRole::System,
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
        ] {
            let parsed: MessageRole = role.to_string().parse().unwrap();
            assert_eq!(role, parsed);
        }
    }

    #[test]
    fn test_conversation_message_tagged_serde() {
        let msg = ConversationMessage::Tool {
            tool_call_id: "call_1".to_string(),
            tool_name: "http_fetch".to_string(),
            result: ToolResultEnvelope::failure("network error"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["result"]["success"], false);

        let back: ConversationMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.role(), MessageRole::Tool);
    }

    #[test]
    fn test_assistant_without_tool_calls_omits_field() {
        let json = serde_json::to_value(ConversationMessage::assistant("hi")).unwrap();
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_token_overflow_classification() {
        assert!(LlmError::ContextLengthExceeded("x".into()).is_token_overflow());
        assert!(LlmError::MaxTokensExceeded("x".into()).is_token_overflow());
        assert!(LlmError::Provider {
            message: "This model's maximum context length is 8192 tokens".into()
        }
        .is_token_overflow());
        assert!(LlmError::InvalidRequest("max_tokens is too large: 9000".into()).is_token_overflow());
        assert!(!LlmError::AuthenticationFailed.is_token_overflow());
        assert!(!LlmError::Provider {
            message: "HTTP 500: upstream exploded".into()
        }
        .is_token_overflow());
    }
}
