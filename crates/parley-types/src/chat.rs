//! Chat request and stream frame types for Parley.
//!
//! `ChatRequest` is the inbound body of the streaming endpoint; `StreamFrame`
//! is the fixed vocabulary of events written to the response channel.

use serde::{Deserialize, Serialize};

use crate::context::PriorTurn;
use crate::tool::ToolsSummary;

/// Inbound chat request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The user message. Required and non-blank.
    #[serde(default)]
    pub message: Option<String>,
    /// Prior turns supplied by the client.
    #[serde(default)]
    pub messages: Option<Vec<PriorTurn>>,
}

impl ChatRequest {
    /// Validate the request and return the trimmed user message.
    pub fn validate(&self) -> Result<&str, String> {
        match self.message.as_deref().map(str::trim) {
            None => Err("'message' is required".to_string()),
            Some("") => Err("'message' must not be empty".to_string()),
            Some(message) => Ok(message),
        }
    }
}

/// One event on the chat response channel.
///
/// Every response carries exactly one `Start` and exactly one `End`, with
/// `End` always last. Concatenating all `Token` payloads yields the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    Tools {
        data: ToolsSummary,
    },
    Token {
        data: String,
    },
    Error {
        data: String,
    },
    End {
        #[serde(rename = "messageId")]
        message_id: String,
    },
}

impl StreamFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamFrame::Start { .. } => "start",
            StreamFrame::Tools { .. } => "tools",
            StreamFrame::Token { .. } => "token",
            StreamFrame::Error { .. } => "error",
            StreamFrame::End { .. } => "end",
        }
    }
}
