//! OpenAI-compatible LLM provider implementation.
//!
//! A single [`OpenAiCompatibleProvider`] serves every endpoint that speaks the
//! chat completions protocol (OpenAI, Groq, Mistral, OpenRouter, local
//! servers) through a configurable base URL. Calls are non-streaming.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is only exposed
//! when building the `Authorization` header.

pub mod types;

use std::collections::HashSet;
use std::time::Instant;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use parley_core::llm::provider::LlmProvider;
use parley_types::llm::{
    CompletionRequest, CompletionResponse, ConversationMessage, LlmError, NativeToolCall, StopReason,
    ToolChoice, Usage, looks_like_token_overflow,
};
use parley_types::provider::ProviderEndpoint;

use self::types::{
    ChatCompletionRequest, ChatCompletionResponse, ErrorEnvelope, WireFunction, WireFunctionCall,
    WireMessage, WireTool, WireToolCall,
};

/// Unified provider for any OpenAI-compatible API.
///
/// Does NOT derive Debug so the key can never end up in a log line.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    provider_name: String,
}

impl OpenAiCompatibleProvider {
    /// Build a provider for `endpoint`, sharing `client`'s connection pool.
    pub fn new(client: reqwest::Client, endpoint: &ProviderEndpoint) -> Self {
        Self {
            client,
            api_key: SecretString::from(endpoint.api_key.clone()),
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            provider_name: endpoint.name.clone(),
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: to_wire_messages(&request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
            tool_choice: request.tool_choice.map(|c| match c {
                ToolChoice::Auto => "auto",
                ToolChoice::None => "none",
            }),
            stream: false,
        }
    }
}

/// Convert the conversation into wire messages.
///
/// A `tool` message must answer a native call id announced by an earlier
/// assistant message. Results of textual calls have no such id, so they are
/// sent as user-role observations instead.
pub fn to_wire_messages(messages: &[ConversationMessage]) -> Vec<WireMessage> {
    let mut native_ids: HashSet<&str> = HashSet::new();
    let mut wire = Vec::with_capacity(messages.len());

    for message in messages {
        match message {
            ConversationMessage::System { content } => wire.push(WireMessage::text("system", content.clone())),
            ConversationMessage::User { content } => wire.push(WireMessage::text("user", content.clone())),
            ConversationMessage::Assistant { content, tool_calls } => {
                native_ids.extend(tool_calls.iter().map(|c| c.id.as_str()));
                wire.push(WireMessage {
                    role: "assistant",
                    content: (!content.is_empty() || tool_calls.is_empty()).then(|| content.clone()),
                    tool_calls: tool_calls
                        .iter()
                        .map(|c| WireToolCall {
                            id: c.id.clone(),
                            kind: "function".to_string(),
                            function: WireFunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                        .collect(),
                    tool_call_id: None,
                });
            }
            ConversationMessage::Tool {
                tool_call_id,
                tool_name,
                result,
            } => {
                let payload = serde_json::to_string(result).unwrap_or_default();
                if native_ids.contains(tool_call_id.as_str()) {
                    wire.push(WireMessage {
                        role: "tool",
                        content: Some(payload),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(tool_call_id.clone()),
                    });
                } else {
                    wire.push(WireMessage::text(
                        "user",
                        format!("[tool result: {tool_name}]\n{payload}"),
                    ));
                }
            }
        }
    }
    wire
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::ContentFilter,
        _ => StopReason::EndTurn,
    }
}

/// Map a non-success HTTP response to an [`LlmError`].
pub fn map_http_error(status: StatusCode, body: &str, retry_after_secs: Option<u64>) -> LlmError {
    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (
            envelope.error.message,
            envelope.error.code.and_then(|c| c.as_str().map(str::to_string)),
        ),
        Err(_) => (body.to_string(), None),
    };

    if code.as_deref() == Some("context_length_exceeded") {
        return LlmError::ContextLengthExceeded(message);
    }

    match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited {
            retry_after_ms: retry_after_secs.map(|s| s * 1000),
        },
        400 | 413 | 422 if looks_like_token_overflow(&message) => LlmError::ContextLengthExceeded(message),
        400 | 422 => LlmError::InvalidRequest(message),
        503 | 529 => LlmError::Overloaded(message),
        _ => LlmError::Provider {
            message: format!("HTTP {status}: {message}"),
        },
    }
}

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(request);
        let started = Instant::now();

        let response = self
            .client
            .post(self.url())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &error_body, retry_after));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Deserialization("response has no choices".to_string()))?;
        let usage = parsed.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });

        debug!(
            provider = %self.provider_name,
            model = %parsed.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            id: parsed.id,
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model,
            stop_reason: map_stop_reason(choice.finish_reason.as_deref()),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|c| NativeToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect(),
            usage,
        })
    }
}
