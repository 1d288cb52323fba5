//! Bounded tool-calling loop.
//!
//! Each iteration sends the whole history plus the user's tool schemas to the
//! model (non-streaming, `tool_choice = auto`). Native tool calls are used as
//! returned; otherwise the answer text is scanned for `toolName{...}` calls.
//! Detected calls are normalized, executed, sanitized and appended as `tool`
//! messages, and the loop goes round again. A reply with no tool call is the
//! final answer.
//!
//! The loop is bounded by `max_iterations` model round-trips. Hitting the
//! ceiling is a soft failure: the last answer text seen (possibly empty) is
//! returned and the outcome is flagged `exhausted`.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use parley_types::config::{LlmConfig, OrchestratorConfig};
use parley_types::llm::{ConversationMessage, LlmError, ToolSchema};
use parley_types::provider::{ProviderConfig, ProviderEndpoint};
use parley_types::tool::{ToolCallEncoding, ToolExecutionResult, ToolExecutionStats};
use parley_types::trace::{FlowTrace, StageStatus};

use crate::llm::fallback::{CallOutcome, CallParams, FallbackState, ModelTarget, ProviderSet, TokenFallbackChain};
use crate::llm::provider::LlmProviderFactory;
use crate::notify::Notifier;
use crate::tools::host::ToolHost;
use crate::tools::normalize::normalize;
use crate::tools::parser::{extract_textual_tool_calls, strip_tool_calls};
use crate::tools::runner::{ExecutedCall, ToolRunner, stats_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ToolDetectedNative,
    ToolDetectedTextual,
    Done,
    Aborted,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::AwaitingModel => write!(f, "awaiting_model"),
            LoopState::ToolDetectedNative => write!(f, "tool_detected_native"),
            LoopState::ToolDetectedTextual => write!(f, "tool_detected_textual"),
            LoopState::Done => write!(f, "done"),
            LoopState::Aborted => write!(f, "aborted"),
        }
    }
}

/// What the loop produced.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub final_text: String,
    /// Sanitized results of every tool call, in execution order.
    pub tool_results: Vec<ToolExecutionResult>,
    pub tool_stats: ToolExecutionStats,
    /// Completed model round-trips.
    pub iterations: u32,
    /// The iteration ceiling was reached before a final answer.
    pub exhausted: bool,
    pub history: Vec<ConversationMessage>,
}

pub struct ConversationOrchestrator<F, T, N> {
    factory: Arc<F>,
    runner: ToolRunner<T>,
    chain: TokenFallbackChain<N>,
    config: OrchestratorConfig,
    llm: LlmConfig,
}

impl<F, T, N> ConversationOrchestrator<F, T, N>
where
    F: LlmProviderFactory,
    T: ToolHost,
    N: Notifier,
{
    pub fn new(
        factory: Arc<F>,
        runner: ToolRunner<T>,
        chain: TokenFallbackChain<N>,
        config: OrchestratorConfig,
        llm: LlmConfig,
    ) -> Self {
        Self {
            factory,
            runner,
            chain,
            config,
            llm,
        }
    }

    /// Build the provider set for a resolved config. A fallback whose client
    /// cannot be built is dropped; the primary failing is an error.
    pub fn providers_for(&self, config: &ProviderConfig) -> Result<ProviderSet, LlmError> {
        let primary = self.target(&config.primary)?;
        let fallback = match &config.fallback {
            Some(endpoint) => match self.target(endpoint) {
                Ok(target) => Some(target),
                Err(e) => {
                    warn!(provider = %endpoint.name, error = %e, "Fallback provider unavailable");
                    None
                }
            },
            None => None,
        };
        Ok(ProviderSet { primary, fallback })
    }

    fn target(&self, endpoint: &ProviderEndpoint) -> Result<ModelTarget, LlmError> {
        Ok(ModelTarget {
            provider: self.factory.create(endpoint)?,
            model_id: endpoint.model_id.clone(),
            limits: self.chain.guard().limits_for(&endpoint.model_id),
        })
    }

    async fn tool_schemas(&self, user_id: &str) -> Vec<ToolSchema> {
        match self.runner.host().list_tools(user_id).await {
            Ok(schemas) => schemas,
            Err(e) => {
                warn!(user_id, error = %e, "Tool schemas unavailable, continuing without tools");
                Vec::new()
            }
        }
    }

    /// Run the loop for `messages` (system prompt, prior turns, user message).
    pub async fn run(
        &self,
        user_id: &str,
        provider: &ProviderConfig,
        mut messages: Vec<ConversationMessage>,
        trace: &mut FlowTrace,
    ) -> Result<LoopOutcome, LlmError> {
        let providers = self.providers_for(provider)?;
        let schemas = self.tool_schemas(user_id).await;
        let params = CallParams {
            user_id,
            tools: &schemas,
            temperature: Some(self.llm.temperature),
            requested_max_tokens: self.llm.default_max_tokens,
        };

        let mut state = LoopState::AwaitingModel;
        let mut fallback_state = FallbackState::default();
        let mut iterations = 0;
        let mut full_response = String::new();
        let mut executed: Vec<ExecutedCall> = Vec::new();

        while iterations < self.config.max_iterations {
            debug_assert_eq!(state, LoopState::AwaitingModel);
            let started = Instant::now();

            let outcome = match self
                .chain
                .complete(&providers, &mut fallback_state, &messages, params)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    state = LoopState::Aborted;
                    warn!(user_id, iteration = iterations + 1, state = %state, error = %e, "Model call failed");
                    trace.step(
                        "model_call",
                        "orchestrator",
                        StageStatus::Failed,
                        started.elapsed().as_millis() as u64,
                        Some(e.to_string()),
                    );
                    return Err(e);
                }
            };

            let (response, tier) = match outcome {
                CallOutcome::RetryWithHistory(truncated) => {
                    trace.step(
                        "history_truncation",
                        "token_guard",
                        StageStatus::Degraded,
                        started.elapsed().as_millis() as u64,
                        Some(format!("{} -> {} messages", messages.len(), truncated.len())),
                    );
                    messages = truncated;
                    continue;
                }
                CallOutcome::Completed { response, tier, .. } => (response, tier),
            };
            iterations += 1;

            let content = response.content;
            let textual = if response.tool_calls.is_empty() {
                extract_textual_tool_calls(&content, &self.config.textual_tool_names)
            } else {
                Vec::new()
            };

            state = if !response.tool_calls.is_empty() {
                LoopState::ToolDetectedNative
            } else if !textual.is_empty() {
                LoopState::ToolDetectedTextual
            } else {
                LoopState::Done
            };

            trace.step(
                "model_call",
                "orchestrator",
                StageStatus::Completed,
                started.elapsed().as_millis() as u64,
                Some(format!("iteration {iterations}: {state} via {tier}")),
            );

            match state {
                LoopState::ToolDetectedNative => {
                    full_response = content.clone();
                    let calls: Vec<_> = response
                        .tool_calls
                        .iter()
                        .map(|call| {
                            let request = normalize(&ToolCallEncoding::Native(call.clone()), call.id.clone());
                            (call.id.clone(), request)
                        })
                        .collect();
                    info!(user_id, iteration = iterations, count = calls.len(), "Executing native tool calls");

                    messages.push(ConversationMessage::Assistant {
                        content,
                        tool_calls: response.tool_calls,
                    });
                    let batch = self.runner.run_parallel(user_id, calls).await;
                    append_results(&mut messages, &batch);
                    executed.extend(batch);
                }
                LoopState::ToolDetectedTextual => {
                    full_response = strip_tool_calls(&content, &textual);
                    let batch_id = format!("text-{}", Uuid::new_v4());
                    let calls: Vec<_> = textual
                        .into_iter()
                        .enumerate()
                        .map(|(index, call)| {
                            let call_id = format!("{batch_id}-{index}");
                            let request = normalize(&ToolCallEncoding::Textual(call), call_id.clone());
                            (call_id, request)
                        })
                        .collect();
                    info!(user_id, iteration = iterations, count = calls.len(), batch_id = %batch_id, "Executing textual tool calls");

                    messages.push(ConversationMessage::assistant(content));
                    let batch = self.runner.run_sequential(user_id, calls).await;
                    append_results(&mut messages, &batch);
                    executed.extend(batch);
                }
                LoopState::Done => {
                    full_response = content;
                    break;
                }
                LoopState::AwaitingModel | LoopState::Aborted => {}
            }

            state = LoopState::AwaitingModel;
        }

        let exhausted = state != LoopState::Done;
        if exhausted {
            warn!(
                user_id,
                iterations,
                tool_calls = executed.len(),
                "Tool loop reached its iteration ceiling, returning last answer"
            );
            trace.step(
                "tool_loop",
                "orchestrator",
                StageStatus::Degraded,
                0,
                Some("iteration ceiling reached".to_string()),
            );
        }

        let tool_stats = stats_for(&executed);
        Ok(LoopOutcome {
            final_text: full_response,
            tool_results: executed.into_iter().map(|e| e.result).collect(),
            tool_stats,
            iterations,
            exhausted,
            history: messages,
        })
    }
}

fn append_results(messages: &mut Vec<ConversationMessage>, batch: &[ExecutedCall]) {
    for call in batch {
        messages.push(ConversationMessage::Tool {
            tool_call_id: call.call_id.clone(),
            tool_name: call.request.tool_id.clone(),
            result: call.result.envelope(),
        });
    }
}
