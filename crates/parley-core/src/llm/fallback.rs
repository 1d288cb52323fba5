//! Token-overflow fallback chain.
//!
//! Every model call in the tool loop goes through [`TokenFallbackChain`].
//! Non-overflow errors propagate untouched. When the endpoint rejects a call
//! for context-length / max-token reasons, the chain applies its tiers in
//! strict order until one succeeds:
//!
//! 1. alternate provider, budget `min(fallback ceiling, current budget)`
//! 2. history truncation (system message + most recent messages); the caller
//!    re-enters its loop with the shorter history
//! 3. primary provider at its conservative ceiling
//!
//! If every tier fails, the error that triggered the chain is returned.

use std::fmt;
use std::sync::Arc;

use tracing::{Instrument, info, info_span, warn};

use parley_types::llm::{
    CompletionRequest, CompletionResponse, ConversationMessage, LlmError, ToolChoice, ToolSchema,
};
use parley_types::provider::ModelLimits;

use crate::notify::{Notifier, UserNotice};

use super::box_provider::BoxLlmProvider;
use super::token_guard::TokenGuard;

/// One callable model: a provider client bound to a model id and its limits.
#[derive(Debug)]
pub struct ModelTarget {
    pub provider: BoxLlmProvider,
    pub model_id: String,
    pub limits: ModelLimits,
}

/// The primary model and the optional overflow fallback for one request.
#[derive(Debug)]
pub struct ProviderSet {
    pub primary: ModelTarget,
    pub fallback: Option<ModelTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackTier {
    Primary,
    AlternateProvider,
    AggressiveCeiling,
}

impl fmt::Display for FallbackTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackTier::Primary => write!(f, "primary"),
            FallbackTier::AlternateProvider => write!(f, "alternate_provider"),
            FallbackTier::AggressiveCeiling => write!(f, "aggressive_ceiling"),
        }
    }
}

/// Per-request memory of which tiers are spent.
#[derive(Debug, Default, Clone)]
pub struct FallbackState {
    /// The alternate provider overflowed too; skip it from now on.
    pub alternate_exhausted: bool,
    /// History has already been truncated once.
    pub truncated: bool,
}

/// Result of one guarded model call.
#[derive(Debug)]
pub enum CallOutcome {
    Completed {
        response: CompletionResponse,
        tier: FallbackTier,
        max_tokens: u32,
    },
    /// Truncation tier: retry the iteration with this shorter history.
    RetryWithHistory(Vec<ConversationMessage>),
}

/// Inputs for one model call that stay fixed across tiers.
#[derive(Debug, Clone, Copy)]
pub struct CallParams<'a> {
    pub user_id: &'a str,
    pub tools: &'a [ToolSchema],
    pub temperature: Option<f64>,
    pub requested_max_tokens: u32,
}

pub struct TokenFallbackChain<N> {
    guard: TokenGuard,
    notifier: Arc<N>,
}

impl<N: Notifier> TokenFallbackChain<N> {
    pub fn new(guard: TokenGuard, notifier: Arc<N>) -> Self {
        Self { guard, notifier }
    }

    pub fn guard(&self) -> &TokenGuard {
        &self.guard
    }

    /// Run one model call for `messages`, applying the overflow tiers.
    pub async fn complete(
        &self,
        providers: &ProviderSet,
        state: &mut FallbackState,
        messages: &[ConversationMessage],
        params: CallParams<'_>,
    ) -> Result<CallOutcome, LlmError> {
        let primary = &providers.primary;
        let budget = self
            .guard
            .clamp(params.requested_max_tokens, messages, primary.limits);

        let original = match call(primary, messages, &params, budget, FallbackTier::Primary).await {
            Ok(response) => {
                return Ok(CallOutcome::Completed {
                    response,
                    tier: FallbackTier::Primary,
                    max_tokens: budget,
                });
            }
            Err(e) if e.is_token_overflow() => e,
            Err(e) => return Err(e),
        };

        warn!(
            user_id = params.user_id,
            model = %primary.model_id,
            max_tokens = budget,
            error = %original,
            "Token overflow, entering fallback chain"
        );

        if let Some(alternate) = providers.fallback.as_ref().filter(|_| !state.alternate_exhausted) {
            let alt_budget = alternate.limits.conservative_ceiling.min(budget);
            self.notify_if_significant(params.user_id, budget, alt_budget, FallbackTier::AlternateProvider)
                .await;
            match call(alternate, messages, &params, alt_budget, FallbackTier::AlternateProvider).await {
                Ok(response) => {
                    info!(
                        user_id = params.user_id,
                        tier = %FallbackTier::AlternateProvider,
                        model = %alternate.model_id,
                        "Fallback tier succeeded"
                    );
                    return Ok(CallOutcome::Completed {
                        response,
                        tier: FallbackTier::AlternateProvider,
                        max_tokens: alt_budget,
                    });
                }
                Err(e) => {
                    if e.is_token_overflow() {
                        state.alternate_exhausted = true;
                    }
                    warn!(user_id = params.user_id, tier = %FallbackTier::AlternateProvider, error = %e, "Fallback tier failed");
                }
            }
        }

        if !state.truncated && self.guard.can_truncate(messages) {
            state.truncated = true;
            let truncated = self.guard.truncate(messages);
            info!(
                user_id = params.user_id,
                tier = "history_truncation",
                from = messages.len(),
                to = truncated.len(),
                "Truncating history and retrying"
            );
            return Ok(CallOutcome::RetryWithHistory(truncated));
        }

        let ceiling = primary.limits.conservative_ceiling.min(budget);
        self.notify_if_significant(params.user_id, budget, ceiling, FallbackTier::AggressiveCeiling)
            .await;
        match call(primary, messages, &params, ceiling, FallbackTier::AggressiveCeiling).await {
            Ok(response) => {
                info!(
                    user_id = params.user_id,
                    tier = %FallbackTier::AggressiveCeiling,
                    max_tokens = ceiling,
                    "Fallback tier succeeded"
                );
                Ok(CallOutcome::Completed {
                    response,
                    tier: FallbackTier::AggressiveCeiling,
                    max_tokens: ceiling,
                })
            }
            Err(e) => {
                warn!(user_id = params.user_id, tier = %FallbackTier::AggressiveCeiling, error = %e, "All fallback tiers exhausted");
                Err(original)
            }
        }
    }

    /// Notify only when the budget is cut by more than half.
    async fn notify_if_significant(&self, user_id: &str, from: u32, to: u32, tier: FallbackTier) {
        if to.saturating_mul(2) >= from {
            return;
        }
        let notice = UserNotice {
            title: "Response length reduced".to_string(),
            body: format!(
                "Your conversation is too long for the model's context window. \
                 This reply is limited to {to} tokens (was {from})."
            ),
        };
        if let Err(e) = self.notifier.notify(user_id, &notice).await {
            warn!(user_id, tier = %tier, error = %e, "Failed to notify user about fallback");
        }
    }
}

async fn call(
    target: &ModelTarget,
    messages: &[ConversationMessage],
    params: &CallParams<'_>,
    max_tokens: u32,
    tier: FallbackTier,
) -> Result<CompletionResponse, LlmError> {
    let request = CompletionRequest {
        model: target.model_id.clone(),
        messages: messages.to_vec(),
        max_tokens,
        temperature: params.temperature,
        tools: params.tools.to_vec(),
        tool_choice: (!params.tools.is_empty()).then_some(ToolChoice::Auto),
    };

    let span = info_span!(
        "gen_ai.complete",
        gen_ai.system = target.provider.name(),
        gen_ai.request.model = %request.model,
        gen_ai.request.max_tokens = request.max_tokens,
        gen_ai.request.temperature = ?request.temperature,
        gen_ai.request.stream = false,
        parley.fallback.tier = %tier,
    );

    target.provider.complete(&request).instrument(span).await
}
