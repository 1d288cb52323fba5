//! Output-token budget guard.
//!
//! Before every LLM call the guard estimates how many tokens the message list
//! occupies and clamps the requested output budget so that prompt + output
//! fits the model's context window. The estimate is deliberately bounded:
//! each message contributes at most `message_char_window` characters, so a
//! huge tool payload cannot blow the estimate up on its own.

use parley_types::config::{ModelLimitOverride, TokenGuardConfig};
use parley_types::llm::{ConversationMessage, MessageRole};
use parley_types::provider::ModelLimits;

/// Per-message framing overhead (role markers, separators).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Smallest output budget ever requested.
const MIN_OUTPUT_TOKENS: u32 = 16;

/// Built-in limits, checked in order. A trailing `*` is a prefix match.
const BUILTIN_LIMITS: &[(&str, ModelLimits)] = &[
    ("gpt-4o*", limits(128_000, 16_384, 1_024)),
    ("gpt-4.1*", limits(1_047_576, 32_768, 2_048)),
    ("gpt-4-turbo*", limits(128_000, 4_096, 1_024)),
    ("gpt-4*", limits(8_192, 4_096, 512)),
    ("gpt-3.5*", limits(16_385, 4_096, 512)),
    ("o1*", limits(200_000, 100_000, 2_048)),
    ("o3*", limits(200_000, 100_000, 2_048)),
    ("o4*", limits(200_000, 100_000, 2_048)),
    ("claude*", limits(200_000, 8_192, 1_024)),
    ("mistral*", limits(32_768, 4_096, 512)),
    ("mixtral*", limits(32_768, 4_096, 512)),
    ("llama*", limits(8_192, 2_048, 512)),
    ("gemma*", limits(8_192, 2_048, 512)),
];

const DEFAULT_LIMITS: ModelLimits = limits(8_192, 2_048, 512);

const fn limits(context_window: u32, max_output_tokens: u32, conservative_ceiling: u32) -> ModelLimits {
    ModelLimits {
        context_window,
        max_output_tokens,
        conservative_ceiling,
    }
}

fn pattern_matches(pattern: &str, model_id: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => model_id.starts_with(prefix),
        None => model_id == pattern,
    }
}

#[derive(Debug, Clone)]
pub struct TokenGuard {
    config: TokenGuardConfig,
    overrides: Vec<ModelLimitOverride>,
}

impl TokenGuard {
    pub fn new(config: TokenGuardConfig, overrides: Vec<ModelLimitOverride>) -> Self {
        Self { config, overrides }
    }

    /// Look up the limits for a model: configured overrides first, then the
    /// built-in table, then a small default.
    pub fn limits_for(&self, model_id: &str) -> ModelLimits {
        let model = model_id.to_lowercase();
        if let Some(o) = self.overrides.iter().find(|o| o.matches(&model)) {
            return o.limits();
        }
        BUILTIN_LIMITS
            .iter()
            .find(|(pattern, _)| pattern_matches(pattern, &model))
            .map(|(_, l)| *l)
            .unwrap_or(DEFAULT_LIMITS)
    }

    /// Bounded token estimate for a message list.
    pub fn estimate_tokens(&self, messages: &[ConversationMessage]) -> u32 {
        let per_token = self.config.chars_per_token.max(1);
        messages
            .iter()
            .map(|m| {
                let chars = m.text().chars().take(self.config.message_char_window).count();
                chars.div_ceil(per_token) as u32 + MESSAGE_OVERHEAD_TOKENS
            })
            .sum()
    }

    /// Clamp `requested` so that prompt + output fits the context window.
    pub fn clamp(&self, requested: u32, messages: &[ConversationMessage], limits: ModelLimits) -> u32 {
        let available = limits
            .context_window
            .saturating_sub(self.estimate_tokens(messages))
            .saturating_sub(self.config.safety_margin_tokens);
        requested
            .min(limits.max_output_tokens)
            .min(available)
            .max(MIN_OUTPUT_TOKENS)
    }

    /// Whether the history is long enough for the truncation tier.
    pub fn can_truncate(&self, messages: &[ConversationMessage]) -> bool {
        messages.len() > self.config.truncate_threshold
    }

    /// Keep the system message plus the most recent messages.
    pub fn truncate(&self, messages: &[ConversationMessage]) -> Vec<ConversationMessage> {
        let system = messages.iter().find(|m| m.role() == MessageRole::System);
        let rest: Vec<&ConversationMessage> = messages
            .iter()
            .filter(|m| m.role() != MessageRole::System)
            .collect();
        let keep_from = rest.len().saturating_sub(self.config.truncate_keep_recent);

        system
            .into_iter()
            .chain(rest[keep_from..].iter().copied())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> TokenGuard {
        TokenGuard::new(TokenGuardConfig::default(), Vec::new())
    }

    #[test]
    fn test_estimate_caps_each_message() {
        let g = guard();
        let small = vec![ConversationMessage::user("a".repeat(400))];
        assert_eq!(g.estimate_tokens(&small), 100 + MESSAGE_OVERHEAD_TOKENS);

        // 50k chars count as the 2000-char window only.
        let huge = vec![ConversationMessage::user("x".repeat(50_000))];
        assert_eq!(g.estimate_tokens(&huge), 500 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_clamp_respects_window_and_max_output() {
        let g = guard();
        let messages = vec![ConversationMessage::user("hello")];
        let l = limits(8_192, 2_048, 512);
        assert_eq!(g.clamp(4_096, &messages, l), 2_048);
        assert_eq!(g.clamp(1_000, &messages, l), 1_000);

        let tiny = limits(600, 4_096, 128);
        // 600 - (2 + 4) - 256 = 338
        assert_eq!(g.clamp(4_096, &messages, tiny), 338);

        let full = limits(100, 4_096, 64);
        assert_eq!(g.clamp(4_096, &messages, full), MIN_OUTPUT_TOKENS);
    }

    #[test]
    fn test_limits_lookup_prefers_overrides() {
        let g = TokenGuard::new(
            TokenGuardConfig::default(),
            vec![ModelLimitOverride {
                model_pattern: "gpt-4o-mini".to_string(),
                context_window: 1_000,
                max_output_tokens: 100,
                conservative_ceiling: 10,
            }],
        );
        assert_eq!(g.limits_for("gpt-4o-mini").context_window, 1_000);
        assert_eq!(g.limits_for("gpt-4o").context_window, 128_000);
        assert_eq!(g.limits_for("gpt-4-0613").context_window, 8_192);
        assert_eq!(g.limits_for("Llama3-70B").max_output_tokens, 2_048);
        assert_eq!(g.limits_for("some-unknown-model"), DEFAULT_LIMITS);
    }

    #[test]
    fn test_truncate_keeps_system_and_recent() {
        let g = guard();
        let mut messages = vec![ConversationMessage::system("sys")];
        for i in 0..12 {
            messages.push(ConversationMessage::user(format!("m{i}")));
        }
        assert!(g.can_truncate(&messages));

        let truncated = g.truncate(&messages);
        assert_eq!(truncated.len(), 5);
        assert_eq!(truncated[0].role(), MessageRole::System);
        assert_eq!(truncated[1].text(), "m8");
        assert_eq!(truncated[4].text(), "m11");
        assert!(!g.can_truncate(&truncated));
    }
}
