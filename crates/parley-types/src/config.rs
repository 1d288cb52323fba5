//! Configuration types for Parley.
//!
//! `ParleyConfig` represents the top-level `config.toml`. Every section and
//! every field has a default, so an empty or partial file is valid.

use serde::{Deserialize, Serialize};

use crate::provider::ModelLimits;

/// Top-level configuration for the Parley server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub orchestrator: OrchestratorConfig,
    pub provider_cache: ProviderCacheConfig,
    pub token_guard: TokenGuardConfig,
    pub streaming: StreamingConfig,
    pub memory: MemoryConfig,
    pub tools: ToolsConfig,
    /// Per-model token limits, overriding the built-in table.
    pub model_limits: Vec<ModelLimitOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub temperature: f64,
    /// Output budget requested before clamping.
    pub default_max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            default_max_tokens: 4096,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Ceiling on model round-trips per request.
    pub max_iterations: u32,
    pub tool_call_timeout_ms: u64,
    pub tool_batch_timeout_ms: u64,
    /// Tool names recognised in the `toolName{...}` textual encoding.
    pub textual_tool_names: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            tool_call_timeout_ms: 7_000,
            tool_batch_timeout_ms: 60_000,
            textual_tool_names: [
                "http_fetch",
                "web_search",
                "calendar",
                "reminders",
                "notes",
                "weather",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCacheConfig {
    pub ttl_secs: u64,
}

impl Default for ProviderCacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenGuardConfig {
    /// Characters of each message counted toward the estimate.
    pub message_char_window: usize,
    pub chars_per_token: usize,
    pub safety_margin_tokens: u32,
    /// History length above which truncation is allowed.
    pub truncate_threshold: usize,
    /// Messages kept (besides the system message) after truncation.
    pub truncate_keep_recent: usize,
}

impl Default for TokenGuardConfig {
    fn default() -> Self {
        Self {
            message_char_window: 2_000,
            chars_per_token: 4,
            safety_margin_tokens: 256,
            truncate_threshold: 10,
            truncate_keep_recent: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub chunk_chars: usize,
    pub chunk_delay_ms: u64,
    pub channel_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 5,
            chunk_delay_ms: 15,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Minimum adjusted importance score for a memory to be stored.
    pub importance_threshold: f64,
    pub search_limit: usize,
    pub prefetch_ttl_secs: u64,
    pub prefetch_max_queries: usize,
    /// Turns kept in the cached conversation context.
    pub conversation_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            importance_threshold: 0.3,
            search_limit: 8,
            prefetch_ttl_secs: 120,
            prefetch_max_queries: 3,
            conversation_window: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Base URL of the HTTP tool gateway. Without it no tools are offered.
    pub gateway_url: Option<String>,
}

/// Token limits for models matching `model_pattern`.
///
/// A trailing `*` makes the pattern a prefix match; otherwise it must match
/// the model id exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelLimitOverride {
    pub model_pattern: String,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub conservative_ceiling: u32,
}

impl ModelLimitOverride {
    pub fn matches(&self, model_id: &str) -> bool {
        match self.model_pattern.strip_suffix('*') {
            Some(prefix) => model_id.starts_with(prefix),
            None => model_id == self.model_pattern,
        }
    }

    pub fn limits(&self) -> ModelLimits {
        ModelLimits {
            context_window: self.context_window,
            max_output_tokens: self.max_output_tokens,
            conservative_ceiling: self.conservative_ceiling,
        }
    }
}
