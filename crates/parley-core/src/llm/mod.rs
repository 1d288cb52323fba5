//! LLM provider abstractions for Parley.
//!
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: object-safe wrapper for per-user runtime selection
//! - `TokenGuard`: output-budget estimation and clamping
//! - `TokenFallbackChain`: recovery tiers for token/context overflow

pub mod box_provider;
pub mod fallback;
pub mod provider;
pub mod token_guard;
