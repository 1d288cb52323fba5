//! Shared domain types for Parley.
//!
//! This crate contains the domain types that flow through the chat pipeline:
//! provider configuration, conversation messages, tool calls, memory records,
//! stream frames, flow traces, configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod memory;
pub mod provider;
pub mod tool;
pub mod trace;
