//! Infrastructure layer for Parley.
//!
//! Contains implementations of the ports defined in `parley-core`: SQLite
//! storage for provider configuration, memories and conversation context,
//! the OpenAI-compatible HTTP provider, the HTTP tool gateway, and the
//! config file loader.

pub mod config;
pub mod llm;
pub mod notify;
pub mod sqlite;
pub mod tools;
