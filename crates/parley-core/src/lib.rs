//! Chat orchestration pipeline and collaborator traits for Parley.
//!
//! This crate turns one user message into a streamed assistant reply:
//! provider resolution, concurrent context gathering, the bounded
//! tool-calling loop with its token fallback chain, the streaming responder,
//! and post-response memory write-back.
//!
//! It defines the "ports" (collaborator traits) that `parley-infra`
//! implements and depends only on `parley-types` -- never on any database,
//! HTTP, or IO crate.

pub mod background;
pub mod chat;
pub mod clock;
pub mod context;
pub mod llm;
pub mod memory;
pub mod notify;
pub mod provider;
pub mod repository;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;
