//! Tool-call detection and execution.
//!
//! Tool calls reach the loop in two encodings (native function calls and
//! `toolName{...}` text). [`parser`] finds the textual ones, [`normalize`]
//! turns either encoding into a `ToolCallRequest`, and [`runner`] executes
//! them through the [`host::ToolHost`] collaborator, sanitizing every result.

pub mod host;
pub mod normalize;
pub mod parser;
pub mod runner;
pub mod sanitize;
