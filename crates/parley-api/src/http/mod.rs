//! HTTP layer for Parley.
//!
//! Axum server exposing the streaming chat endpoint under `/api/v1/` with
//! the JSON error envelope, CORS and request tracing.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod router;
