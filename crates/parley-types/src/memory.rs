//! Memory types for Parley.
//!
//! Covers both sides of long-term memory: search results consumed while
//! building context, and the analysis + candidate records produced after a
//! response has been delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolExecutionStats;

/// A single memory returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub id: String,
    pub content: String,
    /// Relevance in `0.0..=1.0`.
    pub score: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Outcome of a memory search.
///
/// An empty `results` with `error: None` means nothing matched; an empty
/// `results` with `error: Some(_)` means the memory subsystem was unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchResult {
    pub results: Vec<MemoryHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MemorySearchResult {
    pub fn found(results: Vec<MemoryHit>) -> Self {
        Self {
            results,
            error: None,
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// How the analyzer classified an exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeClassification {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// The analyzer's judgement of an exchange's long-term value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueAssessment {
    #[serde(default)]
    pub should_store: bool,
    #[serde(default)]
    pub is_factual_declaration: bool,
    /// The fact stated by the user, when `is_factual_declaration` is set.
    #[serde(default)]
    pub extracted_fact: Option<String>,
    #[serde(default)]
    pub adjusted_importance_score: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Combined output of the single post-response analysis call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeAnalysis {
    pub classification: ExchangeClassification,
    pub assessment: ValueAssessment,
}

/// Structured metadata stored next to a memory's text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySourceMetadata {
    pub correlation_id: String,
    pub exchange_type: String,
    pub sentiment: String,
    pub topic: String,
    pub confidence: f64,
    pub is_factual_declaration: bool,
    pub tool_stats: ToolExecutionStats,
    pub created_at: DateTime<Utc>,
}

/// A memory worth persisting, produced only by the post-response analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub user_id: String,
    pub content: String,
    pub importance_score: f64,
    pub tags: Vec<String>,
    pub entities: Vec<String>,
    pub source_metadata: MemorySourceMetadata,
}
