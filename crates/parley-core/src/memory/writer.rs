//! Memory write-back.
//!
//! Turns an analyzed exchange into a [`MemoryCandidate`] and persists it when
//! the assessment says to store it and the adjusted importance clears the
//! threshold. Tool statistics ride along as metadata and are never folded
//! into the stored text.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use parley_types::error::RepositoryError;
use parley_types::memory::{ExchangeAnalysis, MemoryCandidate, MemorySourceMetadata};
use parley_types::tool::ToolExecutionStats;

/// Write side of long-term memory (port).
pub trait MemorySink: Send + Sync {
    /// Persist a candidate and return its id.
    fn save_memory(
        &self,
        candidate: &MemoryCandidate,
    ) -> impl Future<Output = Result<String, RepositoryError>> + Send;
}

/// Read-only copy of a finished exchange, handed to background work.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExchange {
    pub user_id: String,
    pub correlation_id: String,
    pub user_message: String,
    pub assistant_message: String,
    pub tool_stats: ToolExecutionStats,
}

pub struct MemoryWriter<S> {
    sink: Arc<S>,
    threshold: f64,
}

impl<S: MemorySink> MemoryWriter<S> {
    pub fn new(sink: Arc<S>, threshold: f64) -> Self {
        Self { sink, threshold }
    }

    /// Decide whether (and what) to store. `None` means not worth keeping.
    pub fn build_candidate(
        &self,
        exchange: &CompletedExchange,
        analysis: &ExchangeAnalysis,
    ) -> Option<MemoryCandidate> {
        let assessment = &analysis.assessment;
        let score = assessment.adjusted_importance_score;
        if !assessment.should_store || score.is_nan() || score < self.threshold {
            return None;
        }

        let fact = assessment
            .extracted_fact
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());
        let content = match (assessment.is_factual_declaration, fact) {
            (true, Some(fact)) => fact.to_string(),
            _ => format!(
                "Q: {}\nA: {}",
                exchange.user_message, exchange.assistant_message
            ),
        };

        let classification = &analysis.classification;
        Some(MemoryCandidate {
            user_id: exchange.user_id.clone(),
            content,
            importance_score: score.clamp(0.0, 1.0),
            tags: assessment.tags.clone(),
            entities: classification.entities.clone(),
            source_metadata: MemorySourceMetadata {
                correlation_id: exchange.correlation_id.clone(),
                exchange_type: classification.kind.clone(),
                sentiment: classification.sentiment.clone(),
                topic: classification.topic.clone(),
                confidence: classification.confidence,
                is_factual_declaration: assessment.is_factual_declaration,
                tool_stats: exchange.tool_stats.clone(),
                created_at: Utc::now(),
            },
        })
    }

    /// Build and persist. Returns the stored memory id, if any.
    pub async fn write(
        &self,
        exchange: &CompletedExchange,
        analysis: &ExchangeAnalysis,
    ) -> Result<Option<String>, RepositoryError> {
        let Some(candidate) = self.build_candidate(exchange, analysis) else {
            debug!(
                user_id = %exchange.user_id,
                correlation_id = %exchange.correlation_id,
                score = analysis.assessment.adjusted_importance_score,
                should_store = analysis.assessment.should_store,
                "Exchange not worth storing"
            );
            return Ok(None);
        };

        let id = self.sink.save_memory(&candidate).await?;
        info!(
            user_id = %exchange.user_id,
            correlation_id = %exchange.correlation_id,
            memory_id = %id,
            importance = candidate.importance_score,
            "Stored memory"
        );
        Ok(Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::InMemoryMemory;
    use parley_types::memory::{ExchangeClassification, ValueAssessment};

    fn exchange() -> CompletedExchange {
        CompletedExchange {
            user_id: "u1".to_string(),
            correlation_id: "req-1".to_string(),
            user_message: "Il fait quel temps à Paris?".to_string(),
            assistant_message: "Désolé, je n'ai pas pu joindre le service météo.".to_string(),
            tool_stats: ToolExecutionStats {
                succeeded: 0,
                failed: 1,
                redactions: 2,
            },
        }
    }

    fn analysis(should_store: bool, score: f64, fact: Option<&str>) -> ExchangeAnalysis {
        ExchangeAnalysis {
            classification: ExchangeClassification {
                kind: "question".to_string(),
                topic: "weather".to_string(),
                entities: vec!["Paris".to_string()],
                ..Default::default()
            },
            assessment: ValueAssessment {
                should_store,
                is_factual_declaration: fact.is_some(),
                extracted_fact: fact.map(str::to_string),
                adjusted_importance_score: score,
                tags: vec!["weather".to_string()],
            },
        }
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        let sink = Arc::new(InMemoryMemory::default());
        let writer = MemoryWriter::new(sink.clone(), 0.3);

        assert_eq!(writer.write(&exchange(), &analysis(true, 0.29, None)).await.unwrap(), None);
        assert!(sink.saved().is_empty());

        assert!(writer.write(&exchange(), &analysis(true, 0.30, None)).await.unwrap().is_some());
        assert_eq!(sink.saved().len(), 1);
    }

    #[tokio::test]
    async fn test_should_store_false_is_never_written() {
        let sink = Arc::new(InMemoryMemory::default());
        let writer = MemoryWriter::new(sink.clone(), 0.3);
        assert_eq!(writer.write(&exchange(), &analysis(false, 0.95, None)).await.unwrap(), None);
        assert!(sink.saved().is_empty());
    }

    #[test]
    fn test_content_choice_and_metadata() {
        let writer = MemoryWriter::new(Arc::new(InMemoryMemory::default()), 0.3);

        let qa = writer.build_candidate(&exchange(), &analysis(true, 0.5, None)).unwrap();
        assert!(qa.content.starts_with("Q: Il fait quel temps à Paris?\nA: "));
        assert_eq!(qa.source_metadata.tool_stats.failed, 1);
        assert_eq!(qa.source_metadata.tool_stats.redactions, 2);
        assert!(!qa.content.contains("failed"));
        assert_eq!(qa.entities, vec!["Paris"]);

        let fact = writer
            .build_candidate(&exchange(), &analysis(true, 0.7, Some("The user lives in Paris")))
            .unwrap();
        assert_eq!(fact.content, "The user lives in Paris");
        assert!(fact.source_metadata.is_factual_declaration);
    }
}
