//! Post-response exchange analysis via LLM.
//!
//! `ExchangeAnalyzer` makes one model call that jointly classifies an
//! exchange (type, sentiment, topic, entities, confidence) and assesses its
//! long-term value (store or not, factual declaration, adjusted importance).
//! Entity and sentiment extraction is the model's job; Parley only parses
//! the verdict.

use tracing::{Instrument, info_span};

use parley_types::llm::{CompletionRequest, ConversationMessage, LlmError};
use parley_types::memory::ExchangeAnalysis;

use crate::llm::box_provider::BoxLlmProvider;
use crate::tools::parser::find_json_end;

const ANALYSIS_SYSTEM_PROMPT: &str = r#"You analyze one exchange between a user and an assistant and decide whether it is worth remembering about the user in future conversations.

Return ONLY a JSON object with exactly this shape:
{
  "classification": {
    "type": "question" | "factual_declaration" | "request" | "small_talk" | "other",
    "sentiment": "positive" | "neutral" | "negative",
    "topic": string,
    "entities": [string],
    "confidence": number between 0 and 1
  },
  "assessment": {
    "should_store": boolean,
    "is_factual_declaration": boolean,
    "extracted_fact": string or null,
    "adjusted_importance_score": number between 0 and 1,
    "tags": [string]
  }
}

Rules:
1. A factual declaration is the user stating something about themselves or their world ("I live in Lyon", "my daughter is 6").
2. For factual declarations, "extracted_fact" is one self-contained sentence in the third person ("The user lives in Lyon").
3. Greetings, thanks and small talk are not worth storing.
4. Transient questions (weather, time, conversions) score below 0.3 unless they reveal a lasting preference."#;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("unparseable analysis: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct ExchangeAnalyzer {
    max_tokens: u32,
}

impl Default for ExchangeAnalyzer {
    fn default() -> Self {
        Self { max_tokens: 512 }
    }
}

impl ExchangeAnalyzer {
    /// Classify and assess one exchange. Deterministic (temperature 0).
    pub async fn analyze(
        &self,
        provider: &BoxLlmProvider,
        model_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<ExchangeAnalysis, AnalysisError> {
        let request = CompletionRequest {
            model: model_id.to_string(),
            messages: vec![
                ConversationMessage::system(ANALYSIS_SYSTEM_PROMPT),
                ConversationMessage::user(format!(
                    "User said:\n{user_message}\n\nAssistant replied:\n{assistant_message}"
                )),
            ],
            max_tokens: self.max_tokens,
            temperature: Some(0.0),
            tools: Vec::new(),
            tool_choice: None,
        };

        let span = info_span!(
            "gen_ai.analyze",
            gen_ai.system = provider.name(),
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
        );
        let response = provider.complete(&request).instrument(span).await?;
        parse_analysis(&response.content)
    }
}

/// Parse the model's verdict, tolerating code fences and surrounding prose.
pub fn parse_analysis(raw: &str) -> Result<ExchangeAnalysis, AnalysisError> {
    let trimmed = raw.trim();
    if let Ok(analysis) = serde_json::from_str::<ExchangeAnalysis>(trimmed) {
        return Ok(analysis);
    }

    let start = trimmed
        .find('{')
        .ok_or_else(|| AnalysisError::Parse(preview(trimmed)))?;
    let end = find_json_end(trimmed, start).ok_or_else(|| AnalysisError::Parse(preview(trimmed)))?;
    serde_json::from_str(&trimmed[start..end]).map_err(|e| AnalysisError::Parse(e.to_string()))
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, text_response};

    const VERDICT: &str = r#"{
        "classification": {"type": "factual_declaration", "sentiment": "neutral", "topic": "home", "entities": ["Lyon"], "confidence": 0.9},
        "assessment": {"should_store": true, "is_factual_declaration": true, "extracted_fact": "The user lives in Lyon", "adjusted_importance_score": 0.8, "tags": ["home"]}
    }"#;

    #[test]
    fn test_parse_plain_and_fenced() {
        let plain = parse_analysis(VERDICT).unwrap();
        assert_eq!(plain.classification.kind, "factual_declaration");
        assert_eq!(plain.assessment.extracted_fact.as_deref(), Some("The user lives in Lyon"));

        let fenced = format!("Here you go:\n```json\n{VERDICT}\n```");
        assert_eq!(parse_analysis(&fenced).unwrap(), plain);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_analysis("no json here"), Err(AnalysisError::Parse(_))));
        assert!(matches!(parse_analysis("{\"classification\": "), Err(AnalysisError::Parse(_))));
    }

    #[tokio::test]
    async fn test_analyze_sends_deterministic_request() {
        let provider = ScriptedProvider::new("openai", vec![Ok(text_response(VERDICT))]);
        let boxed = BoxLlmProvider::new(provider.clone());

        let analysis = ExchangeAnalyzer::default()
            .analyze(&boxed, "gpt-4o-mini", "I live in Lyon", "Nice city!")
            .await
            .unwrap();
        assert!(analysis.assessment.should_store);

        let request = &provider.calls()[0];
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.tools.is_empty());
        assert!(request.messages[1].text().contains("I live in Lyon"));
    }
}
