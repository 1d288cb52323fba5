//! LLM provider implementations.

pub mod openai_compat;

use std::time::Duration;

use parley_core::llm::box_provider::BoxLlmProvider;
use parley_core::llm::provider::LlmProviderFactory;
use parley_types::llm::LlmError;
use parley_types::provider::ProviderEndpoint;

use self::openai_compat::OpenAiCompatibleProvider;

/// Builds OpenAI-compatible clients for resolved endpoints.
///
/// One `reqwest::Client` (and its connection pool) is shared by every
/// provider this factory creates.
#[derive(Clone)]
pub struct HttpLlmProviderFactory {
    client: reqwest::Client,
}

impl HttpLlmProviderFactory {
    pub fn new(request_timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl LlmProviderFactory for HttpLlmProviderFactory {
    fn create(&self, endpoint: &ProviderEndpoint) -> Result<BoxLlmProvider, LlmError> {
        let base_url = endpoint.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(LlmError::InvalidRequest(format!(
                "provider '{}' has an invalid base URL",
                endpoint.name
            )));
        }
        Ok(BoxLlmProvider::new(OpenAiCompatibleProvider::new(
            self.client.clone(),
            endpoint,
        )))
    }
}
