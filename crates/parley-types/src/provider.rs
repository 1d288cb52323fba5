//! Provider configuration types for Parley.
//!
//! A user's chat provider is stored as a [`ChatTaskConfig`] and resolved into
//! a validated [`ProviderConfig`] (primary endpoint plus optional fallback)
//! before any LLM call is made.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// One callable LLM endpoint: which provider, where, with which key and model.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    pub model_id: String,
}

// Manual Debug so the API key never reaches logs.
impl fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// The resolved chat provider for a user: a primary endpoint and an
/// optional fallback used when the primary overflows its token budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(flatten)]
    pub primary: ProviderEndpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<ProviderEndpoint>,
}

/// A provider row as stored in the provider registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProvider {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for StoredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredProvider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// A user's stored chat task configuration, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTaskConfig {
    pub user_id: String,
    pub provider: Option<StoredProvider>,
    pub model_id: Option<String>,
    pub fallback_provider: Option<StoredProvider>,
    pub fallback_model_id: Option<String>,
}

/// Returns `true` when a model id is made only of ASCII digits.
///
/// A purely numeric model id means a foreign-key value leaked into the
/// model column; no real model is named like that.
pub fn is_numeric_model_id(model_id: &str) -> bool {
    let trimmed = model_id.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit())
}

/// Validate a stored provider + model pair into a callable endpoint.
pub fn validate_endpoint(
    provider: Option<&StoredProvider>,
    model_id: Option<&str>,
) -> Result<ProviderEndpoint, ConfigurationError> {
    let provider = provider.ok_or(ConfigurationError::NoProvider)?;

    let model_id = model_id
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ConfigurationError::NoModel {
            provider: provider.name.clone(),
        })?;

    if is_numeric_model_id(model_id) {
        return Err(ConfigurationError::NumericModelId {
            model_id: model_id.to_string(),
        });
    }

    Ok(ProviderEndpoint {
        id: provider.id.clone(),
        name: provider.name.clone(),
        api_key: provider.api_key.clone(),
        base_url: provider.base_url.clone(),
        model_id: model_id.to_string(),
    })
}

/// Token limits for a model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLimits {
    /// Total context window (input + output) in tokens.
    pub context_window: u32,
    /// Largest output budget the model accepts.
    pub max_output_tokens: u32,
    /// Minimal output budget used as the last fallback tier.
    pub conservative_ceiling: u32,
}
