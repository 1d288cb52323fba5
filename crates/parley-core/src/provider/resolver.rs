//! Resolve the active chat provider for a user.

use std::time::Instant;

use tracing::{debug, warn};

use parley_types::error::{ConfigurationError, RepositoryError};
use parley_types::provider::{ProviderConfig, validate_endpoint};

use crate::clock::{Clock, SystemClock};
use crate::repository::task_config::TaskConfigRepository;

use super::cache::ProviderCache;

/// Why a provider could not be resolved.
///
/// `Configuration` is a user-fixable defect and is surfaced verbatim;
/// `Storage` is a transient failure of the configuration store.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to load chat configuration: {0}")]
    Storage(#[from] RepositoryError),
}

pub struct ProviderResolver<R, C = SystemClock> {
    repo: R,
    cache: ProviderCache<C>,
}

impl<R: TaskConfigRepository, C: Clock> ProviderResolver<R, C> {
    pub fn new(repo: R, cache: ProviderCache<C>) -> Self {
        Self { repo, cache }
    }

    /// Resolve `user_id`'s provider, serving from cache while it is fresh.
    pub async fn resolve(&self, user_id: &str) -> Result<ProviderConfig, ResolveError> {
        if let Some(config) = self.cache.get(user_id) {
            debug!(user_id, "Provider cache hit");
            return Ok(config);
        }

        let start = Instant::now();
        let task = self
            .repo
            .get_chat_config(user_id)
            .await?
            .ok_or(ConfigurationError::NoProvider)?;

        let primary = validate_endpoint(task.provider.as_ref(), task.model_id.as_deref())?;

        let fallback = match (&task.fallback_provider, &task.fallback_model_id) {
            (None, None) => None,
            (provider, model) => match validate_endpoint(provider.as_ref(), model.as_deref()) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!(user_id, error = %e, "Ignoring invalid fallback provider");
                    None
                }
            },
        };

        let config = ProviderConfig { primary, fallback };
        self.cache.insert(user_id, config.clone());
        debug!(
            user_id,
            provider = %config.primary.name,
            model = %config.primary.model_id,
            has_fallback = config.fallback.is_some(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Provider resolved from storage"
        );
        Ok(config)
    }
}
