//! Chat task configuration repository trait definition.

use parley_types::error::RepositoryError;
use parley_types::provider::ChatTaskConfig;

/// Repository trait for per-user chat task configuration.
///
/// Implementations live in parley-infra (e.g., SqliteTaskConfigRepository).
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait TaskConfigRepository: Send + Sync {
    /// Load a user's chat task configuration, joined with its provider rows.
    ///
    /// Returns `Ok(None)` when the user never configured chat.
    fn get_chat_config(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ChatTaskConfig>, RepositoryError>> + Send;

    /// Insert or replace a user's chat task configuration.
    fn save_chat_config(
        &self,
        config: &ChatTaskConfig,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
