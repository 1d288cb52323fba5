//! Context lookup traits (ports).
//!
//! Implementations live in parley-infra. The semantic memory engine, the
//! user-profile store and the conversation cache are external collaborators;
//! these traits are the only view the pipeline has of them.

use std::future::Future;

use parley_types::context::{ConversationContext, UserContext};
use parley_types::error::RepositoryError;
use parley_types::memory::MemoryHit;

/// Read side of long-term memory.
pub trait MemorySearch: Send + Sync {
    /// Cheap retrieval path (keyword / recency based).
    fn fast_search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<MemoryHit>, RepositoryError>> + Send;

    /// Slower semantic retrieval, used when the fast path fails.
    fn semantic_search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<MemoryHit>, RepositoryError>> + Send;
}

/// Precomputed per-user context.
pub trait UserContextStore: Send + Sync {
    fn get_user_context(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<UserContext>, RepositoryError>> + Send;
}

/// Cached window of recent conversation.
pub trait ConversationStore: Send + Sync {
    fn get_conversation(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<ConversationContext>, RepositoryError>> + Send;

    fn save_conversation(
        &self,
        user_id: &str,
        context: &ConversationContext,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Append one exchange to the user's window, keeping the newest
    /// `max_turns` turns. Concurrent appends for the same user must all land.
    fn append_exchange(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
        max_turns: usize,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}
