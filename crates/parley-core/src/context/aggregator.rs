//! Concurrent context gathering.
//!
//! Four independent lookups run at once: memory search, provider resolution,
//! precomputed user context, and the cached conversation window. Each one
//! degrades on its own; only a provider failure aborts the request.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use parley_types::context::{ConversationContext, UserContext};
use parley_types::memory::MemorySearchResult;
use parley_types::provider::ProviderConfig;
use parley_types::trace::{FlowTrace, StageStatus};

use crate::background::BackgroundTasks;
use crate::clock::{Clock, SystemClock};
use crate::provider::{ProviderResolver, ResolveError};
use crate::repository::task_config::TaskConfigRepository;

use super::prefetch::{PrefetchCache, predict_follow_ups, run_prefetch};
use super::store::{ConversationStore, MemorySearch, UserContextStore};

/// Everything the orchestrator needs besides the message itself.
#[derive(Debug, Clone)]
pub struct GatheredContext {
    pub memories: MemorySearchResult,
    pub provider: ProviderConfig,
    pub user_context: UserContext,
    pub conversation: ConversationContext,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub search_limit: usize,
    pub prefetch_max_queries: usize,
}

pub struct ContextAggregator<R, M, X, C = SystemClock> {
    resolver: Arc<ProviderResolver<R, C>>,
    memory: Arc<M>,
    contexts: Arc<X>,
    prefetch: Arc<PrefetchCache<C>>,
    background: BackgroundTasks,
    settings: AggregatorSettings,
}

impl<R, M, X, C> ContextAggregator<R, M, X, C>
where
    R: TaskConfigRepository + 'static,
    M: MemorySearch + 'static,
    X: UserContextStore + ConversationStore + 'static,
    C: Clock + 'static,
{
    pub fn new(
        resolver: Arc<ProviderResolver<R, C>>,
        memory: Arc<M>,
        contexts: Arc<X>,
        prefetch: Arc<PrefetchCache<C>>,
        background: BackgroundTasks,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            resolver,
            memory,
            contexts,
            prefetch,
            background,
            settings,
        }
    }

    pub async fn gather(
        &self,
        user_id: &str,
        message: &str,
        trace: &mut FlowTrace,
    ) -> Result<GatheredContext, ResolveError> {
        let (memories, provider, user_context, conversation) = tokio::join!(
            timed(self.search_memories(user_id, message)),
            timed(self.resolver.resolve(user_id)),
            timed(self.contexts.get_user_context(user_id)),
            timed(self.contexts.get_conversation(user_id)),
        );

        let (memories, elapsed) = memories;
        let status = if memories.is_degraded() {
            StageStatus::Degraded
        } else {
            StageStatus::Completed
        };
        trace.step(
            "memory_search",
            "context_aggregator",
            status,
            millis(elapsed),
            memories
                .error
                .as_ref()
                .map(|e| format!("memory unavailable, continuing without: {e}")),
        );

        let (user_context, elapsed) = user_context;
        let user_context = match user_context {
            Ok(ctx) => {
                trace.step("user_context", "context_aggregator", StageStatus::Completed, millis(elapsed), None);
                ctx.unwrap_or_default()
            }
            Err(e) => {
                warn!(user_id, error = %e, "User context lookup failed, using default");
                trace.step(
                    "user_context",
                    "context_aggregator",
                    StageStatus::Degraded,
                    millis(elapsed),
                    Some(format!("lookup failed: {e}")),
                );
                UserContext::default()
            }
        };

        let (conversation, elapsed) = conversation;
        let conversation = match conversation {
            Ok(ctx) => {
                trace.step("conversation_context", "context_aggregator", StageStatus::Completed, millis(elapsed), None);
                ctx.unwrap_or_default()
            }
            Err(e) => {
                warn!(user_id, error = %e, "Conversation context lookup failed, using empty");
                trace.step(
                    "conversation_context",
                    "context_aggregator",
                    StageStatus::Degraded,
                    millis(elapsed),
                    Some(format!("lookup failed: {e}")),
                );
                ConversationContext::default()
            }
        };

        let (provider, elapsed) = provider;
        let provider = match provider {
            Ok(p) => {
                trace.step("provider", "provider_resolver", StageStatus::Completed, millis(elapsed), None);
                p
            }
            Err(e) => {
                trace.step(
                    "provider",
                    "provider_resolver",
                    StageStatus::Failed,
                    millis(elapsed),
                    Some(e.to_string()),
                );
                return Err(e);
            }
        };

        self.spawn_prefetch(user_id, message, &user_context);

        Ok(GatheredContext {
            memories,
            provider,
            user_context,
            conversation,
        })
    }

    /// Prefetch hit, else fast search, else semantic search, else unavailable.
    async fn search_memories(&self, user_id: &str, message: &str) -> MemorySearchResult {
        if let Some(hits) = self.prefetch.get(user_id, message) {
            debug!(user_id, hits = hits.len(), "Memory prefetch hit");
            return MemorySearchResult::found(hits);
        }

        let limit = self.settings.search_limit;
        match self.memory.fast_search(user_id, message, limit).await {
            Ok(hits) => MemorySearchResult::found(hits),
            Err(fast_err) => {
                debug!(user_id, error = %fast_err, "Fast memory search failed, trying semantic search");
                match self.memory.semantic_search(user_id, message, limit).await {
                    Ok(hits) => MemorySearchResult::found(hits),
                    Err(e) => {
                        warn!(user_id, error = %e, "Memory search unavailable");
                        MemorySearchResult::unavailable(e.to_string())
                    }
                }
            }
        }
    }

    fn spawn_prefetch(&self, user_id: &str, message: &str, user_context: &UserContext) {
        let queries = predict_follow_ups(message, &user_context.topics, self.settings.prefetch_max_queries);
        if queries.is_empty() {
            return;
        }
        self.background.submit(
            "memory_prefetch",
            {
                let memory = self.memory.clone();
                let cache = self.prefetch.clone();
                let user_id = user_id.to_string();
                let limit = self.settings.search_limit;
                async move {
                    run_prefetch(memory, cache, user_id, queries, limit).await;
                    Ok::<(), std::convert::Infallible>(())
                }
            },
        );
    }
}

async fn timed<F: Future>(future: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = future.await;
    (output, start.elapsed())
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
