//! Speculative memory prefetch.
//!
//! After a request's context is gathered, likely follow-up queries are
//! searched in the background and their hits parked here. Only a later
//! request whose message matches a parked query (same user) consumes them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use parley_types::memory::MemoryHit;

use crate::clock::{Clock, SystemClock};

use super::store::MemorySearch;

pub struct PrefetchCache<C = SystemClock> {
    entries: DashMap<(String, String), (Instant, Vec<MemoryHit>)>,
    ttl: Duration,
    clock: C,
}

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

impl PrefetchCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> PrefetchCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn get(&self, user_id: &str, query: &str) -> Option<Vec<MemoryHit>> {
        let key = (user_id.to_string(), normalize_query(query));
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(&key) {
            if now.duration_since(entry.0) < self.ttl {
                return Some(entry.1.clone());
            }
        }
        self.entries
            .remove_if(&key, |_, (stored_at, _)| now.duration_since(*stored_at) >= self.ttl);
        None
    }

    pub fn insert(&self, user_id: &str, query: &str, hits: Vec<MemoryHit>) {
        self.entries.insert(
            (user_id.to_string(), normalize_query(query)),
            (self.clock.now(), hits),
        );
    }

    pub fn contains(&self, user_id: &str, query: &str) -> bool {
        self.get(user_id, query).is_some()
    }
}

/// Predict follow-up queries from the user's frequent topics.
pub fn predict_follow_ups(current_message: &str, topics: &[String], max: usize) -> Vec<String> {
    let current = normalize_query(current_message);
    let mut queries: Vec<String> = Vec::new();
    for topic in topics {
        let topic = topic.trim();
        if topic.is_empty() || normalize_query(topic) == current {
            continue;
        }
        if queries.iter().any(|q| q.eq_ignore_ascii_case(topic)) {
            continue;
        }
        queries.push(topic.to_string());
        if queries.len() == max {
            break;
        }
    }
    queries
}

/// Search each query not already parked and park the hits.
///
/// Failures are logged at debug and otherwise ignored: a missed prefetch
/// only costs a future request its shortcut.
pub async fn run_prefetch<M: MemorySearch, C: Clock>(
    memory: Arc<M>,
    cache: Arc<PrefetchCache<C>>,
    user_id: String,
    queries: Vec<String>,
    limit: usize,
) {
    for query in queries {
        if cache.contains(&user_id, &query) {
            continue;
        }
        let hits = match memory.fast_search(&user_id, &query, limit).await {
            Ok(hits) => hits,
            Err(_) => match memory.semantic_search(&user_id, &query, limit).await {
                Ok(hits) => hits,
                Err(e) => {
                    debug!(user_id = %user_id, query = %query, error = %e, "Prefetch search failed");
                    continue;
                }
            },
        };
        debug!(user_id = %user_id, query = %query, hits = hits.len(), "Prefetched memories");
        cache.insert(&user_id, &query, hits);
    }
}
