//! Per-user provider cache with lazy TTL expiry.
//!
//! Entries are written through by the resolver and never evicted explicitly;
//! an entry older than the TTL is dropped on the next read of its key.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use parley_types::provider::ProviderConfig;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry {
    config: ProviderConfig,
    stored_at: Instant,
}

pub struct ProviderCache<C = SystemClock> {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    clock: C,
}

impl ProviderCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> ProviderCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Return the cached config if it is younger than the TTL.
    pub fn get(&self, user_id: &str) -> Option<ProviderConfig> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(user_id) {
            if now.duration_since(entry.stored_at) < self.ttl {
                return Some(entry.config.clone());
            }
        }
        self.entries
            .remove_if(user_id, |_, entry| now.duration_since(entry.stored_at) >= self.ttl);
        None
    }

    pub fn insert(&self, user_id: &str, config: ProviderConfig) {
        self.entries.insert(
            user_id.to_string(),
            CacheEntry {
                config,
                stored_at: self.clock.now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
