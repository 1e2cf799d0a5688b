use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::StoreError;

/// Shared fixed-window counters. Reads and increments are separate, non-transactional calls.
///
/// `now` is unix seconds supplied by the caller; expiry is judged against it, never the wall clock.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`; missing or expired keys count as zero.
    async fn current(&self, key: &str, now: u64) -> Result<u64, StoreError>;

    /// Adds one to `key`, (re)setting its expiry to `now + ttl_secs`, and returns the new count.
    async fn increment(&self, key: &str, ttl_secs: u64, now: u64) -> Result<u64, StoreError>;
}

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    counters: RwLock<HashMap<String, (u64, u64)>>,
}

impl InMemoryCounterStore {
    pub async fn len(&self) -> usize {
        self.counters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.counters.read().await.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn current(&self, key: &str, now: u64) -> Result<u64, StoreError> {
        let counters = self.counters.read().await;
        Ok(counters
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(count, _)| *count)
            .unwrap_or(0))
    }

    async fn increment(&self, key: &str, ttl_secs: u64, now: u64) -> Result<u64, StoreError> {
        let expires_at = now.saturating_add(ttl_secs);
        let mut counters = self.counters.write().await;

        if counters.len() >= PRUNE_THRESHOLD {
            counters.retain(|_, (_, expiry)| *expiry > now);
        }

        let entry = counters.entry(key.to_string()).or_insert((0, expires_at));
        if entry.1 <= now {
            entry.0 = 0;
        }
        entry.0 += 1;
        entry.1 = expires_at;
        Ok(entry.0)
    }
}
