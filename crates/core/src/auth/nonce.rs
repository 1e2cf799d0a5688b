use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const NONCE_TTL: Duration = Duration::from_secs(30);
/// Outstanding nonces one agent may hold; issuing past it evicts that agent's oldest.
pub const MAX_NONCES_PER_AGENT: usize = 32;
const MAX_OUTSTANDING_NONCES: usize = 10_000;

/// Single-use challenge nonces bound to an agent id.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Issues a fresh nonce for `agent_id`, valid for [`NONCE_TTL`].
    async fn issue(&self, agent_id: &str) -> String;

    /// Returns true at most once per issued nonce, and only before it expires.
    async fn consume(&self, agent_id: &str, nonce: &str) -> bool;
}

type AgentNonces = HashMap<String, Instant>;

/// Nonces grouped by agent so one agent's issuance never evicts another's.
#[derive(Debug)]
pub struct InMemoryNonceStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, AgentNonces>>,
}

impl Default for InMemoryNonceStore {
    fn default() -> Self {
        Self::with_ttl(NONCE_TTL)
    }
}

impl InMemoryNonceStore {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    pub async fn outstanding(&self) -> usize {
        self.entries.read().await.values().map(HashMap::len).sum()
    }

    pub async fn outstanding_for(&self, agent_id: &str) -> usize {
        self.entries.read().await.get(agent_id).map_or(0, HashMap::len)
    }
}

fn evict_oldest(nonces: &mut AgentNonces) {
    if let Some(oldest) =
        nonces.iter().min_by_key(|(_, expires_at)| **expires_at).map(|(nonce, _)| nonce.clone())
    {
        nonces.remove(&oldest);
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn issue(&self, agent_id: &str) -> String {
        let nonce = Uuid::new_v4().to_string();
        let now = Instant::now();

        let mut entries = self.entries.write().await;
        entries.retain(|_, nonces| {
            nonces.retain(|_, expires_at| *expires_at > now);
            !nonces.is_empty()
        });

        let total: usize = entries.values().map(HashMap::len).sum();
        if total >= MAX_OUTSTANDING_NONCES {
            // Backstop across agents: the largest holder gives one up.
            if let Some(largest) = entries.values_mut().max_by_key(|nonces| nonces.len()) {
                evict_oldest(largest);
            }
        }

        let nonces = entries.entry(agent_id.to_string()).or_default();
        if nonces.len() >= MAX_NONCES_PER_AGENT {
            evict_oldest(nonces);
        }
        nonces.insert(nonce.clone(), now + self.ttl);
        nonce
    }

    async fn consume(&self, agent_id: &str, nonce: &str) -> bool {
        let mut entries = self.entries.write().await;
        let Some(nonces) = entries.get_mut(agent_id) else {
            return false;
        };
        let issued = nonces.remove(nonce);
        if nonces.is_empty() {
            entries.remove(agent_id);
        }
        match issued {
            Some(expires_at) => expires_at > Instant::now(),
            None => false,
        }
    }
}
