//! Caller authentication: static bearer keys for trusted services, HMAC challenge/response for
//! agents.

pub mod nonce;
pub mod signature;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::agent::{Agent, AgentId};
use crate::errors::{GatewayError, StoreError};

pub use nonce::{InMemoryNonceStore, NonceStore, MAX_NONCES_PER_AGENT, NONCE_TTL};

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, StoreError>;
    async fn save(&self, agent: Agent) -> Result<(), StoreError>;
    async fn list(&self) -> Result<Vec<Agent>, StoreError>;
    /// Returns false when no agent has this id.
    async fn set_enabled(&self, id: &AgentId, enabled: bool) -> Result<bool, StoreError>;
    async fn record_usage(&self, id: &AgentId, used_at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, Agent>>,
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        Ok(self.agents.read().await.get(&id.0).cloned())
    }

    async fn save(&self, agent: Agent) -> Result<(), StoreError> {
        self.agents.write().await.insert(agent.id.0.clone(), agent);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Agent>, StoreError> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(agents)
    }

    async fn set_enabled(&self, id: &AgentId, enabled: bool) -> Result<bool, StoreError> {
        match self.agents.write().await.get_mut(&id.0) {
            Some(agent) => {
                agent.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_usage(&self, id: &AgentId, used_at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(agent) = self.agents.write().await.get_mut(&id.0) {
            agent.last_used_at = Some(used_at);
            agent.request_count += 1;
        }
        Ok(())
    }
}

/// Authenticated identity behind a request.
#[derive(Clone, Debug)]
pub enum Caller {
    /// Internal service presenting a configured bearer key.
    Trusted { key_index: usize },
    Agent(Agent),
}

impl Caller {
    pub fn label(&self) -> String {
        match self {
            Self::Trusted { key_index } => format!("api_key#{key_index}"),
            Self::Agent(agent) => format!("agent:{}", agent.id),
        }
    }

    pub fn agent(&self) -> Option<&Agent> {
        match self {
            Self::Trusted { .. } => None,
            Self::Agent(agent) => Some(agent),
        }
    }
}

/// Raw credential material pulled from request headers.
#[derive(Clone, Debug, Default)]
pub struct CallerCredentials {
    pub bearer: Option<String>,
    pub agent_id: Option<String>,
    pub nonce: Option<String>,
    pub signature: Option<String>,
}

pub struct Authenticator {
    api_keys: Vec<SecretString>,
    agents: Arc<dyn AgentRepository>,
    nonces: Arc<dyn NonceStore>,
}

impl Authenticator {
    pub fn new(
        api_keys: Vec<SecretString>,
        agents: Arc<dyn AgentRepository>,
        nonces: Arc<dyn NonceStore>,
    ) -> Self {
        Self { api_keys, agents, nonces }
    }

    pub fn agents(&self) -> &Arc<dyn AgentRepository> {
        &self.agents
    }

    pub fn nonces(&self) -> &Arc<dyn NonceStore> {
        &self.nonces
    }

    /// Agent headers take precedence over a bearer key when both are present.
    pub async fn authenticate(
        &self,
        credentials: &CallerCredentials,
        correlation_id: &str,
    ) -> Result<Caller, GatewayError> {
        let outcome = match (credentials.agent_id.as_deref(), credentials.bearer.as_deref()) {
            (Some(agent_id), _) => self.authenticate_agent(agent_id, credentials).await,
            (None, Some(bearer)) => self.authenticate_bearer(bearer),
            (None, None) => Err("no credentials presented"),
        };

        outcome.map_err(|reason| {
            warn!(
                event_name = "gateway.auth.rejected",
                correlation_id = %correlation_id,
                agent_id = credentials.agent_id.as_deref().unwrap_or("none"),
                reason,
                "caller authentication failed"
            );
            GatewayError::auth_failed()
        })
    }

    fn authenticate_bearer(&self, bearer: &str) -> Result<Caller, &'static str> {
        let mut matched = None;
        // Compare against every key so timing does not reveal which one matched.
        for (index, key) in self.api_keys.iter().enumerate() {
            if signature::constant_time_eq(key.expose_secret().as_bytes(), bearer.as_bytes())
                && matched.is_none()
            {
                matched = Some(index);
            }
        }
        matched.map(|key_index| Caller::Trusted { key_index }).ok_or("unknown api key")
    }

    async fn authenticate_agent(
        &self,
        agent_id: &str,
        credentials: &CallerCredentials,
    ) -> Result<Caller, &'static str> {
        let nonce = credentials.nonce.as_deref().filter(|value| !value.is_empty());
        let provided = credentials.signature.as_deref().filter(|value| !value.is_empty());
        let (Some(nonce), Some(provided)) = (nonce, provided) else {
            return Err("missing nonce or signature");
        };

        let agent = match self.agents.find_by_id(&AgentId(agent_id.to_string())).await {
            Ok(Some(agent)) => agent,
            Ok(None) => return Err("unknown agent"),
            Err(_) => return Err("agent lookup failed"),
        };
        if !agent.enabled {
            return Err("agent disabled");
        }

        // Burn the nonce before checking the signature so a bad guess cannot be retried.
        if !self.nonces.consume(agent_id, nonce).await {
            return Err("nonce missing, expired or replayed");
        }
        if !signature::verify(agent.secret_hash.expose_secret(), nonce, provided) {
            return Err("signature mismatch");
        }

        Ok(Caller::Agent(agent))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::{
        signature, AgentRepository, Authenticator, Caller, CallerCredentials,
        InMemoryAgentRepository, InMemoryNonceStore, NonceStore,
    };
    use crate::domain::agent::{Agent, AgentId};
    use crate::errors::ErrorCode;

    pub(crate) fn agent_fixture(id: &str, raw_secret: &str, scopes: &[&str]) -> Agent {
        Agent {
            id: AgentId(id.to_string()),
            name: format!("{id} agent"),
            owner: "platform".to_string(),
            secret_hash: signature::hash_secret(raw_secret).into(),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
            rate_limit_rpm: 30,
            rate_limit_daily: 1_000,
            enabled: true,
            created_at: Utc::now(),
            last_used_at: None,
            request_count: 0,
        }
    }

    async fn authenticator_with(agent: Agent) -> (Authenticator, Arc<InMemoryNonceStore>) {
        let agents = Arc::new(InMemoryAgentRepository::default());
        agents.save(agent).await.expect("save agent");
        let nonces = Arc::new(InMemoryNonceStore::default());
        let authenticator =
            Authenticator::new(vec![String::from("trusted-key").into()], agents, nonces.clone());
        (authenticator, nonces)
    }

    fn agent_credentials(agent_id: &str, nonce: &str, signature: &str) -> CallerCredentials {
        CallerCredentials {
            bearer: None,
            agent_id: Some(agent_id.to_string()),
            nonce: Some(nonce.to_string()),
            signature: Some(signature.to_string()),
        }
    }

    #[tokio::test]
    async fn valid_agent_signature_authenticates_once() {
        let (authenticator, nonces) = authenticator_with(agent_fixture("a1", "s3cret", &["*"])).await;
        let nonce = nonces.issue("a1").await;
        let credentials =
            agent_credentials("a1", &nonce, &signature::sign_with_agent_secret("s3cret", &nonce));

        let caller = authenticator.authenticate(&credentials, "req-1").await.expect("auth");
        assert!(matches!(caller, Caller::Agent(ref agent) if agent.id.0 == "a1"));

        let replay = authenticator.authenticate(&credentials, "req-2").await;
        assert_eq!(replay.map(|_| ()).map_err(|error| error.code), Err(ErrorCode::AuthFailed));
    }

    #[tokio::test]
    async fn bad_signature_burns_the_nonce() {
        let (authenticator, nonces) = authenticator_with(agent_fixture("a1", "s3cret", &["*"])).await;
        let nonce = nonces.issue("a1").await;

        let wrong = agent_credentials("a1", &nonce, &signature::sign_with_agent_secret("x", &nonce));
        assert!(authenticator.authenticate(&wrong, "req-1").await.is_err());

        let right =
            agent_credentials("a1", &nonce, &signature::sign_with_agent_secret("s3cret", &nonce));
        assert!(authenticator.authenticate(&right, "req-2").await.is_err());
    }

    #[tokio::test]
    async fn disabled_or_unknown_agents_fail_identically() {
        let mut agent = agent_fixture("a1", "s3cret", &["*"]);
        agent.enabled = false;
        let (authenticator, nonces) = authenticator_with(agent).await;
        let nonce = nonces.issue("a1").await;
        let sig = signature::sign_with_agent_secret("s3cret", &nonce);

        let disabled = authenticator
            .authenticate(&agent_credentials("a1", &nonce, &sig), "req-1")
            .await
            .expect_err("disabled agent");
        let unknown = authenticator
            .authenticate(&agent_credentials("ghost", &nonce, &sig), "req-2")
            .await
            .expect_err("unknown agent");

        assert_eq!(disabled, unknown);
        assert_eq!(disabled.message, "authentication failed");
    }

    #[tokio::test]
    async fn bearer_keys_authenticate_trusted_callers() {
        let (authenticator, _) = authenticator_with(agent_fixture("a1", "s3cret", &["*"])).await;

        let trusted = CallerCredentials {
            bearer: Some("trusted-key".to_string()),
            ..CallerCredentials::default()
        };
        let caller = authenticator.authenticate(&trusted, "req-1").await.expect("auth");
        assert_eq!(caller.label(), "api_key#0");
        assert!(caller.agent().is_none());

        let wrong =
            CallerCredentials { bearer: Some("trusted-kez".to_string()), ..Default::default() };
        assert!(authenticator.authenticate(&wrong, "req-2").await.is_err());
        assert!(authenticator.authenticate(&CallerCredentials::default(), "req-3").await.is_err());
    }

    #[tokio::test]
    async fn in_memory_repository_tracks_usage_and_enabled_flag() {
        let repository = InMemoryAgentRepository::default();
        repository.save(agent_fixture("a1", "s", &["*"])).await.expect("save");

        repository.record_usage(&AgentId("a1".to_string()), Utc::now()).await.expect("usage");
        assert!(repository.set_enabled(&AgentId("a1".to_string()), false).await.expect("toggle"));
        assert!(!repository.set_enabled(&AgentId("zz".to_string()), false).await.expect("toggle"));

        let agent = repository
            .find_by_id(&AgentId("a1".to_string()))
            .await
            .expect("find")
            .expect("agent present");
        assert_eq!(agent.request_count, 1);
        assert!(agent.last_used_at.is_some());
        assert!(!agent.enabled);
    }
}
