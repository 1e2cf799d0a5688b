pub mod audit;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod rate_limit;
pub mod registry;
pub mod scrub;
pub mod services;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use auth::{
    AgentRepository, Authenticator, Caller, CallerCredentials, InMemoryAgentRepository,
    InMemoryNonceStore, NonceStore, NONCE_TTL,
};
pub use credentials::{ConfigCredentialStore, CredentialStore};
pub use domain::agent::{Agent, AgentId, AgentSummary, WILDCARD_SCOPE};
pub use domain::envelope::{
    ErrorBody, GatewayEnvelope, GatewayRequest, GatewayResponse, ResponseMeta,
};
pub use errors::{ErrorCode, GatewayError, StoreError};
pub use executor::{ExecutionResult, Executor};
pub use gateway::Gateway;
pub use rate_limit::{
    CounterStore, InMemoryCounterStore, RateLimitResult, RateLimiter, ServiceLimit,
};
pub use registry::{ServiceDefinition, ServiceDescriptor, ServiceRegistry, UpstreamRequest};
