use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Scope entry that grants every service and action.
pub const WILDCARD_SCOPE: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A provisioned caller identity.
///
/// `secret_hash` is the HMAC key used for challenge/response; the raw secret
/// handed to the agent at registration is never stored.
#[derive(Clone, Debug)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub owner: String,
    pub secret_hash: SecretString,
    pub scopes: Vec<String>,
    pub rate_limit_rpm: u32,
    pub rate_limit_daily: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub request_count: u64,
}

impl Agent {
    /// Scopes are `*`, `<service>` or `<service>:<action>`.
    pub fn permits(&self, service: &str, action: &str) -> bool {
        self.scopes.iter().any(|scope| {
            let scope = scope.trim();
            if scope == WILDCARD_SCOPE || scope == service {
                return true;
            }
            match scope.split_once(':') {
                Some((scope_service, scope_action)) => {
                    scope_service == service && (scope_action == action || scope_action == "*")
                }
                None => false,
            }
        })
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id.0.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            scopes: self.scopes.clone(),
            rate_limit_rpm: self.rate_limit_rpm,
            rate_limit_daily: self.rate_limit_daily,
            enabled: self.enabled,
            created_at: self.created_at.to_rfc3339(),
            last_used_at: self.last_used_at.map(|value| value.to_rfc3339()),
            request_count: self.request_count,
        }
    }
}

/// Agent record without key material, safe to print or return over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub scopes: Vec<String>,
    pub rate_limit_rpm: u32,
    pub rate_limit_daily: u32,
    pub enabled: bool,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub request_count: u64,
}
